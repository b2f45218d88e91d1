//! Plugin discovery.
//!
//! Lookup order for a plugin reference:
//!
//! 1. the installed catalog: compiled-in plugins and install directories,
//!    matched by package name;
//! 2. an upward search from the working directory through
//!    `<dir>/fbl_plugins/<name>` and then `<dir>/<name>`;
//! 3. a direct path, relative to the working directory, to a plugin directory
//!    or manifest file.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::manifest::{ManifestPlugin, PluginManifest};
use crate::plugin::Plugin;
use crate::{PluginError, Result};

/// Directory name searched in every ancestor of the working directory.
pub const PLUGINS_DIR: &str = "fbl_plugins";

/// Finds plugins by name or path.
#[derive(Clone, Default)]
pub struct PluginLocator {
    catalog: HashMap<String, Arc<dyn Plugin>>,
    install_dirs: Vec<PathBuf>,
}

impl PluginLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locator with the user-level install directory (`<data dir>/fbl/plugins`).
    pub fn with_defaults() -> Self {
        let mut locator = Self::new();
        if let Some(data_dir) = dirs::data_dir() {
            locator = locator.with_install_dir(data_dir.join("fbl").join("plugins"));
        }
        locator
    }

    pub fn with_install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dirs.push(dir.into());
        self
    }

    /// Make a compiled-in plugin available by name.
    pub fn add(&mut self, plugin: Arc<dyn Plugin>) {
        self.catalog.insert(plugin.name().to_string(), plugin);
    }

    pub fn install_dirs(&self) -> &[PathBuf] {
        &self.install_dirs
    }

    pub fn locate(&self, name: &str, wd: &Path) -> Result<Arc<dyn Plugin>> {
        if let Some(plugin) = self.catalog.get(name) {
            tracing::debug!(plugin = name, "located plugin in catalog");
            return Ok(Arc::clone(plugin));
        }

        for dir in &self.install_dirs {
            if let Some(plugin) = load_named(&dir.join(name), name)? {
                return Ok(plugin);
            }
        }

        for dir in wd.ancestors() {
            for candidate in [dir.join(PLUGINS_DIR).join(name), dir.join(name)] {
                if let Some(plugin) = load_named(&candidate, name)? {
                    return Ok(plugin);
                }
            }
        }

        let direct = wd.join(name);
        if direct.is_file() || PluginManifest::find_in(&direct).is_some() {
            tracing::debug!(path = %direct.display(), "loading plugin by path");
            return Ok(Arc::new(ManifestPlugin::load(&direct)?));
        }

        Err(PluginError::NotFound {
            name: name.to_string(),
            wd: wd.to_path_buf(),
        })
    }
}

impl fmt::Debug for PluginLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut catalog: Vec<&str> = self.catalog.keys().map(String::as_str).collect();
        catalog.sort_unstable();
        f.debug_struct("PluginLocator")
            .field("catalog", &catalog)
            .field("install_dirs", &self.install_dirs)
            .finish()
    }
}

/// Load the plugin in `dir` if it has a manifest declaring `name`.
fn load_named(dir: &Path, name: &str) -> Result<Option<Arc<dyn Plugin>>> {
    if PluginManifest::find_in(dir).is_none() {
        return Ok(None);
    }
    let plugin = ManifestPlugin::load(dir)?;
    if plugin.name() != name {
        tracing::debug!(
            dir = %dir.display(),
            expected = name,
            found = plugin.name(),
            "skipping plugin with a different name"
        );
        return Ok(None);
    }
    tracing::debug!(plugin = name, dir = %dir.display(), "located plugin");
    Ok(Some(Arc::new(plugin)))
}
