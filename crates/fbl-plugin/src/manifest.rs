//! Manifest-defined plugins.
//!
//! A plugin directory holds a `plugin.yml` (or `plugin.yaml`/`plugin.json`):
//!
//! ```yaml
//! name: fbl-plugin-greeter
//! version: 1.0.0
//! description: Greets people
//! requires:
//!   fbl: ">=1.0.0"
//! actionHandlers:
//!   - id: greeter.say
//!     aliases: [say]
//!     pipeline:
//!       ctx:
//!         greeting:
//!           inline: Hello, <% parameters.options.name %>!
//! ```
//!
//! Every declared handler is virtual: invoking it runs its `pipeline` step with
//! the invocation's rendered options available as `parameters.options`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fbl_engine::{
    ActionHandler, ActionSnapshot, Context, ExecutionScope, HandlerMetadata, ParsedStep,
    Requirements, ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::plugin::Plugin;
use crate::validation::{self, ManifestValidationError, ValidationResult};
use crate::{PluginError, Result};

/// File names recognised as a plugin manifest, in lookup order.
pub const MANIFEST_FILES: [&str; 3] = ["plugin.yml", "plugin.yaml", "plugin.json"];

/// Top-level plugin manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Plugin name (unique identifier, kebab-case).
    pub name: String,

    /// Semantic version (e.g., "1.0.0").
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub requires: Requirements,

    #[serde(default)]
    pub action_handlers: Vec<HandlerDef>,
}

/// One virtual action handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerDef {
    pub id: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Step executed when the handler is invoked.
    pub pipeline: Value,
}

impl PluginManifest {
    /// Parse a manifest from YAML (JSON is accepted too) and validate it.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(text).map_err(|e| PluginError::ManifestParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path)
    }

    /// Find the manifest file inside a plugin directory.
    pub fn find_in(dir: &Path) -> Option<PathBuf> {
        MANIFEST_FILES
            .iter()
            .map(|file| dir.join(file))
            .find(|path| path.is_file())
    }

    /// Validate required fields and constraints.
    pub fn validate(&self) -> ValidationResult<()> {
        validation::validate_name(&self.name)?;
        validation::validate_version(&self.version)?;

        if let Some(range) = &self.requires.fbl {
            validation::validate_range("fbl", range)?;
        }
        for (plugin, range) in &self.requires.plugins {
            validation::validate_name(plugin)?;
            validation::validate_range(&format!("plugins.{plugin}"), range)?;
        }
        if self.requires.applications.iter().any(|a| a.trim().is_empty()) {
            return Err(ManifestValidationError::invalid_field(
                "requires",
                "application names must not be empty",
            ));
        }

        for handler in &self.action_handlers {
            validation::validate_handler_key(&handler.id)?;
            for alias in &handler.aliases {
                validation::validate_handler_key(alias)?;
            }
            if handler.pipeline.is_null() {
                return Err(ManifestValidationError::missing_field(
                    "actionHandlers",
                    "every action handler needs a pipeline step",
                ));
            }
            ParsedStep::decode(&handler.pipeline).map_err(|e| {
                ManifestValidationError::invalid_field(
                    "actionHandlers",
                    format!("pipeline of '{}': {e}", handler.id),
                )
            })?;
        }
        validation::validate_unique_keys(self.action_handlers.iter().flat_map(|h| {
            std::iter::once(h.id.as_str()).chain(h.aliases.iter().map(String::as_str))
        }))?;

        Ok(())
    }
}

/// A plugin loaded from a manifest on disk.
pub struct ManifestPlugin {
    manifest: PluginManifest,
    root: PathBuf,
    handlers: Vec<Arc<dyn ActionHandler>>,
}

impl ManifestPlugin {
    /// Load from a plugin directory or directly from a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let manifest_path = if path.is_dir() {
            PluginManifest::find_in(path).ok_or_else(|| {
                PluginError::Validation(ManifestValidationError::missing_field(
                    "manifest",
                    "add a plugin.yml to the plugin directory",
                ))
            })?
        } else {
            path.to_path_buf()
        };
        let root = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let manifest = PluginManifest::from_file(&manifest_path)?;

        tracing::debug!(
            plugin = %manifest.name,
            version = %manifest.version,
            path = %manifest_path.display(),
            "loaded plugin manifest"
        );
        Ok(Self::from_manifest(manifest, root))
    }

    pub fn from_manifest(manifest: PluginManifest, root: PathBuf) -> Self {
        let handlers = manifest
            .action_handlers
            .iter()
            .map(|def| {
                Arc::new(VirtualHandler::new(def, &manifest.version, &root)) as Arc<dyn ActionHandler>
            })
            .collect();
        Self {
            manifest,
            root,
            handlers,
        }
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Directory the manifest was loaded from.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl fmt::Debug for ManifestPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestPlugin")
            .field("name", &self.manifest.name)
            .field("version", &self.manifest.version)
            .field("root", &self.root)
            .finish()
    }
}

impl Plugin for ManifestPlugin {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn version(&self) -> &str {
        &self.manifest.version
    }

    fn description(&self) -> Option<&str> {
        self.manifest.description.as_deref()
    }

    fn requires(&self) -> &Requirements {
        &self.manifest.requires
    }

    fn action_handlers(&self) -> Vec<Arc<dyn ActionHandler>> {
        self.handlers.clone()
    }
}

/// Runs a manifest-declared pipeline as a single action.
struct VirtualHandler {
    metadata: HandlerMetadata,
    pipeline: Value,
    plugin_dir: PathBuf,
}

impl VirtualHandler {
    fn new(def: &HandlerDef, version: &str, plugin_dir: &Path) -> Self {
        let mut metadata = HandlerMetadata::new(&def.id)
            .with_version(version)
            .with_aliases(def.aliases.iter().cloned());
        if let Some(description) = &def.description {
            metadata = metadata.with_description(description);
        }
        Self {
            metadata,
            pipeline: def.pipeline.clone(),
            plugin_dir: plugin_dir.to_path_buf(),
        }
    }
}

#[async_trait]
impl ActionHandler for VirtualHandler {
    fn metadata(&self) -> &HandlerMetadata {
        &self.metadata
    }

    fn validate(
        &self,
        _options: &Value,
        _context: &Context,
        _snapshot: &ActionSnapshot,
    ) -> std::result::Result<(), ValidationError> {
        Ok(())
    }

    async fn execute(
        &self,
        options: &Value,
        scope: &ExecutionScope<'_>,
        snapshot: &mut ActionSnapshot,
    ) -> fbl_engine::Result<()> {
        let mut overrides = Map::new();
        overrides.insert("options".into(), options.clone());
        overrides.insert(
            "pluginDir".into(),
            Value::String(self.plugin_dir.display().to_string()),
        );
        let parameters = scope.parameters.fork(overrides);

        let wd = snapshot.wd().to_path_buf();
        let child = scope
            .flow
            .execute_action(&wd, &self.pipeline, scope.context, &parameters, 0)
            .await?;
        snapshot.register_child(child);
        Ok(())
    }
}
