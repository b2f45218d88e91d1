//! Config layer discovery.
//!
//! Layers, lowest precedence first:
//! 1. user: `<config dir>/config.toml` where the directory is the explicit
//!    override, `$FBL_CONFIG_DIR`, or `<platform config dir>/fbl`
//! 2. project: `fbl.toml` in the project directory (the cwd by default)
//!
//! CLI flags are merged on top by the binary.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::{ConfigError, FblConfig, Result};

const PROJECT_CONFIG_FILE: &str = "fbl.toml";
const USER_CONFIG_FILE: &str = "config.toml";
const CONFIG_DIR_ENV: &str = "FBL_CONFIG_DIR";

/// Which layer a config file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    User,
    Project,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Project => f.write_str("project"),
        }
    }
}

/// One candidate config file and whether it contributed to the result.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub kind: LayerKind,
    pub path: PathBuf,
    pub loaded: bool,
}

/// Merged configuration plus the layers that produced it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: FblConfig,
    /// Candidates in merge order.
    pub layers: Vec<ConfigLayer>,
    /// Files that exist but were skipped, one message each.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Layers that were found and merged.
    pub fn loaded(&self) -> impl Iterator<Item = &ConfigLayer> {
        self.layers.iter().filter(|l| l.loaded)
    }
}

/// Discover and merge layers with the default user directory.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Discover and merge layers; `config_dir` replaces the user directory lookup.
///
/// A layer that exists but fails to parse or validate is skipped with a
/// warning rather than aborting.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut candidates = Vec::with_capacity(2);
    let user_dir = config_dir.map(Path::to_path_buf).or_else(user_config_dir);
    if let Some(dir) = user_dir {
        candidates.push((LayerKind::User, dir.join(USER_CONFIG_FILE)));
    }
    let project_dir = project_dir.unwrap_or(Path::new("."));
    candidates.push((LayerKind::Project, project_dir.join(PROJECT_CONFIG_FILE)));

    let mut loaded = LoadedConfig {
        config: FblConfig::new(),
        layers: Vec::with_capacity(candidates.len()),
        warnings: Vec::new(),
    };
    for (kind, path) in candidates {
        let mut merged = false;
        if path.is_file() {
            match load_config_file(&path) {
                Ok(layer) => {
                    loaded.config.merge(layer);
                    merged = true;
                }
                Err(e) => loaded
                    .warnings
                    .push(format!("skipped {kind} config {}: {e}", path.display())),
            }
        }
        loaded.layers.push(ConfigLayer {
            kind,
            path,
            loaded: merged,
        });
    }
    Ok(loaded)
}

/// Parse and validate one config file.
pub fn load_config_file(path: &Path) -> Result<FblConfig> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    FblConfig::from_toml(&contents)
}

/// `$FBL_CONFIG_DIR` when set and non-empty, else `<platform config dir>/fbl`.
pub fn user_config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join("fbl")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn load(project: &TempDir, user: &TempDir) -> LoadedConfig {
        load_config_with_options(Some(project.path()), Some(user.path())).unwrap()
    }

    #[test]
    fn test_load_config_file_errors() {
        let err = load_config_file(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(matches!(
            load_config_file(&path).unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_no_files() {
        let (project, user) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let loaded = load(&project, &user);
        assert_eq!(loaded.config, FblConfig::default());
        assert_eq!(loaded.layers.len(), 2);
        assert_eq!(loaded.loaded().count(), 0);
    }

    #[test]
    fn test_project_overrides_user() {
        let (project, user) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        fs::write(
            user.path().join("config.toml"),
            r#"
[templates]
global_delimiter = "@"

[report]
format = "json"

[context.values]
region = "eu"
"#,
        )
        .unwrap();
        fs::write(
            project.path().join("fbl.toml"),
            r#"
[report]
format = "yaml"

[context.values]
service = "api"
"#,
        )
        .unwrap();

        let loaded = load(&project, &user);
        let config = &loaded.config;
        assert_eq!(config.delimiters(), ('@', '%'));
        assert_eq!(config.report.as_ref().unwrap().format.as_deref(), Some("yaml"));
        assert_eq!(config.context.as_ref().unwrap().values.len(), 2);

        let kinds: Vec<LayerKind> = loaded.loaded().map(|l| l.kind).collect();
        assert_eq!(kinds, vec![LayerKind::User, LayerKind::Project]);
    }

    #[test]
    fn test_broken_layer_is_skipped_with_warning() {
        let (project, user) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        fs::write(project.path().join("fbl.toml"), "not valid toml {{{{").unwrap();

        let loaded = load(&project, &user);
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].starts_with("skipped project config"));
        assert_eq!(loaded.loaded().count(), 0);
    }

    #[test]
    fn test_invalid_delimiter_layer_warns() {
        let (project, user) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        fs::write(
            user.path().join("config.toml"),
            "[templates]\nlocal_delimiter = \"x\"\n",
        )
        .unwrap();

        let loaded = load(&project, &user);
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("alphanumeric"));
        assert_eq!(loaded.config.delimiters(), ('$', '%'));
    }
}
