//! Configuration system for the fbl flow engine.
//!
//! Provides TOML-based configuration with:
//! - Template delimiter selection for the global and local render passes
//! - Plugin auto-loading and unsafe-mode switches
//! - Default report format/output and seed context values
//! - Config file layering (user config dir + project-local overrides)
//!
//! Command-line flags are applied on top of the merged result by the CLI.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigLayer, LayerKind, LoadedConfig, load_config, load_config_file, load_config_with_options,
    user_config_dir,
};
pub use error::{ConfigError, Result};
pub use types::*;
