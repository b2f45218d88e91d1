//! Plugin system for fbl.
//!
//! Plugins bundle action handlers, reporters and template utilities together
//! with the requirements they place on the engine, on other plugins and on
//! executables available on `PATH`. A plugin is either compiled in
//! ([`StaticPlugin`]) or described by a manifest on disk ([`ManifestPlugin`]).
//!
//! # Plugin Structure
//!
//! ```text
//! fbl_plugins/
//!   fbl-plugin-greeter/
//!     plugin.yml             # manifest
//! ```
//!
//! [`FlowRunner`] owns the plugin table and resolves requirements before a
//! flow runs.

pub mod locator;
pub mod manifest;
pub mod plugin;
pub mod requirement;
pub mod runner;
pub mod validation;
pub mod version;

use std::path::PathBuf;

pub use locator::{PLUGINS_DIR, PluginLocator};
pub use manifest::{HandlerDef, MANIFEST_FILES, ManifestPlugin, PluginManifest};
pub use plugin::{CORE_PLUGIN_NAME, Plugin, StaticPlugin, core_plugin};
pub use requirement::{RequirementErrors, RequirementFailure, find_on_path};
pub use runner::FlowRunner;
pub use validation::{ManifestValidationError, ValidationResult};
pub use version::{VersionRange, parse_version};

/// Plugin error type.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Failed to parse a plugin manifest.
    #[error("failed to parse plugin manifest {}: {reason}", path.display())]
    ManifestParse { path: PathBuf, reason: String },

    /// Validation error in a manifest.
    #[error("invalid plugin manifest: {0}")]
    Validation(#[from] ManifestValidationError),

    /// No plugin could be located under the requested name or path.
    #[error("plugin '{name}' not found (searched upwards from {})", wd.display())]
    NotFound { name: String, wd: PathBuf },

    /// Requirements were not satisfied in strict mode.
    #[error(transparent)]
    Requirements(#[from] RequirementErrors),

    /// The flow itself failed before producing a snapshot.
    #[error(transparent)]
    Flow(#[from] fbl_engine::FlowError),

    /// IO error reading plugin files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;
