//! Configuration types.
//!
//! ```toml
//! [templates]
//! global_delimiter = "$"
//! local_delimiter = "%"
//!
//! [plugins]
//! load = ["fbl-plugin-k8s", "./plugins/deploy"]
//! allow_unsafe_plugins = false
//! allow_unsafe_flows = false
//!
//! [report]
//! format = "json"
//! output = "report.json"
//!
//! [context.values]
//! environment = "staging"
//!
//! [context.secrets]
//! token = "..."
//!
//! [logging]
//! level = "debug"
//! file = "/var/log/fbl"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ConfigError, Result};

/// Delimiter used by the document-level (global) render pass.
pub const DEFAULT_GLOBAL_DELIMITER: char = '$';

/// Delimiter used by the per-step (local) render pass.
pub const DEFAULT_LOCAL_DELIMITER: char = '%';

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FblConfig {
    /// Template delimiter configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<TemplatesConfig>,

    /// Plugin loading configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<PluginsConfig>,

    /// Default report settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportConfig>,

    /// Seed values for the execution context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextConfig>,

    /// Logging configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

impl FblConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: FblConfig = toml::from_str(toml_str)?;
        if let Some(ref templates) = config.templates {
            templates.validate()?;
        }
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: FblConfig) {
        match (&mut self.templates, other.templates) {
            (Some(base), Some(layer)) => base.merge(layer),
            (base @ None, layer) => *base = layer,
            (_, None) => {}
        }

        match (&mut self.plugins, other.plugins) {
            (Some(base), Some(layer)) => base.merge(layer),
            (base @ None, layer) => *base = layer,
            (_, None) => {}
        }

        match (&mut self.report, other.report) {
            (Some(base), Some(layer)) => base.merge(layer),
            (base @ None, layer) => *base = layer,
            (_, None) => {}
        }

        match (&mut self.context, other.context) {
            (Some(base), Some(layer)) => base.merge(layer),
            (base @ None, layer) => *base = layer,
            (_, None) => {}
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Effective template delimiters, falling back to the defaults.
    pub fn delimiters(&self) -> (char, char) {
        let templates = self.templates.clone().unwrap_or_default();
        (
            templates
                .global_delimiter
                .unwrap_or(DEFAULT_GLOBAL_DELIMITER),
            templates.local_delimiter.unwrap_or(DEFAULT_LOCAL_DELIMITER),
        )
    }

    /// Whether plugin requirement failures are downgraded to warnings.
    pub fn allow_unsafe_plugins(&self) -> bool {
        self.plugins
            .as_ref()
            .and_then(|p| p.allow_unsafe_plugins)
            .unwrap_or(false)
    }

    /// Whether flow requirement failures are downgraded to warnings.
    pub fn allow_unsafe_flows(&self) -> bool {
        self.plugins
            .as_ref()
            .and_then(|p| p.allow_unsafe_flows)
            .unwrap_or(false)
    }
}

/// `[templates]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Delimiter for the document-level pass (`<$ ... $>` by default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_delimiter: Option<char>,

    /// Delimiter for the per-step pass (`<% ... %>` by default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_delimiter: Option<char>,
}

impl TemplatesConfig {
    fn merge(&mut self, other: TemplatesConfig) {
        if other.global_delimiter.is_some() {
            self.global_delimiter = other.global_delimiter;
        }
        if other.local_delimiter.is_some() {
            self.local_delimiter = other.local_delimiter;
        }
    }

    /// Check that both delimiters are usable and distinct.
    pub fn validate(&self) -> Result<()> {
        let global = self.global_delimiter.unwrap_or(DEFAULT_GLOBAL_DELIMITER);
        let local = self.local_delimiter.unwrap_or(DEFAULT_LOCAL_DELIMITER);
        validate_delimiter("global", global)?;
        validate_delimiter("local", local)?;
        if global == local {
            return Err(ConfigError::InvalidDelimiter {
                pass: "local",
                delimiter: local,
                reason: "must differ from the global delimiter".to_string(),
            });
        }
        Ok(())
    }
}

/// Validate a single template delimiter character.
///
/// The delimiter forms the tag pair `<d` / `d>`, so it cannot be alphanumeric,
/// whitespace, a brace, or one of the angle brackets themselves.
pub fn validate_delimiter(pass: &'static str, delimiter: char) -> Result<()> {
    let reason = if delimiter.is_alphanumeric() {
        Some("must not be alphanumeric")
    } else if delimiter.is_whitespace() {
        Some("must not be whitespace")
    } else if matches!(delimiter, '{' | '}' | '<' | '>') {
        Some("must not be a brace or angle bracket")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConfigError::InvalidDelimiter {
            pass,
            delimiter,
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// `[plugins]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Plugins to load before every run (package names or paths).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load: Vec<String>,

    /// Downgrade plugin requirement failures to warnings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_unsafe_plugins: Option<bool>,

    /// Downgrade flow requirement failures to warnings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_unsafe_flows: Option<bool>,
}

impl PluginsConfig {
    fn merge(&mut self, other: PluginsConfig) {
        for plugin in other.load {
            if !self.load.contains(&plugin) {
                self.load.push(plugin);
            }
        }
        if other.allow_unsafe_plugins.is_some() {
            self.allow_unsafe_plugins = other.allow_unsafe_plugins;
        }
        if other.allow_unsafe_flows.is_some() {
            self.allow_unsafe_flows = other.allow_unsafe_flows;
        }
    }
}

/// `[report]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Reporter name (e.g. `json`, `yaml`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// File the rendered report is written to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl ReportConfig {
    fn merge(&mut self, other: ReportConfig) {
        if other.format.is_some() {
            self.format = other.format;
        }
        if other.output.is_some() {
            self.output = other.output;
        }
    }
}

/// `[context]` section: seed values for `ctx` and `secrets`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Initial context variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, Value>,

    /// Initial secrets.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, Value>,
}

impl ContextConfig {
    fn merge(&mut self, other: ContextConfig) {
        self.values.extend(other.values);
        self.secrets.extend(other.secrets);
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level when `RUST_LOG` is unset (`info`, `debug`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Directory for the rolling JSON log file. Disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}
