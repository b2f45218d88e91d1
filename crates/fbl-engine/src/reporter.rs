//! Reporters render a finished snapshot tree.

use std::sync::Arc;

use crate::error::Result;
use crate::snapshot::ActionSnapshot;

pub trait Reporter: Send + Sync {
    /// Name used to select the reporter (e.g. `--report json`).
    fn name(&self) -> &str;

    fn generate(&self, snapshot: &ActionSnapshot) -> Result<String>;
}

/// Pretty-printed JSON of the whole snapshot tree.
#[derive(Debug, Default)]
pub struct JsonReporter;

impl Reporter for JsonReporter {
    fn name(&self) -> &str {
        "json"
    }

    fn generate(&self, snapshot: &ActionSnapshot) -> Result<String> {
        Ok(serde_json::to_string_pretty(snapshot)?)
    }
}

/// YAML rendering of the whole snapshot tree.
#[derive(Debug, Default)]
pub struct YamlReporter;

impl Reporter for YamlReporter {
    fn name(&self) -> &str {
        "yaml"
    }

    fn generate(&self, snapshot: &ActionSnapshot) -> Result<String> {
        Ok(serde_yaml::to_string(snapshot)?)
    }
}

pub fn builtin_reporters() -> Vec<Arc<dyn Reporter>> {
    vec![Arc::new(JsonReporter), Arc::new(YamlReporter)]
}
