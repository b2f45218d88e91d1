//! Step decoding.
//!
//! A step is a mapping with exactly one action key plus any number of
//! metadata keys starting with [`METADATA_PREFIX`]:
//!
//! ```yaml
//! $title: Deploy the service
//! exec:
//!   command: ./deploy.sh
//! ```

use serde_json::{Map, Value};

use crate::error::{FlowError, Result};

/// Prefix that marks a step key as metadata.
pub const METADATA_PREFIX: char = '$';

/// Metadata key holding a human-readable step title.
pub const TITLE_KEY: &str = "$title";

/// Metadata key that bypasses the per-step template pass.
pub const SKIP_TEMPLATE_PROCESSING_KEY: &str = "$skipTemplateProcessing";

/// A step split into its action key, options and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStep {
    pub id_or_alias: String,
    pub options: Value,
    pub metadata: Map<String, Value>,
}

impl ParsedStep {
    /// Split `step` into metadata and exactly one action key.
    pub fn decode(step: &Value) -> Result<Self> {
        let Value::Object(map) = step else {
            return Err(FlowError::structural(format!(
                "step must be an object, got {}",
                crate::validation::type_name(step)
            )));
        };

        let mut metadata = Map::new();
        let mut actions = Vec::new();
        for (key, value) in map {
            if key.starts_with(METADATA_PREFIX) {
                metadata.insert(key.clone(), value.clone());
            } else {
                actions.push((key, value));
            }
        }

        match actions.as_slice() {
            [(key, value)] => Ok(Self {
                id_or_alias: (*key).clone(),
                options: (*value).clone(),
                metadata,
            }),
            [] => Err(FlowError::structural("step has no action key")),
            many => Err(FlowError::structural(format!(
                "step must have exactly one action key, found {}: {}",
                many.len(),
                many.iter()
                    .map(|(k, _)| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// `$title` from rendered metadata.
pub fn title(metadata: &Map<String, Value>) -> Option<String> {
    match metadata.get(TITLE_KEY)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// `$skipTemplateProcessing` from rendered metadata.
pub fn skip_template_processing(metadata: &Map<String, Value>) -> bool {
    match metadata.get(SKIP_TEMPLATE_PROCESSING_KEY) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}
