//! Error types for the flow engine.

use thiserror::Error;

use crate::validation::ValidationError;

/// Result type for flow operations.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors that can occur while decoding, rendering or executing a flow.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Malformed step or document shape. Always fatal for the run.
    #[error("Invalid step: {0}")]
    Structural(String),

    /// Handler-declared option violations for one step.
    #[error("Validation failed for '{id}':\n{source}")]
    Validation {
        id: String,
        #[source]
        source: ValidationError,
    },

    /// No handler is registered under the requested id or alias.
    #[error("Handler not found: {0}")]
    HandlerNotFound(String),

    /// A template expression could not be parsed or rendered.
    #[error("Template error in '{expression}': {message}")]
    Template { expression: String, message: String },

    /// A handler failed while executing.
    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn template(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a structural problem that must abort the whole run.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Structural(_))
    }
}
