//! Option validation for action handlers.
//!
//! Handlers collect every problem they find in an options object into a
//! [`Violations`] list and turn it into one [`ValidationError`] at the end, so
//! a single validation pass reports all violations at once.

use serde_json::{Map, Value};

/// Aggregated option violations for a single step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", .violations.join("\n"))]
pub struct ValidationError {
    violations: Vec<String>,
}

impl ValidationError {
    /// Create an error with a single violation.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            violations: vec![message.into()],
        }
    }

    /// All violations, in the order they were found.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Collector used while walking an options value.
#[derive(Debug, Default)]
pub struct Violations {
    items: Vec<String>,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation at `path` (use `""` for the options root).
    pub fn push(&mut self, path: &str, message: impl std::fmt::Display) {
        if path.is_empty() {
            self.items.push(format!("options {message}"));
        } else {
            self.items.push(format!("\"{path}\" {message}"));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Expect an object at `path`; records a violation otherwise.
    pub fn object<'a>(&mut self, path: &str, value: &'a Value) -> Option<&'a Map<String, Value>> {
        match value {
            Value::Object(map) => Some(map),
            other => {
                self.push(path, format!("must be an object, got {}", type_name(other)));
                None
            }
        }
    }

    /// Expect a non-empty object at `path`.
    pub fn non_empty_object<'a>(
        &mut self,
        path: &str,
        value: &'a Value,
    ) -> Option<&'a Map<String, Value>> {
        let map = self.object(path, value)?;
        if map.is_empty() {
            self.push(path, "must not be empty");
            return None;
        }
        Some(map)
    }

    /// Expect an array at `path`.
    pub fn array<'a>(&mut self, path: &str, value: &'a Value) -> Option<&'a Vec<Value>> {
        match value {
            Value::Array(items) => Some(items),
            other => {
                self.push(path, format!("must be an array, got {}", type_name(other)));
                None
            }
        }
    }

    /// Expect a non-empty string at `path`.
    pub fn non_empty_string<'a>(&mut self, path: &str, value: Option<&'a Value>) -> Option<&'a str> {
        match value {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
            Some(Value::String(_)) => {
                self.push(path, "must not be empty");
                None
            }
            Some(other) => {
                self.push(path, format!("must be a string, got {}", type_name(other)));
                None
            }
            None => {
                self.push(path, "is required");
                None
            }
        }
    }

    /// Record a violation for every key of `map` not listed in `allowed`.
    pub fn unknown_keys(&mut self, path: &str, map: &Map<String, Value>, allowed: &[&str]) {
        for key in map.keys() {
            if !allowed.contains(&key.as_str()) {
                self.push(&join_path(path, key), "is not allowed");
            }
        }
    }

    /// Finish collection.
    pub fn finish(self) -> Result<(), ValidationError> {
        if self.items.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                violations: self.items,
            })
        }
    }
}

/// Join a parent path and a child key with a dot.
pub fn join_path(parent: &str, key: impl std::fmt::Display) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Short JSON type name for messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
