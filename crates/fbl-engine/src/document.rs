//! Flow document model.
//!
//! ```yaml
//! version: 1.0.0
//! description: Deploy the api service
//! requires:
//!   fbl: ">=1.0.0 <2.0.0"
//!   plugins:
//!     fbl-plugin-k8s: ^1.2.0
//!   applications:
//!     - kubectl
//! pipeline:
//!   '--':
//!     - ctx:
//!         '.':
//!           inline:
//!             replicas: 2
//!     - exec:
//!         command: kubectl
//!         args: [apply, -f, deploy.yml]
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowError, Result};
use crate::step::ParsedStep;
use crate::validation::{ValidationError, Violations, join_path};

/// Requirements declared by a flow or a plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    /// Engine version range.
    #[serde(default, alias = "engineVersion", skip_serializing_if = "Option::is_none")]
    pub fbl: Option<String>,
    /// Plugin name → version range.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, String>,
    /// Executables that must be on `PATH`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<String>,
}

impl Requirements {
    pub fn is_empty(&self) -> bool {
        self.fbl.is_none() && self.plugins.is_empty() && self.applications.is_empty()
    }

    /// Structural checks; range syntax is checked by the resolver.
    pub fn check(&self, path: &str, violations: &mut Violations) {
        if let Some(range) = &self.fbl
            && range.trim().is_empty()
        {
            violations.push(&join_path(path, "fbl"), "must not be empty");
        }
        for (name, range) in &self.plugins {
            let plugin_path = join_path(&join_path(path, "plugins"), name);
            if !is_valid_package_name(name) {
                violations.push(&plugin_path, "is not a valid plugin name");
            }
            if range.trim().is_empty() {
                violations.push(&plugin_path, "version range must not be empty");
            }
        }
        for (i, app) in self.applications.iter().enumerate() {
            if app.trim().is_empty() {
                violations.push(
                    &format!("{}[{i}]", join_path(path, "applications")),
                    "must not be empty",
                );
            }
        }
    }
}

/// A parsed flow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub requires: Requirements,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub pipeline: Value,
}

impl FlowDocument {
    /// Wrap a single step into a document.
    pub fn from_pipeline(pipeline: Value) -> Self {
        Self {
            version: None,
            requires: Requirements::default(),
            description: None,
            pipeline,
        }
    }

    /// Parse YAML (or JSON) text and validate its structure.
    pub fn parse(text: &str) -> Result<Self> {
        let document: FlowDocument = serde_yaml::from_str(text)?;
        document
            .validate()
            .map_err(|e| FlowError::structural(format!("invalid flow document:\n{e}")))?;
        Ok(document)
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let mut violations = Violations::new();

        if let Some(version) = &self.version
            && !is_dotted_numeric(version)
        {
            violations.push("version", "must look like 1.0.0");
        }

        self.requires.check("requires", &mut violations);

        if self.pipeline.is_null() {
            violations.push("pipeline", "is required");
        } else if let Err(e) = ParsedStep::decode(&self.pipeline) {
            violations.push("pipeline", e);
        }

        violations.finish()
    }
}

fn is_dotted_numeric(version: &str) -> bool {
    !version.is_empty()
        && version
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

/// npm-style package name: `name` or `@scope/name`, lowercase, URL-safe.
pub fn is_valid_package_name(name: &str) -> bool {
    fn valid_part(part: &str) -> bool {
        !part.is_empty()
            && !part.starts_with('.')
            && !part.starts_with('_')
            && part.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_' | '~')
            })
    }

    if name.len() > 214 {
        return false;
    }
    match name.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, package)) => valid_part(scope) && valid_part(package),
            None => false,
        },
        None => valid_part(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_document() {
        let doc = FlowDocument::parse(
            r#"
version: 1.0.0
description: test
requires:
  engineVersion: ">=1.0.0"
  plugins:
    "@fbl/k8s": ^1.0.0
  applications: [sh]
pipeline:
  ctx:
    a:
      inline: 1
"#,
        )
        .unwrap();
        assert_eq!(doc.requires.fbl.as_deref(), Some(">=1.0.0"));
        assert_eq!(doc.requires.plugins["@fbl/k8s"], "^1.0.0");
        assert_eq!(doc.pipeline, json!({"ctx": {"a": {"inline": 1}}}));
    }

    #[test]
    fn test_missing_pipeline_is_structural() {
        let err = FlowDocument::parse("version: 1.0.0\n").unwrap_err();
        assert!(err.is_structural());
        assert!(err.to_string().contains("pipeline"));
    }

    #[test]
    fn test_invalid_pipeline_step() {
        let err = FlowDocument::parse("pipeline:\n  a: 1\n  b: 2\n").unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn test_validation_aggregates() {
        let doc = FlowDocument {
            version: Some("1.x".into()),
            requires: Requirements {
                fbl: Some(" ".into()),
                plugins: BTreeMap::from([("Bad Name".to_string(), "".to_string())]),
                applications: vec!["".into()],
            },
            description: None,
            pipeline: json!({"ctx": {}}),
        };
        let err = doc.validate().unwrap_err();
        assert_eq!(err.violations().len(), 5);
    }

    #[test]
    fn test_package_names() {
        assert!(is_valid_package_name("fbl-plugin-k8s"));
        assert!(is_valid_package_name("@scope/pkg.name"));
        assert!(!is_valid_package_name("Upper"));
        assert!(!is_valid_package_name("@scope"));
        assert!(!is_valid_package_name(".hidden"));
        assert!(!is_valid_package_name(""));
    }
}
