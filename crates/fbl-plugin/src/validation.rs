//! Field checks applied to plugin manifests before anything is registered.

use std::collections::HashSet;

use crate::version::VersionRange;

/// A manifest field that cannot be accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestValidationError {
    #[error("'{field}' is required: {hint}")]
    MissingField {
        field: &'static str,
        hint: &'static str,
    },

    #[error("'{field}' {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("version '{version}' is not MAJOR.MINOR.PATCH: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("requirement '{requirement}' has an unusable range '{range}': {reason}")]
    InvalidRange {
        requirement: String,
        range: String,
        reason: String,
    },

    /// Two action handlers claim the same id or alias.
    #[error("action handler key '{key}' is declared more than once")]
    DuplicateHandler { key: String },
}

impl ManifestValidationError {
    pub fn missing_field(field: &'static str, hint: &'static str) -> Self {
        Self::MissingField { field, hint }
    }

    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            message: message.into(),
        }
    }

    /// Manifest key the error points at.
    pub fn field_name(&self) -> &str {
        match self {
            Self::MissingField { field, .. } | Self::InvalidField { field, .. } => field,
            Self::InvalidVersion { .. } => "version",
            Self::InvalidRange { .. } => "requires",
            Self::DuplicateHandler { .. } => "actionHandlers",
        }
    }
}

pub type ValidationResult<T> = std::result::Result<T, ManifestValidationError>;

/// Package names: kebab-case segments, optionally scoped as `@scope/name`.
pub fn validate_name(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ManifestValidationError::missing_field(
            "name",
            "use a kebab-case package name such as fbl-plugin-k8s",
        ));
    }

    let segments = match name.strip_prefix('@') {
        None => vec![name],
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, package)) => vec![scope, package],
            None => {
                return Err(ManifestValidationError::invalid_field(
                    "name",
                    format!("'{name}' is scoped but has no '/<package>' part"),
                ));
            }
        },
    };

    match segments.into_iter().find_map(segment_problem) {
        Some(problem) => Err(ManifestValidationError::invalid_field(
            "name",
            format!("'{name}' {problem}"),
        )),
        None => Ok(()),
    }
}

fn segment_problem(segment: &str) -> Option<&'static str> {
    let valid_chars = segment
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !segment.starts_with(|c: char| c.is_ascii_lowercase()) {
        Some("must start with a lowercase letter")
    } else if !valid_chars {
        Some("may only contain lowercase letters, digits and hyphens")
    } else if segment.ends_with('-') || segment.contains("--") {
        Some("has a trailing or doubled hyphen")
    } else {
        None
    }
}

/// Validate a semantic version string such as `1.2.3` or `1.2.3-beta.1`.
pub fn validate_version(version: &str) -> ValidationResult<()> {
    semver::Version::parse(version)
        .map(|_| ())
        .map_err(|e| ManifestValidationError::InvalidVersion {
            version: version.to_string(),
            reason: e.to_string(),
        })
}

/// Validate a requirement range.
pub fn validate_range(requirement: &str, range: &str) -> ValidationResult<()> {
    let reason = if range.trim().is_empty() {
        "empty".to_string()
    } else {
        match VersionRange::parse(range) {
            Ok(_) => return Ok(()),
            Err(e) => e.to_string(),
        }
    };
    Err(ManifestValidationError::InvalidRange {
        requirement: requirement.to_string(),
        range: range.to_string(),
        reason,
    })
}

/// Validate an action handler id or alias.
pub fn validate_handler_key(key: &str) -> ValidationResult<()> {
    if key.trim().is_empty() {
        return Err(ManifestValidationError::missing_field(
            "actionHandlers",
            "every action handler needs a non-empty id",
        ));
    }
    if key.starts_with(fbl_engine::METADATA_PREFIX) {
        return Err(ManifestValidationError::invalid_field(
            "actionHandlers",
            format!(
                "'{key}' starts with the reserved metadata prefix '{}'",
                fbl_engine::METADATA_PREFIX
            ),
        ));
    }
    if key.chars().any(char::is_whitespace) {
        return Err(ManifestValidationError::invalid_field(
            "actionHandlers",
            format!("'{key}' must not contain whitespace"),
        ));
    }
    Ok(())
}

/// Validate that no id or alias is claimed twice.
pub fn validate_unique_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> ValidationResult<()> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(ManifestValidationError::DuplicateHandler {
                key: key.to_string(),
            });
        }
    }
    Ok(())
}
