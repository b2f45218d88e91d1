//! Requirement failures and `PATH` lookup.

use std::path::{Path, PathBuf};

/// One unsatisfied requirement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequirementFailure {
    #[error("{subject} requires fbl {range}, but the running engine is {actual}")]
    EngineIncompatible {
        subject: String,
        range: String,
        actual: String,
    },

    #[error("{subject} requires plugin '{plugin}' {range}, but version {actual} was found")]
    PluginVersionMismatch {
        subject: String,
        plugin: String,
        range: String,
        actual: String,
    },

    #[error("{subject} requires plugin '{plugin}', which is unavailable: {reason}")]
    PluginUnavailable {
        subject: String,
        plugin: String,
        reason: String,
    },

    #[error("{subject} requires application '{application}', which was not found on PATH")]
    ApplicationMissing {
        subject: String,
        application: String,
    },

    #[error("{subject} declares an invalid version range '{range}': {reason}")]
    InvalidRange {
        subject: String,
        range: String,
        reason: String,
    },
}

impl RequirementFailure {
    /// The plugin or flow that declared the requirement.
    pub fn subject(&self) -> &str {
        match self {
            Self::EngineIncompatible { subject, .. }
            | Self::PluginVersionMismatch { subject, .. }
            | Self::PluginUnavailable { subject, .. }
            | Self::ApplicationMissing { subject, .. }
            | Self::InvalidRange { subject, .. } => subject,
        }
    }

    /// Version range not satisfied, as opposed to something not being found.
    pub fn is_compatibility(&self) -> bool {
        matches!(
            self,
            Self::EngineIncompatible { .. }
                | Self::PluginVersionMismatch { .. }
                | Self::InvalidRange { .. }
        )
    }
}

/// Every failure found while validating one set of requirements.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("requirements not satisfied:\n{}", render(.failures))]
pub struct RequirementErrors {
    failures: Vec<RequirementFailure>,
}

impl RequirementErrors {
    pub fn new(failures: Vec<RequirementFailure>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &[RequirementFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<RequirementFailure> {
        self.failures
    }
}

fn render(failures: &[RequirementFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  - {f}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Resolve an executable name against `PATH`.
///
/// Names containing a path separator are checked as paths instead.
pub fn find_on_path(application: &str) -> Option<PathBuf> {
    let candidate = Path::new(application);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        executable_names(application)
            .into_iter()
            .map(|name| dir.join(name))
            .find(|full| is_executable(full))
    })
}

#[cfg(windows)]
fn executable_names(application: &str) -> Vec<String> {
    let mut names = vec![application.to_string()];
    if Path::new(application).extension().is_none() {
        let exts = std::env::var("PATHEXT").unwrap_or_else(|_| ".EXE;.CMD;.BAT".to_string());
        names.extend(exts.split(';').map(|ext| format!("{application}{ext}")));
    }
    names
}

#[cfg(not(windows))]
fn executable_names(application: &str) -> Vec<String> {
    vec![application.to_string()]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
