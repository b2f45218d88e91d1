//! Context and secret assignment.
//!
//! ```yaml
//! ctx:
//!   '.':
//!     inline:
//!       region: eu
//!   service:
//!     files: [service.yml, overrides.yml]
//!     inline:
//!       replicas: 2
//!     priority: files
//! ```
//!
//! Each key names a target path; `.` merges into the root, any other key
//! replaces the value at that path. File contents are merged in order and
//! combined with `inline`; by default `inline` wins.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::{Context, assign_path, deep_merge};
use crate::error::{FlowError, Result};
use crate::handler::{ActionHandler, ExecutionScope, HandlerMetadata};
use crate::snapshot::ActionSnapshot;
use crate::validation::{ValidationError, Violations};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Variables,
    Secrets,
}

/// Assigns values into `ctx` or `secrets`.
pub struct AssignValuesHandler {
    metadata: HandlerMetadata,
    target: Target,
}

impl AssignValuesHandler {
    /// `fbl.context.values`
    pub fn context() -> Self {
        Self {
            metadata: HandlerMetadata::new("fbl.context.values")
                .with_version("1.0.0")
                .with_aliases(["context.values", "context", "ctx"])
                .with_description("Assign context values"),
            target: Target::Variables,
        }
    }

    /// `fbl.secret.values`
    pub fn secrets() -> Self {
        Self {
            metadata: HandlerMetadata::new("fbl.secret.values")
                .with_version("1.0.0")
                .with_aliases(["secret.values", "secrets", "secret"])
                .with_description("Assign secret values")
                .mask_options(),
            target: Target::Secrets,
        }
    }
}

#[async_trait]
impl ActionHandler for AssignValuesHandler {
    fn metadata(&self) -> &HandlerMetadata {
        &self.metadata
    }

    fn validate(
        &self,
        options: &Value,
        _context: &Context,
        _snapshot: &ActionSnapshot,
    ) -> std::result::Result<(), ValidationError> {
        let mut violations = Violations::new();
        let Some(entries) = violations.non_empty_object("", options) else {
            return violations.finish();
        };

        for (key, entry) in entries {
            let Some(entry) = violations.object(key, entry) else {
                continue;
            };
            violations.unknown_keys(key, entry, &["inline", "files", "priority"]);
            if !entry.contains_key("inline") && !entry.contains_key("files") {
                violations.push(key, "must have \"inline\" or \"files\"");
            }
            if let Some(files) = entry.get("files")
                && let Some(files) = violations.array(&format!("{key}.files"), files)
            {
                for (i, file) in files.iter().enumerate() {
                    violations.non_empty_string(&format!("{key}.files[{i}]"), Some(file));
                }
            }
            match entry.get("priority") {
                None => {}
                Some(Value::String(p)) if p == "inline" || p == "files" => {}
                Some(_) => violations.push(
                    &format!("{key}.priority"),
                    "must be \"inline\" or \"files\"",
                ),
            }
        }
        violations.finish()
    }

    async fn execute(
        &self,
        options: &Value,
        scope: &ExecutionScope<'_>,
        snapshot: &mut ActionSnapshot,
    ) -> Result<()> {
        let Value::Object(entries) = options else {
            return Err(FlowError::execution("options must be an object"));
        };

        let mut resolved = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            resolved.push((key.clone(), resolve_entry(snapshot.wd(), entry).await?));
        }

        {
            let mut ctx = scope.context.write();
            let root = match self.target {
                Target::Variables => &mut ctx.variables,
                Target::Secrets => &mut ctx.secrets,
            };
            for (key, value) in resolved {
                assign(root, &key, value)?;
            }
        }

        match self.target {
            Target::Variables => {
                let view = scope.context.read().view();
                snapshot.set_context(view);
            }
            Target::Secrets => snapshot.log(format!(
                "secrets updated: {}",
                entries.keys().cloned().collect::<Vec<_>>().join(", ")
            )),
        }
        Ok(())
    }
}

/// Combine `files` and `inline` for one entry.
async fn resolve_entry(wd: &Path, entry: &Value) -> Result<Value> {
    let mut from_files: Option<Value> = None;
    if let Some(files) = entry.get("files").and_then(Value::as_array) {
        for file in files.iter().filter_map(Value::as_str) {
            let path = wd.join(file);
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                FlowError::execution(format!("cannot read '{}': {e}", path.display()))
            })?;
            let parsed: Value = serde_yaml::from_str(&content)?;
            from_files = Some(match from_files {
                Some(acc) => deep_merge(acc, parsed),
                None => parsed,
            });
        }
    }

    let inline = entry.get("inline").cloned();
    let files_first = entry.get("priority").and_then(Value::as_str) != Some("files");

    Ok(match (inline, from_files) {
        (Some(inline), Some(files)) if files_first => deep_merge(files, inline),
        (Some(inline), Some(files)) => deep_merge(inline, files),
        (Some(inline), None) => inline,
        (None, Some(files)) => files,
        (None, None) => Value::Null,
    })
}

fn assign(root: &mut Map<String, Value>, key: &str, value: Value) -> Result<()> {
    if key == "." || key == "$" || key == "$." {
        return assign_path(root, ".", deep_merge(Value::Object(root.clone()), value), false)
            .map_err(|e| FlowError::execution(format!("cannot assign to root: {e}")));
    }
    assign_path(root, key, value, false)
        .map_err(|e| FlowError::execution(format!("cannot assign '{key}': {e}")))
}
