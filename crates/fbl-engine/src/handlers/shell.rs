//! Shell script execution.
//!
//! ```yaml
//! shell:
//!   executable: /bin/bash
//!   script: |
//!     set -e
//!     echo "<% ctx.name %>"
//!   options:
//!     stdout: true
//!   pushResultTo:
//!     ctx: outputs
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use super::exec::{OutputOptions, check_common, run_process};
use super::result::ResultTarget;
use crate::context::Context;
use crate::error::Result;
use crate::handler::{ActionHandler, ExecutionScope, HandlerMetadata};
use crate::snapshot::ActionSnapshot;
use crate::validation::{ValidationError, Violations};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ShellOptions {
    executable: String,
    script: String,
    #[serde(default)]
    options: OutputOptions,
    #[serde(default)]
    assign_result_to: Option<ResultTarget>,
    #[serde(default)]
    push_result_to: Option<ResultTarget>,
}

/// Writes a script to a temporary file and runs `executable <file>`.
pub struct ShellHandler {
    metadata: HandlerMetadata,
}

impl Default for ShellHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellHandler {
    pub fn new() -> Self {
        Self {
            metadata: HandlerMetadata::new("fbl.shell")
                .with_version("1.0.0")
                .with_aliases(["shell"])
                .with_description("Execute a shell script"),
        }
    }
}

#[async_trait]
impl ActionHandler for ShellHandler {
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
        let Some(map) = violations.object("", options) else {
            return violations.finish();
        };
        violations.non_empty_string("executable", map.get("executable"));
        violations.non_empty_string("script", map.get("script"));
        check_common(map, &mut violations);
        violations.finish()?;

        serde_json::from_value::<ShellOptions>(options.clone())?;
        Ok(())
    }

    async fn execute(
        &self,
        options: &Value,
        scope: &ExecutionScope<'_>,
        snapshot: &mut ActionSnapshot,
    ) -> Result<()> {
        let opts: ShellOptions = serde_json::from_value(options.clone())?;

        let script = tempfile::Builder::new()
            .prefix("fbl-shell-")
            .tempfile()?
            .into_temp_path();
        tokio::fs::write(&script, opts.script.as_bytes()).await?;

        let mut command = Command::new(&opts.executable);
        command.arg(&*script).current_dir(snapshot.wd());

        // the script file is removed when `script` drops, after the process exits
        run_process(
            command,
            &opts.executable,
            &opts.options,
            opts.assign_result_to.as_ref(),
            opts.push_result_to.as_ref(),
            scope,
            snapshot,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    #[test]
    fn test_validation() {
        let snapshot = ActionSnapshot::new("shell", 0, "/", Map::new(), Default::default());
        let handler = ShellHandler::new();
        let ctx = Context::new();

        assert!(
            handler
                .validate(&json!({"executable": "sh", "script": "echo hi"}), &ctx, &snapshot)
                .is_ok()
        );
        let err = handler
            .validate(&json!({"executable": "", "pushResultTo": {"x": "y"}}), &ctx, &snapshot)
            .unwrap_err();
        assert_eq!(err.violations().len(), 4);
    }
}
