//! Process execution.
//!
//! ```yaml
//! exec:
//!   command: git
//!   args: [rev-parse, HEAD]
//!   options:
//!     stdout: true
//!   assignResultTo:
//!     ctx: git.head
//! ```
//!
//! The result `{code, stdout?, stderr?}` is stored before a non-zero exit
//! fails the step.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::process::Command;

use super::result::{ResultTarget, store_result};
use crate::context::Context;
use crate::error::{FlowError, Result};
use crate::handler::{ActionHandler, ExecutionScope, HandlerMetadata};
use crate::snapshot::ActionSnapshot;
use crate::validation::{ValidationError, Violations};

/// Which process streams end up in the result and the snapshot log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputOptions {
    /// Capture stdout into the result.
    #[serde(default)]
    pub stdout: bool,
    /// Capture stderr into the result.
    #[serde(default)]
    pub stderr: bool,
    /// Log both streams into the snapshot.
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ExecOptions {
    command: String,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    wd: Option<String>,
    #[serde(default)]
    options: OutputOptions,
    #[serde(default)]
    assign_result_to: Option<ResultTarget>,
    #[serde(default)]
    push_result_to: Option<ResultTarget>,
}

/// Runs an executable with arguments.
pub struct ExecHandler {
    metadata: HandlerMetadata,
}

impl Default for ExecHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecHandler {
    pub fn new() -> Self {
        Self {
            metadata: HandlerMetadata::new("fbl.exec")
                .with_version("1.0.0")
                .with_aliases(["exec"])
                .with_description("Execute a command"),
        }
    }
}

#[async_trait]
impl ActionHandler for ExecHandler {
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
        violations.non_empty_string("command", map.get("command"));
        if let Some(args) = map.get("args")
            && let Some(args) = violations.array("args", args)
        {
            for (i, arg) in args.iter().enumerate() {
                if arg.is_object() || arg.is_array() || arg.is_null() {
                    violations.push(&format!("args[{i}]"), "must be a scalar");
                }
            }
        }
        check_common(map, &mut violations);
        violations.finish()?;

        serde_json::from_value::<ExecOptions>(options.clone())?;
        Ok(())
    }

    async fn execute(
        &self,
        options: &Value,
        scope: &ExecutionScope<'_>,
        snapshot: &mut ActionSnapshot,
    ) -> Result<()> {
        let opts: ExecOptions = serde_json::from_value(options.clone())?;

        let mut command = Command::new(&opts.command);
        command.args(opts.args.iter().map(scalar_to_string));
        command.current_dir(match &opts.wd {
            Some(dir) => snapshot.wd().join(dir),
            None => snapshot.wd().to_path_buf(),
        });

        run_process(
            command,
            &opts.command,
            &opts.options,
            opts.assign_result_to.as_ref(),
            opts.push_result_to.as_ref(),
            scope,
            snapshot,
        )
        .await
    }
}

/// Checks shared by `exec` and `shell` for `options`, `assignResultTo` and `pushResultTo`.
pub(crate) fn check_common(map: &Map<String, Value>, violations: &mut Violations) {
    if let Some(output) = map.get("options")
        && let Some(output) = violations.object("options", output)
    {
        violations.unknown_keys("options", output, &["stdout", "stderr", "verbose"]);
        for (key, value) in output {
            if !value.is_boolean() {
                violations.push(&format!("options.{key}"), "must be a boolean");
            }
        }
    }
    ResultTarget::check("assignResultTo", map.get("assignResultTo"), violations);
    ResultTarget::check("pushResultTo", map.get("pushResultTo"), violations);
}

/// Run `command`, record its output and store the result.
pub(crate) async fn run_process(
    mut command: Command,
    label: &str,
    output: &OutputOptions,
    assign: Option<&ResultTarget>,
    push: Option<&ResultTarget>,
    scope: &ExecutionScope<'_>,
    snapshot: &mut ActionSnapshot,
) -> Result<()> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(command = label, "spawning process");
    let result = command
        .output()
        .await
        .map_err(|e| FlowError::execution(format!("failed to run '{label}': {e}")))?;

    let code = result.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&result.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&result.stderr).into_owned();

    if output.verbose {
        if !stdout.is_empty() {
            snapshot.log(format!("stdout:\n{stdout}"));
        }
        if !stderr.is_empty() {
            snapshot.log(format!("stderr:\n{stderr}"));
        }
    }

    let mut value = Map::new();
    value.insert("code".into(), Value::from(code));
    if output.stdout {
        value.insert("stdout".into(), Value::String(stdout));
    }
    if output.stderr {
        value.insert("stderr".into(), Value::String(stderr));
    }
    store_result(scope, snapshot, assign, push, &Value::Object(value))?;

    if code != 0 {
        return Err(FlowError::execution(format!(
            "'{label}' exited with code {code}"
        )));
    }
    snapshot.log(format!("'{label}' exited with code 0"));
    Ok(())
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
