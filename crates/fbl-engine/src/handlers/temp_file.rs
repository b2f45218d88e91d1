//! Write content to a temporary file and remember its path.
//!
//! ```yaml
//! tmp.->:
//!   context: files.config
//!   content: <%- json ctx.config %>
//! ```

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{Context, assign_path};
use crate::error::{FlowError, Result};
use crate::handler::{ActionHandler, ExecutionScope, HandlerMetadata};
use crate::snapshot::ActionSnapshot;
use crate::validation::{ValidationError, Violations, type_name};

/// Writes `content` to a kept temp file and stores the path at `ctx.<context>`.
pub struct WriteTempFileHandler {
    metadata: HandlerMetadata,
}

impl Default for WriteTempFileHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteTempFileHandler {
    pub fn new() -> Self {
        Self {
            metadata: HandlerMetadata::new("fbl.fs.temp.file.write")
                .with_version("1.0.0")
                .with_aliases(["fs.temp.file.write", "temp.file.write", "tmp.->"])
                .with_description("Write content to a temporary file"),
        }
    }
}

#[async_trait]
impl ActionHandler for WriteTempFileHandler {
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
        violations.unknown_keys("", map, &["context", "content"]);
        violations.non_empty_string("context", map.get("context"));
        match map.get("content") {
            Some(Value::String(_) | Value::Number(_)) => {}
            Some(other) => violations.push(
                "content",
                format!("must be a string or number, got {}", type_name(other)),
            ),
            None => violations.push("content", "is required"),
        }
        violations.finish()
    }

    async fn execute(
        &self,
        options: &Value,
        scope: &ExecutionScope<'_>,
        snapshot: &mut ActionSnapshot,
    ) -> Result<()> {
        let key = options
            .get("context")
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::execution("missing context key"))?;
        let content = match options.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let path = tempfile::Builder::new()
            .prefix("fbl-")
            .tempfile()?
            .into_temp_path()
            .keep()
            .map_err(|e| FlowError::Io(e.error))?;
        tokio::fs::write(&path, content.as_bytes()).await?;

        let view = {
            let mut ctx = scope.context.write();
            assign_path(
                &mut ctx.variables,
                key,
                Value::String(path.display().to_string()),
                false,
            )
            .map_err(FlowError::execution)?;
            ctx.view()
        };
        snapshot.log(format!("content written to {}", path.display()));
        snapshot.set_context(view);
        Ok(())
    }
}
