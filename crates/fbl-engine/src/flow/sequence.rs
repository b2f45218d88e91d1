use async_trait::async_trait;
use serde_json::Value;

use super::{FlowOptions, child_overrides, child_steps};
use crate::context::Context;
use crate::error::{FlowError, Result};
use crate::handler::{ActionHandler, ExecutionScope, HandlerMetadata};
use crate::snapshot::ActionSnapshot;
use crate::validation::ValidationError;

/// Runs children one after another and stops at the first failed child.
///
/// Side effects of children that already ran are kept.
pub struct SequenceFlowHandler {
    metadata: HandlerMetadata,
}

impl Default for SequenceFlowHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceFlowHandler {
    pub fn new() -> Self {
        Self {
            metadata: HandlerMetadata::new("fbl.flow.sequence")
                .with_version("1.0.0")
                .with_aliases(["flow.sequence", "sequence", "sync", "--"])
                .with_description("Run steps sequentially")
                .skip_template_processing(),
        }
    }
}

#[async_trait]
impl ActionHandler for SequenceFlowHandler {
    fn metadata(&self) -> &HandlerMetadata {
        &self.metadata
    }

    fn validate(
        &self,
        options: &Value,
        _context: &Context,
        _snapshot: &ActionSnapshot,
    ) -> std::result::Result<(), ValidationError> {
        FlowOptions::validate(options)
    }

    fn nested_steps<'a>(&'a self, options: &'a Value) -> Vec<&'a Value> {
        child_steps(options)
    }

    async fn execute(
        &self,
        options: &Value,
        scope: &ExecutionScope<'_>,
        snapshot: &mut ActionSnapshot,
    ) -> Result<()> {
        let flow = FlowOptions::parse(options)
            .ok_or_else(|| FlowError::execution("sequence options have no actions"))?;
        let wd = snapshot.wd().to_path_buf();

        for (index, step) in flow.actions.iter().enumerate() {
            let parameters = scope
                .parameters
                .derive(flow.share_parameters, child_overrides(index));
            let child = scope
                .flow
                .execute_action(&wd, step, scope.context, &parameters, index)
                .await?;

            let successful = child.successful();
            snapshot.register_child(child);
            if !successful {
                tracing::debug!(
                    index,
                    remaining = flow.actions.len() - index - 1,
                    "sequence stopped after failed step"
                );
                break;
            }
        }

        Ok(())
    }
}
