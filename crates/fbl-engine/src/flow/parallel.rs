use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;

use super::{FlowOptions, child_overrides, child_steps};
use crate::context::Context;
use crate::error::{FlowError, Result};
use crate::handler::{ActionHandler, ExecutionScope, HandlerMetadata};
use crate::snapshot::ActionSnapshot;
use crate::validation::ValidationError;

/// Runs all children concurrently and waits for every one of them.
///
/// There is no short-circuit: a failing child does not stop its siblings.
/// Child snapshots are registered in start (document) order, not completion
/// order. With `shareParameters: true` all children write the same parameter
/// bag concurrently and the injected `index` is overwritten by each child as
/// it is dispatched; the last writer wins. Children also share the context
/// without coordination.
pub struct ParallelFlowHandler {
    metadata: HandlerMetadata,
}

impl Default for ParallelFlowHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelFlowHandler {
    pub fn new() -> Self {
        Self {
            metadata: HandlerMetadata::new("fbl.flow.parallel")
                .with_version("1.0.0")
                .with_aliases(["flow.parallel", "parallel", "async", "||"])
                .with_description("Run steps concurrently")
                .skip_template_processing(),
        }
    }
}

#[async_trait]
impl ActionHandler for ParallelFlowHandler {
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
            .ok_or_else(|| FlowError::execution("parallel options have no actions"))?;
        let wd = snapshot.wd().to_path_buf();

        let runs = flow.actions.iter().enumerate().map(|(index, step)| {
            let parameters = scope
                .parameters
                .derive(flow.share_parameters, child_overrides(index));
            let wd = &wd;
            async move {
                scope
                    .flow
                    .execute_action(wd, step, scope.context, &parameters, index)
                    .await
            }
        });
        let results = join_all(runs).await;

        let mut errors = Vec::new();
        let mut structural = None;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(child) => snapshot.register_child(child),
                Err(e) if e.is_structural() => {
                    structural.get_or_insert(e);
                }
                Err(e) => errors.push(format!("step {index}: {e}")),
            }
        }

        if let Some(e) = structural {
            Err(e)
        } else if errors.is_empty() {
            Ok(())
        } else {
            Err(FlowError::execution(errors.join("\n")))
        }
    }
}
