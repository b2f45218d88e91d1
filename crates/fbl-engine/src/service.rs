//! Flow execution engine.
//!
//! [`FlowService`] is the explicit engine context for a run: it owns the
//! handler registry and the template engine and is passed by reference to
//! every handler through [`ExecutionScope`].

use std::path::Path;

use serde_json::{Map, Value};

use crate::context::{Context, SharedContext};
use crate::document::FlowDocument;
use crate::error::{FlowError, Result};
use crate::handler::ExecutionScope;
use crate::parameters::DelegatedParameters;
use crate::registry::HandlerRegistry;
use crate::snapshot::ActionSnapshot;
use crate::step::{self, ParsedStep};
use crate::template::{TemplateEngine, template_data};

/// Resolves and executes steps.
#[derive(Debug, Clone, Default)]
pub struct FlowService {
    registry: HandlerRegistry,
    templates: TemplateEngine,
}

impl FlowService {
    pub fn new(registry: HandlerRegistry, templates: TemplateEngine) -> Self {
        Self {
            registry,
            templates,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn templates(&self) -> &TemplateEngine {
        &self.templates
    }

    /// Check that `step` and every step nested below it decode.
    ///
    /// Unknown handlers are not an error here; their children cannot be
    /// known and the lookup failure is reported when the step runs.
    pub fn check_structure(&self, step: &Value) -> Result<()> {
        let parsed = ParsedStep::decode(step)?;
        if let Some(handler) = self.registry.resolve(&parsed.id_or_alias) {
            for child in handler.nested_steps(&parsed.options) {
                self.check_structure(child)?;
            }
        }
        Ok(())
    }

    /// Execute one step and return its snapshot.
    ///
    /// Returns `Err` for problems found before a snapshot exists: a malformed
    /// step anywhere in the subtree, a metadata template error or an unknown
    /// handler. A structural error raised while a child runs is passed up
    /// as well, so a malformed step aborts the whole run. Everything else
    /// (option rendering, validation, `should_execute`, `execute`) is
    /// recorded in the returned snapshot. The caller registers the snapshot
    /// with its parent.
    pub async fn execute_action(
        &self,
        wd: &Path,
        step: &Value,
        context: &SharedContext,
        parameters: &DelegatedParameters,
        idx: usize,
    ) -> Result<ActionSnapshot> {
        let parsed = ParsedStep::decode(step)?;

        let metadata = {
            let ctx = context.read();
            let rendered = self.render_local(wd, &Value::Object(parsed.metadata), &ctx, parameters)?;
            match rendered {
                Value::Object(map) => map,
                _ => Map::new(),
            }
        };

        let handler = self
            .registry
            .resolve(&parsed.id_or_alias)
            .ok_or_else(|| FlowError::HandlerNotFound(parsed.id_or_alias.clone()))?;
        let handler_id = handler.metadata().id.clone();
        for child in handler.nested_steps(&parsed.options) {
            self.check_structure(child)?;
        }

        let skip_templates = handler.metadata().skip_template_processing
            || step::skip_template_processing(&metadata);
        let mask_options = handler.metadata().mask_options;

        let view = context.read().view();
        let mut snapshot = ActionSnapshot::new(&parsed.id_or_alias, idx, wd, metadata, view);
        tracing::debug!(id = %handler_id, alias = %parsed.id_or_alias, idx, "executing action");

        let prepared = {
            let ctx = context.read();
            let options = if skip_templates {
                Ok(parsed.options)
            } else {
                self.render_local(wd, &parsed.options, &ctx, parameters)
            };
            options.and_then(|options| {
                if mask_options {
                    snapshot.set_masked_options();
                } else {
                    snapshot.set_options(&options, &ctx.secrets);
                }
                handler
                    .validate(&options, &ctx, &snapshot)
                    .map(|()| options)
                    .map_err(|source| FlowError::Validation {
                        id: handler_id.clone(),
                        source,
                    })
            })
        };

        let options = match prepared {
            Ok(options) => options,
            Err(e) => return Ok(Self::failed(snapshot, e)),
        };

        match handler.should_execute(&options, context, &snapshot).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(id = %handler_id, "action skipped");
                snapshot.skip();
                snapshot.finish();
                return Ok(snapshot);
            }
            Err(e) => return Ok(Self::failed(snapshot, e)),
        }

        let scope = ExecutionScope {
            flow: self,
            context,
            parameters,
        };
        match handler.execute(&options, &scope, &mut snapshot).await {
            Ok(()) => {}
            Err(e) if e.is_structural() => return Err(e),
            Err(e) => return Ok(Self::failed(snapshot, e)),
        }

        snapshot.finish();
        if snapshot.successful() {
            tracing::debug!(id = %handler_id, duration_ms = ?snapshot.duration_ms(), "action finished");
        } else {
            tracing::warn!(id = %handler_id, "action finished unsuccessfully");
        }
        Ok(snapshot)
    }

    /// Render a value with the local delimiter against live state.
    pub fn resolve_options(
        &self,
        wd: &Path,
        options: &Value,
        context: &SharedContext,
        parameters: &DelegatedParameters,
    ) -> Result<Value> {
        let ctx = context.read();
        self.render_local(wd, options, &ctx, parameters)
    }

    /// Run the global pass over raw document text and parse the result.
    pub fn render_document(
        &self,
        wd: &Path,
        text: &str,
        context: &SharedContext,
        parameters: &DelegatedParameters,
    ) -> Result<FlowDocument> {
        let rendered = {
            let ctx = context.read();
            let data = template_data(&ctx, &parameters.snapshot(), wd);
            self.templates
                .render_text(text, ctx.template_delimiters.global, &data)?
        };
        FlowDocument::parse(&rendered)
    }

    /// Execute a document's pipeline root.
    pub async fn execute_flow(
        &self,
        wd: &Path,
        document: &FlowDocument,
        context: &SharedContext,
        parameters: &DelegatedParameters,
    ) -> Result<ActionSnapshot> {
        tracing::info!(
            wd = %wd.display(),
            description = document.description.as_deref().unwrap_or(""),
            "executing flow"
        );
        let snapshot = self
            .execute_action(wd, &document.pipeline, context, parameters, 0)
            .await?;
        if !snapshot.successful() {
            tracing::warn!(id = snapshot.id_or_alias(), "flow failed");
        }
        Ok(snapshot)
    }

    fn render_local(
        &self,
        wd: &Path,
        value: &Value,
        ctx: &Context,
        parameters: &DelegatedParameters,
    ) -> Result<Value> {
        let data = template_data(ctx, &parameters.snapshot(), wd);
        self.templates
            .render_value(value, ctx.template_delimiters.local, &data)
    }

    fn failed(mut snapshot: ActionSnapshot, error: FlowError) -> ActionSnapshot {
        tracing::warn!(id = snapshot.id_or_alias(), error = %error, "action failed");
        snapshot.fail(&error);
        snapshot.finish();
        snapshot
    }
}
