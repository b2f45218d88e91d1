//! Action handler contract.
//!
//! Every step type is implemented by an [`ActionHandler`]. Leaf handlers do
//! real work; control-flow handlers call back into the [`FlowService`] through
//! the [`ExecutionScope`] to run nested steps.
//!
//! # Example
//!
//! ```rust,ignore
//! struct Echo {
//!     metadata: HandlerMetadata,
//! }
//!
//! #[async_trait]
//! impl ActionHandler for Echo {
//!     fn metadata(&self) -> &HandlerMetadata { &self.metadata }
//!
//!     fn validate(&self, options: &Value, _: &Context, _: &ActionSnapshot)
//!         -> std::result::Result<(), ValidationError> { Ok(()) }
//!
//!     async fn execute(&self, options: &Value, _: &ExecutionScope<'_>, snapshot: &mut ActionSnapshot)
//!         -> Result<()> {
//!         snapshot.log(options.to_string());
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{Context, SharedContext};
use crate::error::Result;
use crate::parameters::DelegatedParameters;
use crate::service::FlowService;
use crate::snapshot::ActionSnapshot;
use crate::validation::ValidationError;

/// Identity and static behaviour flags of a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerMetadata {
    pub id: String,
    pub version: Option<String>,
    pub aliases: Vec<String>,
    pub description: Option<String>,
    /// Hand options to the handler without the per-step template pass.
    pub skip_template_processing: bool,
    /// Record options in snapshots as a masked placeholder.
    pub mask_options: bool,
}

impl HandlerMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
            aliases: Vec::new(),
            description: None,
            skip_template_processing: false,
            mask_options: false,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn skip_template_processing(mut self) -> Self {
        self.skip_template_processing = true;
        self
    }

    pub fn mask_options(mut self) -> Self {
        self.mask_options = true;
        self
    }

    /// Id followed by every alias.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// What a handler can reach while executing.
pub struct ExecutionScope<'a> {
    /// Engine used to run nested steps.
    pub flow: &'a FlowService,
    pub context: &'a SharedContext,
    pub parameters: &'a DelegatedParameters,
}

/// A pluggable step implementation.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn metadata(&self) -> &HandlerMetadata;

    /// Check the (rendered) options. Must not mutate any state, so repeated
    /// calls on the same input report the same violations.
    fn validate(
        &self,
        options: &Value,
        context: &Context,
        snapshot: &ActionSnapshot,
    ) -> std::result::Result<(), ValidationError>;

    /// Steps this handler will run as children, checked for structure
    /// before the parent executes.
    fn nested_steps<'a>(&'a self, _options: &'a Value) -> Vec<&'a Value> {
        Vec::new()
    }

    /// Return false to skip `execute` for this step.
    async fn should_execute(
        &self,
        _options: &Value,
        _context: &SharedContext,
        _snapshot: &ActionSnapshot,
    ) -> Result<bool> {
        Ok(true)
    }

    async fn execute(
        &self,
        options: &Value,
        scope: &ExecutionScope<'_>,
        snapshot: &mut ActionSnapshot,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_builder() {
        let meta = HandlerMetadata::new("fbl.flow.sequence")
            .with_version("1.0.0")
            .with_aliases(["sequence", "--"])
            .skip_template_processing();
        assert_eq!(
            meta.keys().collect::<Vec<_>>(),
            vec!["fbl.flow.sequence", "sequence", "--"]
        );
        assert!(meta.skip_template_processing);
        assert_eq!(meta.version.as_deref(), Some("1.0.0"));
    }
}
