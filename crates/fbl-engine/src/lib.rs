//! Flow execution engine for fbl.
//!
//! A flow document describes a tree of steps. The engine resolves each step
//! against a registered [`ActionHandler`], renders its options from the shared
//! [`Context`], runs it and records an [`ActionSnapshot`].
//!
//! # Architecture
//!
//! ```text
//! flow text ──(global pass)──► FlowDocument ──► FlowService::execute_flow
//!                                                   │
//!                     ┌─────────────────────────────┘
//!                     ▼
//!   execute_action: decode step → render metadata → resolve handler
//!                   → check nested steps decode
//!                   → snapshot → render options (local pass)
//!                   → validate → should_execute → execute
//!                     │
//!                     └─ control-flow handlers recurse into execute_action
//! ```

pub mod context;
pub mod document;
pub mod error;
pub mod flow;
pub mod handler;
pub mod handlers;
pub mod parameters;
pub mod registry;
pub mod reporter;
pub mod service;
pub mod snapshot;
pub mod step;
pub mod template;
pub mod validation;

pub use context::{Context, ContextView, Entities, EntityRef, SharedContext, TemplateDelimiters};
pub use document::{FlowDocument, Requirements};
pub use error::{FlowError, Result};
pub use flow::{ParallelFlowHandler, SequenceFlowHandler};
pub use handler::{ActionHandler, ExecutionScope, HandlerMetadata};
pub use handlers::builtin_handlers;
pub use parameters::DelegatedParameters;
pub use registry::HandlerRegistry;
pub use reporter::{JsonReporter, Reporter, YamlReporter, builtin_reporters};
pub use service::FlowService;
pub use snapshot::{ActionSnapshot, SnapshotEntry, SnapshotStep};
pub use step::{METADATA_PREFIX, ParsedStep};
pub use template::{CoreHelpers, TemplateEngine, TemplateUtility, template_data};
pub use validation::{ValidationError, Violations};

/// Version of the running engine, checked against `requires.fbl` ranges.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
