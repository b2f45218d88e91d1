//! Built-in action handlers.

mod entities;
mod exec;
mod result;
mod shell;
mod temp_file;
mod values;

use std::sync::Arc;

pub use entities::EntitiesHandler;
pub use exec::{ExecHandler, OutputOptions};
pub use result::ResultTarget;
pub use shell::ShellHandler;
pub use temp_file::WriteTempFileHandler;
pub use values::AssignValuesHandler;

use crate::flow::{ParallelFlowHandler, SequenceFlowHandler};
use crate::handler::ActionHandler;

/// Every handler shipped with the engine.
pub fn builtin_handlers() -> Vec<Arc<dyn ActionHandler>> {
    vec![
        Arc::new(SequenceFlowHandler::new()),
        Arc::new(ParallelFlowHandler::new()),
        Arc::new(AssignValuesHandler::context()),
        Arc::new(AssignValuesHandler::secrets()),
        Arc::new(EntitiesHandler::registered()),
        Arc::new(EntitiesHandler::updated()),
        Arc::new(EntitiesHandler::unregistered()),
        Arc::new(EntitiesHandler::deleted()),
        Arc::new(ExecHandler::new()),
        Arc::new(ShellHandler::new()),
        Arc::new(WriteTempFileHandler::new()),
    ]
}
