//! Workflow engine: graph walk, node dispatch and the action boundary

mod action;
mod context;
mod executor;
pub mod nodes;

pub use action::{ActionPerformer, ActionRequest, NullActionPerformer};
pub use context::{Bindings, ExecutionContext};
pub use executor::WorkflowEngine;
pub use nodes::{NodeOutcome, CONDITION_VARIABLE};
