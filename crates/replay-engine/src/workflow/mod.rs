//! Workflow model
//!
//! Nodes, guarded edges and variable declarations, plus the builder and
//! structural validation that guarantee every [`Workflow`] is well formed.

mod builder;
mod types;
pub mod validation;

pub use builder::{WorkflowBuilder, INITIAL_VERSION};
pub use types::{
    EdgeId, ErrorPolicy, NodeId, NodeType, Position, Variable, VariableType, Workflow,
    WorkflowDocument, WorkflowEdge, WorkflowMetadata, WorkflowNode,
};
