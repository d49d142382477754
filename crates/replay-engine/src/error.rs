//! Error types for the replay engine

use thiserror::Error;

use crate::runtime::ExecutionStatus;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Malformed workflow graph, always detected before execution begins
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("Workflow has no nodes")]
    EmptyWorkflow,

    #[error("Duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("Duplicate edge id '{0}'")]
    DuplicateEdgeId(String),

    #[error("Duplicate variable '{0}'")]
    DuplicateVariable(String),

    /// An edge references a non-existent node
    #[error("Edge '{edge_id}' references unknown node '{node_id}'")]
    UnknownNode { edge_id: String, node_id: String },

    /// Every node has an incoming edge
    #[error("Workflow has no start node")]
    MissingStartNode,

    #[error("Workflow has multiple start nodes: {}", .0.join(", "))]
    MultipleStartNodes(Vec<String>),

    #[error("Invalid version '{0}': expected MAJOR.MINOR.PATCH")]
    InvalidVersion(String),

    /// Node configuration that contradicts the graph (e.g. a loop body that is not a successor)
    #[error("Invalid configuration for node '{node_id}': {message}")]
    InvalidNodeConfig { node_id: String, message: String },
}

/// Rejected control request; never affects the execution itself
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebuggerError {
    #[error("Illegal status transition from {from} to {to}")]
    IllegalTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("Unknown execution '{0}'")]
    UnknownExecution(String),

    #[error("Step index {index} out of range ({len} steps)")]
    InvalidStepIndex { index: usize, len: usize },
}

/// Expression parse or evaluation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Evaluation error: {0}")]
    Eval(String),
}

impl ExpressionError {
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self::Eval(message.into())
    }
}

/// Errors that can occur in the replay engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid workflow: {0}")]
    Structural(#[from] StructuralError),

    #[error("Debugger error: {0}")]
    Debugger(#[from] DebuggerError),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// A node handler failed
    #[error("Node '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    /// The element referenced by an action node can no longer be located reliably
    #[error("Selector resolution failed for node '{node_id}': {message}")]
    SelectorResolution { node_id: String, message: String },

    #[error("Invalid configuration for node '{node_id}': {message}")]
    InvalidConfig { node_id: String, message: String },

    #[error("Missing required variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for variable '{name}': expected {expected}")]
    InvalidVariable { name: String, expected: String },

    #[error("Node '{node_id}' timed out after {timeout_ms}ms")]
    Timeout { node_id: String, timeout_ms: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Element error: {0}")]
    Element(#[from] replay_elements::ElementError),
}

impl EngineError {
    /// Create a node execution error with a message
    pub fn node(node_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::NodeExecution {
            node_id: node_id.into(),
            message: msg.into(),
        }
    }

    /// Create a selector resolution error with a message
    pub fn selector(node_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SelectorResolution {
            node_id: node_id.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid node configuration error
    pub fn invalid_config(node_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidConfig {
            node_id: node_id.into(),
            message: msg.into(),
        }
    }
}
