//! Replay Engine - supervised execution of recorded desktop-automation workflows
//!
//! This crate turns a declarative workflow graph into an observable,
//! pausable execution. It provides:
//!
//! - A validated workflow model with a fluent builder and versioned revisions
//! - A graph walker with action, condition, loop, parallel, wait and script nodes
//! - Guarded edges evaluated by a pluggable expression evaluator
//! - Per-node error policies (stop, continue, retry)
//! - An execution runtime with a strict status machine and typed events
//! - Breakpoints, live snapshots and step replay
//!
//! # Architecture
//!
//! - `WorkflowEngine`: walks the graph and dispatches nodes
//! - `ExecutionRuntime`: owns one execution's record, status and events
//! - `Debugger`: breakpoints consulted before every dispatch
//! - `ExecutionManager`: spawns executions and routes control requests
//!
//! Elements referenced by action nodes are resolved through
//! [`replay_elements::ElementRegistry`].
//!
//! # Example
//!
//! ```ignore
//! use replay_engine::{ExecutionManager, WorkflowBuilder, WorkflowEngine, NodeType};
//!
//! let workflow = WorkflowBuilder::new("login", "Log in")
//!     .add_node("user", NodeType::Action)
//!     .with_config(json!({"action": "type", "element": "username", "params": {"text": "ada"}}))
//!     .add_node("submit", NodeType::Action)
//!     .with_config(json!({"action": "click", "element": "submit"}))
//!     .connect("user", "submit")
//!     .build()?;
//!
//! let manager = ExecutionManager::new(Arc::new(WorkflowEngine::new(performer)), config);
//! let id = manager.execute(Arc::new(workflow), HashMap::new()).await;
//! let record = manager.wait(&id).await?;
//! ```

pub mod config;
pub mod debugger;
pub mod engine;
pub mod error;
pub mod events;
pub mod expression;
pub mod manager;
pub mod runtime;
pub mod workflow;

// Re-export key types
pub use config::EngineConfig;
pub use debugger::{DebugBreakpoint, Debugger};
pub use engine::{
    ActionPerformer, ActionRequest, ExecutionContext, NullActionPerformer, WorkflowEngine,
};
pub use error::{DebuggerError, EngineError, ExpressionError, Result, StructuralError};
pub use events::{ChannelEventSink, EventSink, ExecutionEvent, NullEventSink, VecEventSink};
pub use expression::{DefaultEvaluator, ExpressionEvaluator};
pub use manager::ExecutionManager;
pub use runtime::{
    ExecutionRecord, ExecutionRuntime, ExecutionSnapshot, ExecutionStatus, LogEntry, LogLevel,
    StepRecord, StepSnapshot, StepStatus,
};
pub use workflow::{
    ErrorPolicy, NodeType, Variable, VariableType, Workflow, WorkflowBuilder, WorkflowEdge,
    WorkflowNode,
};

// Re-export the element layer so consumers need a single dependency
pub use replay_elements;
