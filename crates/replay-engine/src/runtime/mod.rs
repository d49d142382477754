//! Execution runtime
//!
//! Status machine, step/log recording and lifecycle events for one execution.

mod execution;
mod types;

pub use execution::{ExecutionRuntime, STOPPED_BY_USER};
pub use types::{
    Artifact, ExecutionRecord, ExecutionSnapshot, ExecutionStatus, LogEntry, LogLevel,
    StepRecord, StepSnapshot, StepStatus,
};
