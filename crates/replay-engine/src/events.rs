//! Event types for observing executions
//!
//! The runtime emits one typed event stream per execution. Sinks must never
//! block: the runtime sends and moves on, and a failed send is only logged.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::runtime::{LogEntry, StepRecord};

/// Destination for an execution's lifecycle, step and log events
///
/// Called from the engine task and from control requests alike, so
/// implementations must be cheap and must not await.
pub trait EventSink: Send + Sync {
    fn send(&self, event: ExecutionEvent) -> Result<(), EventError>;
}

/// Delivery failure for one event; the execution itself is unaffected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// The observer went away (console closed, receiver dropped)
    #[error("Event observer disconnected")]
    ChannelClosed,
}

impl EventError {
    pub fn channel_closed() -> Self {
        EventError::ChannelClosed
    }
}

/// Lifecycle events emitted by an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExecutionEvent {
    #[serde(rename_all = "camelCase")]
    ExecutionStarted {
        execution_id: String,
        workflow_id: String,
    },

    /// Paused by request or breakpoint; `node_id` is the node about to run
    #[serde(rename_all = "camelCase")]
    ExecutionPaused {
        execution_id: String,
        node_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    ExecutionResumed { execution_id: String },

    #[serde(rename_all = "camelCase")]
    ExecutionCompleted {
        execution_id: String,
        workflow_id: String,
    },

    #[serde(rename_all = "camelCase")]
    ExecutionFailed {
        execution_id: String,
        workflow_id: String,
        error: String,
    },

    /// Stopped by the user
    #[serde(rename_all = "camelCase")]
    ExecutionStopped {
        execution_id: String,
        reason: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    StepStarted {
        execution_id: String,
        node_id: String,
        attempt: u32,
    },

    /// A step attempt finished (completed, failed or skipped)
    #[serde(rename_all = "camelCase")]
    StepCompleted {
        execution_id: String,
        step: StepRecord,
    },

    #[serde(rename_all = "camelCase")]
    LogEntry {
        execution_id: String,
        entry: LogEntry,
    },
}

impl ExecutionEvent {
    /// Execution this event belongs to
    pub fn execution_id(&self) -> &str {
        match self {
            Self::ExecutionStarted { execution_id, .. }
            | Self::ExecutionPaused { execution_id, .. }
            | Self::ExecutionResumed { execution_id }
            | Self::ExecutionCompleted { execution_id, .. }
            | Self::ExecutionFailed { execution_id, .. }
            | Self::ExecutionStopped { execution_id, .. }
            | Self::StepStarted { execution_id, .. }
            | Self::StepCompleted { execution_id, .. }
            | Self::LogEntry { execution_id, .. } => execution_id,
        }
    }

    /// Short event name as used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExecutionStarted { .. } => "executionStarted",
            Self::ExecutionPaused { .. } => "executionPaused",
            Self::ExecutionResumed { .. } => "executionResumed",
            Self::ExecutionCompleted { .. } => "executionCompleted",
            Self::ExecutionFailed { .. } => "executionFailed",
            Self::ExecutionStopped { .. } => "executionStopped",
            Self::StepStarted { .. } => "stepStarted",
            Self::StepCompleted { .. } => "stepCompleted",
            Self::LogEntry { .. } => "logEntry",
        }
    }
}

/// Discards events; the default for executions nobody observes
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: ExecutionEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// Keeps every event in memory, in emission order
///
/// Handy for audit export of short runs and for asserting event order.
#[derive(Default)]
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<ExecutionEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    /// Names of all collected events, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(ExecutionEvent::name).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: ExecutionEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Event sink backed by an unbounded channel
///
/// Sends never block; a dropped receiver surfaces as `channel_closed`.
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: ExecutionEvent) -> Result<(), EventError> {
        self.tx.send(event).map_err(|_| EventError::channel_closed())
    }
}
