//! Execution record types
//!
//! These are the durable, observable artifacts of one execution. They are
//! serialized camelCase so the record can be exported as-is.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::NodeId;

/// Lifecycle status of an execution
///
/// `pending → running ⇄ paused`, `running → completed`, `running/paused → failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// Whether the status machine allows moving from `self` to `to`
    pub fn can_transition_to(self, to: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Paused, Running)
                | (Paused, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single node execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// One node execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub id: String,
    pub node_id: NodeId,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: StepStatus,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 1-based attempt number; retries of the same node increase it
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl StepRecord {
    /// A step that has been scheduled but not dispatched
    pub fn pending(node_id: impl Into<NodeId>, input: Value) -> Self {
        Self {
            id: format!("step-{}", uuid::Uuid::new_v4()),
            node_id: node_id.into(),
            started_at: Utc::now(),
            ended_at: None,
            status: StepStatus::Pending,
            input,
            output: None,
            error: None,
            attempt: 1,
        }
    }

    /// A step being dispatched now
    pub fn running(node_id: impl Into<NodeId>, input: Value, attempt: u32) -> Self {
        Self {
            status: StepStatus::Running,
            attempt,
            ..Self::pending(node_id, input)
        }
    }

    pub fn finish(&mut self, status: StepStatus, output: Value) {
        self.status = status;
        self.output = Some(output);
        self.ended_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.ended_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// Severity of a record log entry
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Matching level on the `log` facade
    pub fn to_log_level(self) -> log::Level {
        match self {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Entry in an execution's log stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub context: Value,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, context: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            context,
        }
    }
}

/// Captured artifact (e.g. a screenshot), base64-encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub data: String,
}

/// Durable record of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    /// Variable bindings as of the last snapshot
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn new(id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            started_at: None,
            ended_at: None,
            status: ExecutionStatus::Pending,
            variables: HashMap::new(),
            steps: Vec::new(),
            logs: Vec::new(),
            artifacts: Vec::new(),
            error: None,
        }
    }

    /// Steps recorded for one node, in completion order
    pub fn steps_for(&self, node_id: &str) -> Vec<&StepRecord> {
        self.steps.iter().filter(|s| s.node_id == node_id).collect()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// Export as pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Point-in-time view of a running (typically paused) execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// The step about to run, if the walk is parked before a node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<StepRecord>,
    pub steps: Vec<StepRecord>,
    pub variables: HashMap<String, Value>,
    pub logs: Vec<LogEntry>,
}

/// Replay view of a finished step: the step, its predecessors and the record state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSnapshot {
    pub step: StepRecord,
    pub previous_steps: Vec<StepRecord>,
    pub variables: HashMap<String, Value>,
    pub logs: Vec<LogEntry>,
}
