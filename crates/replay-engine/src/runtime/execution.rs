//! Execution runtime
//!
//! Owns the lifecycle of one execution: the status machine, the step and log
//! streams, pause/resume/stop control and event emission. The engine drives
//! it from the walk; callers drive it through pause/resume/stop.
//!
//! Locks here are `parking_lot` and are never held across `.await` or while
//! emitting events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use super::types::{
    Artifact, ExecutionRecord, ExecutionSnapshot, ExecutionStatus, LogEntry, LogLevel, StepRecord,
};
use crate::config::EngineConfig;
use crate::engine::Bindings;
use crate::error::DebuggerError;
use crate::events::{EventSink, ExecutionEvent};

/// Error recorded when the user stops an execution
pub const STOPPED_BY_USER: &str = "stopped by user";

type TransitionResult = std::result::Result<(), DebuggerError>;

/// Lifecycle owner for a single execution
pub struct ExecutionRuntime {
    execution_id: String,
    workflow_id: String,
    config: EngineConfig,
    record: Mutex<ExecutionRecord>,
    /// The step the walk is parked in front of
    next_step: Mutex<Option<StepRecord>>,
    /// Live variable mapping of the attached walk
    bindings: Mutex<Option<Bindings>>,
    stop_requested: AtomicBool,
    status_tx: watch::Sender<ExecutionStatus>,
    event_sink: Arc<dyn EventSink>,
}

impl ExecutionRuntime {
    /// Open a new execution record in `pending` status
    pub fn open(
        workflow_id: impl Into<String>,
        config: EngineConfig,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        let execution_id = format!("exec-{}", uuid::Uuid::new_v4());
        let workflow_id = workflow_id.into();
        let (status_tx, _) = watch::channel(ExecutionStatus::Pending);

        log::debug!("[{}] Opened execution for workflow '{}'", execution_id, workflow_id);

        Self {
            record: Mutex::new(ExecutionRecord::new(&execution_id, &workflow_id)),
            execution_id,
            workflow_id,
            config,
            next_step: Mutex::new(None),
            bindings: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            status_tx,
            event_sink,
        }
    }

    pub fn id(&self) -> &str {
        &self.execution_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> ExecutionStatus {
        self.record.lock().status
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<ExecutionStatus> {
        self.status_tx.subscribe()
    }

    /// Attach the live variable mapping used for snapshots
    pub fn attach_bindings(&self, bindings: Bindings) {
        *self.bindings.lock() = Some(bindings);
    }

    /// `pending → running`
    pub fn start(&self) -> TransitionResult {
        {
            let mut record = self.record.lock();
            self.transition(&mut record, ExecutionStatus::Running)?;
            record.started_at = Some(Utc::now());
        }
        self.emit(ExecutionEvent::ExecutionStarted {
            execution_id: self.execution_id.clone(),
            workflow_id: self.workflow_id.clone(),
        });
        self.log(
            LogLevel::Info,
            format!("Execution started for workflow '{}'", self.workflow_id),
            Value::Null,
        );
        Ok(())
    }

    /// `running → completed`
    pub fn complete(&self) -> TransitionResult {
        {
            let mut record = self.record.lock();
            self.transition(&mut record, ExecutionStatus::Completed)?;
        }
        self.sync_variables();
        self.log(LogLevel::Info, "Execution completed", Value::Null);
        self.emit(ExecutionEvent::ExecutionCompleted {
            execution_id: self.execution_id.clone(),
            workflow_id: self.workflow_id.clone(),
        });
        Ok(())
    }

    /// `running/paused → failed`, attaching the error to the record and the log
    pub fn fail(&self, error: impl Into<String>) -> TransitionResult {
        let error = error.into();
        {
            let mut record = self.record.lock();
            self.transition(&mut record, ExecutionStatus::Failed)?;
            record.error = Some(error.clone());
        }
        self.sync_variables();
        self.log(
            LogLevel::Error,
            format!("Execution failed: {}", error),
            Value::Null,
        );
        self.emit(ExecutionEvent::ExecutionFailed {
            execution_id: self.execution_id.clone(),
            workflow_id: self.workflow_id.clone(),
            error,
        });
        Ok(())
    }

    /// `running → paused`
    ///
    /// Takes effect at the walk's next checkpoint; the node in flight finishes.
    pub fn pause(&self) -> TransitionResult {
        {
            let mut record = self.record.lock();
            self.transition(&mut record, ExecutionStatus::Paused)?;
        }
        self.announce_pause();
        Ok(())
    }

    /// Pause in front of a node because a breakpoint hit
    ///
    /// Already being paused is not an error here.
    pub fn pause_at(&self, node_id: &str) -> TransitionResult {
        {
            let mut record = self.record.lock();
            if record.status == ExecutionStatus::Paused {
                return Ok(());
            }
            self.transition(&mut record, ExecutionStatus::Paused)?;
        }
        self.log(
            LogLevel::Info,
            format!("Breakpoint hit before node '{}'", node_id),
            serde_json::json!({ "nodeId": node_id }),
        );
        self.announce_pause();
        Ok(())
    }

    /// `paused → running`
    pub fn resume(&self) -> TransitionResult {
        {
            let mut record = self.record.lock();
            self.transition(&mut record, ExecutionStatus::Running)?;
        }
        self.log(LogLevel::Info, "Execution resumed", Value::Null);
        self.emit(ExecutionEvent::ExecutionResumed {
            execution_id: self.execution_id.clone(),
        });
        Ok(())
    }

    /// Cooperative stop: `running/paused → failed`
    ///
    /// The walk observes the flag after the step in flight and dispatches
    /// nothing further.
    pub fn stop(&self, reason: Option<&str>) -> TransitionResult {
        let error = match reason.filter(|r| !r.trim().is_empty()) {
            Some(reason) => format!("{}: {}", STOPPED_BY_USER, reason),
            None => STOPPED_BY_USER.to_string(),
        };
        {
            let mut record = self.record.lock();
            if !record.status.can_transition_to(ExecutionStatus::Failed) {
                return Err(DebuggerError::IllegalTransition {
                    from: record.status,
                    to: ExecutionStatus::Failed,
                });
            }
            // Raise the flag before publishing the status so waiters see both
            self.stop_requested.store(true, Ordering::SeqCst);
            self.transition(&mut record, ExecutionStatus::Failed)?;
            record.error = Some(error.clone());
        }
        self.sync_variables();
        self.log(LogLevel::Warn, format!("Execution {}", error), Value::Null);
        self.emit(ExecutionEvent::ExecutionStopped {
            execution_id: self.execution_id.clone(),
            reason: reason.map(str::to_string),
        });
        Ok(())
    }

    /// Wait until the execution is no longer paused
    pub async fn wait_while_paused(&self) {
        let mut rx = self.status_tx.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            if status != ExecutionStatus::Paused {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        let mut rx = self.status_tx.subscribe();
        loop {
            if self.is_stopped() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait until the execution reaches a terminal status
    pub async fn wait_for_terminal(&self) -> ExecutionStatus {
        let mut rx = self.status_tx.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }

    /// Mark the step the walk is about to dispatch
    pub fn set_next_step(&self, step: StepRecord) {
        *self.next_step.lock() = Some(step);
    }

    pub fn clear_next_step(&self) {
        *self.next_step.lock() = None;
    }

    /// Announce that a step attempt is being dispatched
    pub fn begin_step(&self, step: &StepRecord) {
        log::debug!(
            "[{}] Dispatching node '{}' (attempt {})",
            self.execution_id,
            step.node_id,
            step.attempt
        );
        self.emit(ExecutionEvent::StepStarted {
            execution_id: self.execution_id.clone(),
            node_id: step.node_id.clone(),
            attempt: step.attempt,
        });
    }

    /// Append a finished step attempt
    pub fn record_step(&self, step: StepRecord) {
        {
            let mut next = self.next_step.lock();
            if next.as_ref().is_some_and(|s| s.node_id == step.node_id) {
                *next = None;
            }
        }
        self.record.lock().steps.push(step.clone());
        self.emit(ExecutionEvent::StepCompleted {
            execution_id: self.execution_id.clone(),
            step,
        });
    }

    /// Append to the record's log stream and mirror to the `log` facade
    ///
    /// Entries below the configured level only reach the facade.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, context: Value) {
        let message = message.into();
        if level < self.config.log_level {
            log::debug!("[{}] {}", self.execution_id, message);
            return;
        }

        log::log!(level.to_log_level(), "[{}] {}", self.execution_id, message);
        let entry = LogEntry::new(level, message, context);
        self.record.lock().logs.push(entry.clone());
        self.emit(ExecutionEvent::LogEntry {
            execution_id: self.execution_id.clone(),
            entry,
        });
    }

    /// Attach a captured artifact and return its id
    pub fn attach_artifact(&self, step_id: Option<String>, data: String) -> String {
        let id = format!("artifact-{}", uuid::Uuid::new_v4());
        self.record.lock().artifacts.push(Artifact {
            id: id.clone(),
            timestamp: Utc::now(),
            step_id,
            data,
        });
        id
    }

    /// Current step, completed steps, bindings and logs
    pub fn snapshot(&self) -> ExecutionSnapshot {
        let variables = self.current_variables();
        let next_step = self.next_step.lock().clone();
        let record = self.record.lock();
        ExecutionSnapshot {
            execution_id: self.execution_id.clone(),
            status: record.status,
            next_step,
            steps: record.steps.clone(),
            variables,
            logs: record.logs.clone(),
        }
    }

    /// Copy of the record with up-to-date variable bindings
    pub fn record(&self) -> ExecutionRecord {
        let variables = self.current_variables();
        let mut record = self.record.lock().clone();
        if self.bindings.lock().is_some() {
            record.variables = variables;
        }
        record
    }

    fn current_variables(&self) -> HashMap<String, Value> {
        let bindings = self.bindings.lock().clone();
        match bindings {
            Some(bindings) => bindings.read().clone(),
            None => self.record.lock().variables.clone(),
        }
    }

    /// Copy live bindings into the record once the execution ends
    fn sync_variables(&self) {
        let bindings = self.bindings.lock().clone();
        if let Some(bindings) = bindings {
            let variables = bindings.read().clone();
            self.record.lock().variables = variables;
        }
    }

    fn announce_pause(&self) {
        let node_id = self.next_step.lock().as_ref().map(|s| s.node_id.clone());
        self.log(LogLevel::Info, "Execution paused", Value::Null);
        self.emit(ExecutionEvent::ExecutionPaused {
            execution_id: self.execution_id.clone(),
            node_id,
        });
    }

    fn transition(&self, record: &mut ExecutionRecord, to: ExecutionStatus) -> TransitionResult {
        if !record.status.can_transition_to(to) {
            return Err(DebuggerError::IllegalTransition {
                from: record.status,
                to,
            });
        }
        log::debug!("[{}] {} -> {}", self.execution_id, record.status, to);
        record.status = to;
        if to.is_terminal() {
            record.ended_at = Some(Utc::now());
        }
        self.status_tx.send_replace(to);
        Ok(())
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Err(e) = self.event_sink.send(event) {
            log::warn!("[{}] Dropped execution event: {}", self.execution_id, e);
        }
    }
}
