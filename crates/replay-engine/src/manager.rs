//! Execution manager for tracking workflow executions
//!
//! This module manages the lifecycle of workflow executions, including:
//! - Spawning engine walks on the tokio runtime
//! - Routing pause/resume/stop and snapshot requests by execution id
//! - Retaining finished records until they are cleaned up

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::engine::WorkflowEngine;
use crate::error::DebuggerError;
use crate::events::{EventSink, NullEventSink};
use crate::runtime::{ExecutionRecord, ExecutionRuntime, ExecutionSnapshot, ExecutionStatus};
use crate::workflow::Workflow;

type ControlResult<T> = std::result::Result<T, DebuggerError>;

/// State for a single execution
pub struct ExecutionState {
    pub runtime: Arc<ExecutionRuntime>,
    pub workflow: Arc<Workflow>,
    /// Engine task; taken by the first `wait`
    handle: Option<JoinHandle<()>>,
    pub created_at: Instant,
}

impl ExecutionState {
    /// Whether the execution ended more than `older_than` ago
    pub fn finished_before(&self, older_than: Duration) -> bool {
        if !self.runtime.status().is_terminal() {
            return false;
        }
        self.runtime
            .record()
            .ended_at
            .and_then(|ended| (Utc::now() - ended).to_std().ok())
            .is_some_and(|age| age >= older_than)
    }
}

/// Manager for all workflow executions
pub struct ExecutionManager {
    engine: Arc<WorkflowEngine>,
    config: EngineConfig,
    event_sink: Arc<dyn EventSink>,
    /// Executions keyed by execution ID
    executions: RwLock<HashMap<String, ExecutionState>>,
}

impl ExecutionManager {
    pub fn new(engine: Arc<WorkflowEngine>, config: EngineConfig) -> Self {
        Self {
            engine,
            config,
            event_sink: Arc::new(NullEventSink),
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// Route lifecycle events of every execution to `event_sink`
    pub fn with_event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// Start executing a workflow in the background and return its execution id
    pub async fn execute(&self, workflow: Arc<Workflow>, variables: HashMap<String, Value>) -> String {
        let runtime = Arc::new(ExecutionRuntime::open(
            workflow.id(),
            self.config.clone(),
            self.event_sink.clone(),
        ));
        let execution_id = runtime.id().to_string();

        let handle = {
            let engine = self.engine.clone();
            let workflow = workflow.clone();
            let runtime = runtime.clone();
            tokio::spawn(async move {
                engine.execute(&workflow, variables, &runtime).await;
            })
        };

        log::info!(
            "Started execution {} for workflow '{}' v{}",
            execution_id,
            workflow.id(),
            workflow.version()
        );

        let state = ExecutionState {
            runtime,
            workflow,
            handle: Some(handle),
            created_at: Instant::now(),
        };
        self.executions
            .write()
            .await
            .insert(execution_id.clone(), state);

        execution_id
    }

    /// Execute a synchronous function with the execution's runtime
    pub async fn with_runtime<F, R>(&self, execution_id: &str, f: F) -> ControlResult<R>
    where
        F: FnOnce(&ExecutionRuntime) -> R,
    {
        let executions = self.executions.read().await;
        executions
            .get(execution_id)
            .map(|state| f(&state.runtime))
            .ok_or_else(|| DebuggerError::UnknownExecution(execution_id.to_string()))
    }

    pub async fn pause(&self, execution_id: &str) -> ControlResult<()> {
        self.with_runtime(execution_id, |rt| rt.pause()).await?
    }

    pub async fn resume(&self, execution_id: &str) -> ControlResult<()> {
        self.with_runtime(execution_id, |rt| rt.resume()).await?
    }

    pub async fn stop(&self, execution_id: &str, reason: Option<&str>) -> ControlResult<()> {
        self.with_runtime(execution_id, |rt| rt.stop(reason)).await?
    }

    pub async fn status(&self, execution_id: &str) -> ControlResult<ExecutionStatus> {
        self.with_runtime(execution_id, |rt| rt.status()).await
    }

    pub async fn snapshot(&self, execution_id: &str) -> ControlResult<ExecutionSnapshot> {
        self.with_runtime(execution_id, |rt| rt.snapshot()).await
    }

    pub async fn record(&self, execution_id: &str) -> ControlResult<ExecutionRecord> {
        self.with_runtime(execution_id, |rt| rt.record()).await
    }

    /// Wait for the execution's walk to end and return its record
    pub async fn wait(&self, execution_id: &str) -> ControlResult<ExecutionRecord> {
        let (runtime, handle) = {
            let mut executions = self.executions.write().await;
            let state = executions
                .get_mut(execution_id)
                .ok_or_else(|| DebuggerError::UnknownExecution(execution_id.to_string()))?;
            (state.runtime.clone(), state.handle.take())
        };

        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    log::error!("Execution task {} ended abnormally: {}", execution_id, e);
                }
            }
            // Another caller is already joining the task
            None => {
                runtime.wait_for_terminal().await;
            }
        }
        Ok(runtime.record())
    }

    pub fn add_breakpoint(&self, node_id: &str, condition: Option<&str>) {
        self.engine.debugger().add_breakpoint(node_id, condition);
    }

    pub fn remove_breakpoint(&self, node_id: &str) -> bool {
        self.engine.debugger().remove_breakpoint(node_id)
    }

    /// Remove an execution by ID
    pub async fn remove_execution(&self, execution_id: &str) -> Option<ExecutionState> {
        self.executions.write().await.remove(execution_id)
    }

    /// Drop finished executions that ended at least `older_than` ago
    pub async fn cleanup_finished(&self, older_than: Duration) -> usize {
        let mut executions = self.executions.write().await;
        let finished: Vec<String> = executions
            .iter()
            .filter(|(_, state)| state.finished_before(older_than))
            .map(|(id, _)| id.clone())
            .collect();

        let count = finished.len();
        for id in finished {
            executions.remove(&id);
            log::debug!("Cleaned up finished execution: {}", id);
        }

        count
    }

    /// Get the number of tracked executions
    pub async fn execution_count(&self) -> usize {
        self.executions.read().await.len()
    }

    /// Check if an execution exists
    pub async fn has_execution(&self, execution_id: &str) -> bool {
        self.executions.read().await.contains_key(execution_id)
    }
}

/// Shared execution manager type
pub type SharedExecutionManager = Arc<ExecutionManager>;
