//! Per-execution walk state
//!
//! One [`ExecutionContext`] belongs to exactly one engine walk. Parallel
//! branches share it; writes to the variable mapping go through
//! [`ExecutionContext::apply`], which holds the write lock only while a
//! single step's updates are merged.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::runtime::StepRecord;
use crate::workflow::NodeId;

/// Shared, mutable variable mapping of one execution
pub type Bindings = Arc<RwLock<HashMap<String, Value>>>;

/// Live state of one engine walk
pub struct ExecutionContext {
    workflow_id: String,
    execution_id: String,
    variables: Bindings,
    current_node: Mutex<Option<NodeId>>,
    /// Completed step attempts, in completion order
    history: Mutex<Vec<StepRecord>>,
}

impl ExecutionContext {
    pub fn new(
        workflow_id: impl Into<String>,
        execution_id: impl Into<String>,
        variables: HashMap<String, Value>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            variables: Arc::new(RwLock::new(variables)),
            current_node: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Copy of the current bindings
    ///
    /// May be stale relative to a sibling parallel branch.
    pub fn variables(&self) -> HashMap<String, Value> {
        self.variables.read().clone()
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.variables.read().get(name).cloned()
    }

    /// Handle to the live mapping
    pub fn bindings(&self) -> Bindings {
        self.variables.clone()
    }

    /// Merge one step's variable updates under an exclusive write window
    pub fn apply(&self, updates: HashMap<String, Value>) {
        if updates.is_empty() {
            return;
        }
        let mut variables = self.variables.write();
        variables.extend(updates);
    }

    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.variables.write().insert(name.into(), value);
    }

    pub fn current_node(&self) -> Option<NodeId> {
        self.current_node.lock().clone()
    }

    pub fn set_current_node(&self, node_id: Option<NodeId>) {
        *self.current_node.lock() = node_id;
    }

    pub fn push_step(&self, step: StepRecord) {
        self.history.lock().push(step);
    }

    pub fn steps(&self) -> Vec<StepRecord> {
        self.history.lock().clone()
    }
}
