//! Breakpoints and step replay
//!
//! The engine consults [`Debugger::should_break`] immediately before every
//! node dispatch. A breakpoint never skips or re-runs a step: it only delays
//! the dispatch of the node it is attached to.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DebuggerError;
use crate::expression::{DefaultEvaluator, ExpressionEvaluator};
use crate::runtime::{ExecutionRecord, StepRecord, StepSnapshot};
use crate::workflow::NodeId;

/// A breakpoint attached to one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugBreakpoint {
    pub node_id: NodeId,
    pub enabled: bool,
    /// Only break when this evaluates truthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Breakpoint registry and replay helpers
pub struct Debugger {
    /// At most one breakpoint per node
    breakpoints: RwLock<HashMap<NodeId, DebugBreakpoint>>,
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

impl Debugger {
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(DefaultEvaluator))
    }

    pub fn with_evaluator(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self {
            breakpoints: RwLock::new(HashMap::new()),
            evaluator,
        }
    }

    /// Add an enabled breakpoint, replacing any existing one on the node
    pub fn add_breakpoint(&self, node_id: impl Into<NodeId>, condition: Option<&str>) {
        let node_id = node_id.into();
        let condition = condition
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        log::debug!("Breakpoint set on node '{}' (condition: {:?})", node_id, condition);
        self.breakpoints.write().insert(
            node_id.clone(),
            DebugBreakpoint {
                node_id,
                enabled: true,
                condition,
            },
        );
    }

    pub fn remove_breakpoint(&self, node_id: &str) -> bool {
        self.breakpoints.write().remove(node_id).is_some()
    }

    pub fn enable_breakpoint(&self, node_id: &str) -> bool {
        self.set_enabled(node_id, true)
    }

    pub fn disable_breakpoint(&self, node_id: &str) -> bool {
        self.set_enabled(node_id, false)
    }

    fn set_enabled(&self, node_id: &str, enabled: bool) -> bool {
        match self.breakpoints.write().get_mut(node_id) {
            Some(bp) => {
                bp.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn breakpoint(&self, node_id: &str) -> Option<DebugBreakpoint> {
        self.breakpoints.read().get(node_id).cloned()
    }

    /// All breakpoints, sorted by node id
    pub fn breakpoints(&self) -> Vec<DebugBreakpoint> {
        let mut all: Vec<_> = self.breakpoints.read().values().cloned().collect();
        all.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        all
    }

    pub fn clear(&self) {
        self.breakpoints.write().clear();
    }

    /// True iff an enabled breakpoint exists on the node and its condition,
    /// if any, is truthy against `bindings`
    ///
    /// A condition that fails to evaluate does not break.
    pub fn should_break(&self, node_id: &str, bindings: &HashMap<String, Value>) -> bool {
        let Some(bp) = self.breakpoint(node_id) else {
            return false;
        };
        if !bp.enabled {
            return false;
        }
        match &bp.condition {
            None => true,
            Some(condition) => match self.evaluator.evaluate_bool(condition, bindings) {
                Ok(hit) => hit,
                Err(e) => {
                    log::warn!(
                        "Breakpoint condition on node '{}' could not be evaluated: {}",
                        node_id,
                        e
                    );
                    false
                }
            },
        }
    }

    /// Steps of a record in start order
    pub fn timeline(&self, record: &ExecutionRecord) -> Vec<StepRecord> {
        let mut steps = record.steps.clone();
        steps.sort_by_key(|s| s.started_at);
        steps
    }

    /// Replay view of the step at `index` in the record's step list
    ///
    /// Logs are those written up to the end of the step.
    pub fn step_snapshot(
        &self,
        record: &ExecutionRecord,
        index: usize,
    ) -> Result<StepSnapshot, DebuggerError> {
        let step = record
            .steps
            .get(index)
            .cloned()
            .ok_or(DebuggerError::InvalidStepIndex {
                index,
                len: record.steps.len(),
            })?;

        let cutoff = step.ended_at.unwrap_or(step.started_at);
        let logs = record
            .logs
            .iter()
            .filter(|entry| entry.timestamp <= cutoff)
            .cloned()
            .collect();

        Ok(StepSnapshot {
            previous_steps: record.steps[..index].to_vec(),
            step,
            variables: record.variables.clone(),
            logs,
        })
    }
}
