//! Action collaborator boundary
//!
//! The engine never touches the OS, browser or network itself. Action nodes
//! are handed to an [`ActionPerformer`] together with the resolved element.

use std::collections::HashMap;

use async_trait::async_trait;
use replay_elements::UIElement;
use serde_json::Value;

use crate::error::Result;

/// Everything an action collaborator needs to perform one action node
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub execution_id: String,
    pub node_id: String,
    /// Action name, e.g. `click`, `type`, `scroll`, `http`
    pub action: String,
    pub params: Value,
    /// Element resolved from the node's `element` reference
    pub element: Option<UIElement>,
    /// Variable bindings at dispatch time
    pub bindings: HashMap<String, Value>,
}

/// Performs side-effecting actions on behalf of the engine
///
/// Implementations must be safe to call from concurrent parallel branches.
#[async_trait]
pub trait ActionPerformer: Send + Sync {
    /// Perform the action and return its output
    async fn perform_action(&self, request: ActionRequest) -> Result<Value>;

    /// Capture a screenshot as a base64 string
    async fn capture_screenshot(&self, _execution_id: &str) -> Option<String> {
        None
    }
}

/// Performer that succeeds without doing anything
///
/// Useful for testing or validating workflows without side effects.
pub struct NullActionPerformer;

#[async_trait]
impl ActionPerformer for NullActionPerformer {
    async fn perform_action(&self, request: ActionRequest) -> Result<Value> {
        log::debug!(
            "[{}] NullActionPerformer ignoring action '{}' on node '{}'",
            request.execution_id,
            request.action,
            request.node_id
        );
        Ok(Value::Null)
    }
}
