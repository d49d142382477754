//! Node configuration shapes and the synchronous node handlers.
//!
//! Handlers that only touch the variable mapping (condition, script) live
//! here. Action, loop, parallel and wait need the walk and are driven by
//! the executor, but their configs are parsed here too.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{EngineError, Result};
use crate::expression::ExpressionEvaluator;
use crate::runtime::StepStatus;
use crate::workflow::WorkflowNode;

/// Reserved variable holding the result of the last condition node
pub const CONDITION_VARIABLE: &str = "$condition";

/// Configuration for an Action node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionConfig {
    pub action: String,
    /// Registry id of the element to act on.
    #[serde(default)]
    pub element: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Variable that receives the collaborator's output.
    #[serde(default)]
    pub output_variable: Option<String>,
    #[serde(default)]
    pub params: Value,
}

/// Configuration for a Condition node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionConfig {
    pub expression: String,
    /// Optional variable that also receives the result.
    #[serde(default)]
    pub variable: Option<String>,
}

/// Configuration for a Loop node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    /// Guard evaluated before each iteration.
    pub condition: String,
    /// First node of the loop body; must be a successor of the loop node.
    pub body: String,
    /// Safety cap; falls back to the engine config when absent.
    #[serde(default)]
    pub max_iterations: Option<u32>,
    /// Key in the variable mapping holding the current iteration number.
    #[serde(default = "default_iteration_variable")]
    pub iteration_variable: String,
}

fn default_iteration_variable() -> String {
    "loop_iteration".to_string()
}

/// Configuration for a Parallel node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelConfig {
    /// Node where all branches meet; the walk resumes there.
    #[serde(default)]
    pub join: Option<String>,
}

/// Configuration for a Wait node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitConfig {
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Predicate polled until truthy.
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

/// Configuration for a Script node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    pub script: String,
}

/// Parse a node's config bag into its typed shape
///
/// A `null` config is read as an empty object.
pub fn parse_config<T: DeserializeOwned>(node: &WorkflowNode) -> Result<T> {
    let config = match &node.config {
        Value::Null => json!({}),
        other => other.clone(),
    };
    serde_json::from_value(config).map_err(|e| {
        EngineError::invalid_config(
            &node.id,
            format!("invalid {} config: {}", node.node_type.label(), e),
        )
    })
}

/// Result of dispatching one node
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub status: StepStatus,
    pub output: Value,
    /// Variable updates, merged into the mapping in one write window.
    pub updates: HashMap<String, Value>,
}

impl NodeOutcome {
    pub fn completed(output: Value) -> Self {
        Self {
            status: StepStatus::Completed,
            output,
            updates: HashMap::new(),
        }
    }

    pub fn skipped(output: Value) -> Self {
        Self {
            status: StepStatus::Skipped,
            ..Self::completed(output)
        }
    }

    /// Add a single variable update.
    pub fn with_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.updates.insert(key.into(), value);
        self
    }

    pub fn with_updates(mut self, updates: HashMap<String, Value>) -> Self {
        self.updates.extend(updates);
        self
    }
}

/// Execute a Condition node.
///
/// The result does not move the walk; it is stored for the guards of the
/// following edges.
pub fn execute_condition(
    node: &WorkflowNode,
    bindings: &HashMap<String, Value>,
    evaluator: &dyn ExpressionEvaluator,
) -> Result<NodeOutcome> {
    let config: ConditionConfig = parse_config(node)?;
    let result = evaluator.evaluate_bool(&config.expression, bindings)?;

    let mut outcome = NodeOutcome::completed(json!({ "result": result }))
        .with_update(CONDITION_VARIABLE, Value::Bool(result));
    if let Some(variable) = config.variable {
        outcome = outcome.with_update(variable, Value::Bool(result));
    }
    Ok(outcome)
}

/// Execute a Script node.
///
/// Statements are `name = expr` assignments or bare expressions separated by
/// `;`. Each statement sees the assignments made before it. The output holds
/// the value of the last statement.
pub fn execute_script(
    node: &WorkflowNode,
    bindings: &HashMap<String, Value>,
    evaluator: &dyn ExpressionEvaluator,
) -> Result<NodeOutcome> {
    let config: ScriptConfig = parse_config(node)?;

    let mut scope = bindings.clone();
    let mut updates = HashMap::new();
    let mut last = Value::Null;

    for statement in split_statements(&config.script) {
        match split_assignment(statement) {
            Some((name, expr)) => {
                if !is_identifier(name) {
                    return Err(EngineError::node(
                        &node.id,
                        format!("invalid assignment target '{}'", name),
                    ));
                }
                let value = evaluator.evaluate(expr, &scope)?;
                scope.insert(name.to_string(), value.clone());
                updates.insert(name.to_string(), value.clone());
                last = value;
            }
            None => last = evaluator.evaluate(statement, &scope)?,
        }
    }

    Ok(NodeOutcome::completed(json!({ "result": last })).with_updates(updates))
}

/// Split on `;` outside string literals, dropping empty statements
fn split_statements(script: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, ch) in script.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(ch),
            (None, ';') => {
                statements.push(&script[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    statements.push(&script[start..]);

    statements
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Find the assignment `=`, ignoring `==`, `!=`, `<=`, `>=` and quoted text
fn split_assignment(statement: &str) -> Option<(&str, &str)> {
    let bytes = statement.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'=' => {
                let prev = if i > 0 { bytes[i - 1] } else { 0 };
                let next = bytes.get(i + 1).copied().unwrap_or(0);
                if next == b'=' {
                    // Skip the whole `==`
                    i += 1;
                } else if !matches!(prev, b'=' | b'!' | b'<' | b'>') {
                    return Some((statement[..i].trim(), statement[i + 1..].trim()));
                }
            }
            None => {}
        }
        i += 1;
    }
    None
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
