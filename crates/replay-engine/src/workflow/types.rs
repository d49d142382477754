//! Workflow graph types
//!
//! A [`Workflow`] is immutable once built: its fields are private and the only
//! ways to obtain one are [`WorkflowBuilder::build`](super::WorkflowBuilder::build)
//! and deserialization, both of which run structural validation.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::builder::WorkflowBuilder;
use super::validation;
use crate::error::{Result, StructuralError};

/// Unique identifier for a workflow node
pub type NodeId = String;

/// Unique identifier for a workflow edge
pub type EdgeId = String;

/// The closed set of node kinds the engine can dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Delegates to the external action collaborator
    Action,
    /// Evaluates an expression into `$condition` for the next edge selection
    Condition,
    /// Re-enters a body subgraph while a guard holds
    Loop,
    /// Fans out to all outgoing edges concurrently
    Parallel,
    /// Sleeps or polls a predicate
    Wait,
    /// Assigns variables from expressions
    Script,
}

impl NodeType {
    pub fn label(&self) -> &'static str {
        match self {
            NodeType::Action => "Action",
            NodeType::Condition => "Condition",
            NodeType::Loop => "Loop",
            NodeType::Parallel => "Parallel",
            NodeType::Wait => "Wait",
            NodeType::Script => "Script",
        }
    }
}

/// What to do when a node fails
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Fail the execution
    #[default]
    Stop,
    /// Record the failure and proceed to edge selection
    Continue,
    /// Re-attempt up to `max_attempts` more times, then stop
    ///
    /// Without `maxAttempts` the engine's configured `retryCount` applies.
    Retry {
        #[serde(
            rename = "maxAttempts",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        max_attempts: Option<u32>,
    },
}

impl ErrorPolicy {
    pub fn retry(max_attempts: u32) -> Self {
        ErrorPolicy::Retry {
            max_attempts: Some(max_attempts),
        }
    }

    /// Total number of attempts this policy allows
    pub fn total_attempts(&self, default_retries: u32) -> u32 {
        match self {
            ErrorPolicy::Retry { max_attempts } => max_attempts
                .unwrap_or(default_retries)
                .saturating_add(1),
            _ => 1,
        }
    }
}

/// Canvas position; presentation only
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node in a workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub position: Position,
    /// Type-specific configuration (see `engine::nodes`)
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<ErrorPolicy>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<NodeId>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            label: node_type.label().to_string(),
            position: Position::default(),
            config: Value::Null,
            on_error: None,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = Some(policy);
        self
    }

    /// Config value as a string, if present
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// A directed edge, optionally guarded by an expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, alias = "condition", skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

impl WorkflowEdge {
    pub fn new(id: impl Into<EdgeId>, source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            guard: None,
        }
    }

    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }
}

/// Declared type of a workflow variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl VariableType {
    /// Whether a JSON value has this type
    pub fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (VariableType::String, Value::String(_))
                | (VariableType::Number, Value::Number(_))
                | (VariableType::Boolean, Value::Bool(_))
                | (VariableType::Object, Value::Object(_))
                | (VariableType::Array, Value::Array(_))
        )
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariableType::String => "string",
            VariableType::Number => "number",
            VariableType::Boolean => "boolean",
            VariableType::Object => "object",
            VariableType::Array => "array",
        };
        f.write_str(name)
    }
}

/// A declared workflow variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, var_type: VariableType) -> Self {
        Self {
            name: name.into(),
            var_type,
            default_value: None,
            description: None,
            required: false,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for WorkflowMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            created_by: None,
            tags: Vec::new(),
        }
    }
}

/// Serialized workflow document
///
/// This is the persisted form; converting it into a [`Workflow`] validates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
}

/// A validated, immutable workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WorkflowDocument", into = "WorkflowDocument")]
pub struct Workflow {
    id: String,
    name: String,
    description: String,
    version: String,
    nodes: Vec<WorkflowNode>,
    edges: Vec<WorkflowEdge>,
    variables: Vec<Variable>,
    metadata: WorkflowMetadata,
}

impl TryFrom<WorkflowDocument> for Workflow {
    type Error = StructuralError;

    fn try_from(doc: WorkflowDocument) -> std::result::Result<Self, Self::Error> {
        if let Some(error) = validation::validate_document(&doc).into_iter().next() {
            return Err(error);
        }
        Ok(Self {
            id: doc.id,
            name: doc.name,
            description: doc.description,
            version: doc.version,
            nodes: doc.nodes,
            edges: doc.edges,
            variables: doc.variables,
            metadata: doc.metadata,
        })
    }
}

impl From<Workflow> for WorkflowDocument {
    fn from(wf: Workflow) -> Self {
        Self {
            id: wf.id,
            name: wf.name,
            description: wf.description,
            version: wf.version,
            nodes: wf.nodes,
            edges: wf.edges,
            variables: wf.variables,
            metadata: wf.metadata,
        }
    }
}

impl Workflow {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn nodes(&self) -> &[WorkflowNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[WorkflowEdge] {
        &self.edges
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn metadata(&self) -> &WorkflowMetadata {
        &self.metadata
    }

    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Edges leaving a node, in declaration order
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// The unique node without incoming edges
    pub fn start_node(&self) -> Option<&WorkflowNode> {
        let starts = validation::start_nodes(&self.nodes, &self.edges);
        match starts.as_slice() {
            [only] => self.node(only),
            _ => None,
        }
    }

    /// Element ids referenced by action nodes
    pub fn referenced_elements(&self) -> HashSet<String> {
        self.nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Action)
            .filter_map(|n| n.config_str("element"))
            .map(str::to_string)
            .collect()
    }

    /// Start an edit that will produce the next patch version
    pub fn revise(&self) -> WorkflowBuilder {
        WorkflowBuilder::from_workflow(self)
    }

    pub fn to_document(&self) -> WorkflowDocument {
        self.clone().into()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a serialized workflow
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: WorkflowDocument = serde_json::from_str(json)?;
        Ok(Workflow::try_from(doc)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::workflow::WorkflowBuilder;
    use serde_json::json;

    fn sample() -> Workflow {
        WorkflowBuilder::new("wf-1", "Login")
            .description("Log into the app")
            .add_node("open", NodeType::Action)
            .with_config(json!({"action": "launch", "params": {"app": "notepad"}}))
            .add_node("click", NodeType::Action)
            .with_config(json!({"action": "click", "element": "el-submit"}))
            .with_error_policy(ErrorPolicy::retry(2))
            .add_node("check", NodeType::Condition)
            .with_config(json!({"expression": "count > 1"}))
            .connect("open", "click")
            .connect_if("click", "check", "ready == true")
            .add_variable(Variable::new("count", VariableType::Number).with_default(json!(0)))
            .tag("smoke")
            .build()
            .unwrap()
    }

    #[test]
    fn test_json_round_trip_preserves_structure() {
        let wf = sample();
        let json = wf.to_json().unwrap();
        let back = Workflow::from_json(&json).unwrap();
        assert_eq!(back, wf);
        assert_eq!(back.start_node().map(|n| n.id.as_str()), Some("open"));
    }

    #[test]
    fn test_document_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["version"], "1.0.0");
        assert_eq!(value["nodes"][1]["type"], "action");
        assert_eq!(value["nodes"][1]["onError"], json!({"type": "retry", "maxAttempts": 2}));
        assert_eq!(value["edges"][1]["guard"], "ready == true");
        assert_eq!(value["metadata"]["tags"], json!(["smoke"]));
    }

    #[test]
    fn test_deserialization_validates() {
        let json = json!({
            "id": "bad", "name": "Bad", "version": "1.0.0",
            "nodes": [{"id": "a", "type": "action"}],
            "edges": [{"id": "e1", "source": "a", "target": "ghost"}]
        })
        .to_string();
        match Workflow::from_json(&json) {
            Err(EngineError::Structural(StructuralError::UnknownNode { node_id, .. })) => {
                assert_eq!(node_id, "ghost")
            }
            other => panic!("Expected UnknownNode, got {:?}", other),
        }
    }

    #[test]
    fn test_edge_accepts_condition_alias() {
        let edge: WorkflowEdge = serde_json::from_value(
            json!({"id": "e", "source": "a", "target": "b", "condition": "x > 0"}),
        )
        .unwrap();
        assert_eq!(edge.guard.as_deref(), Some("x > 0"));
    }

    #[test]
    fn test_referenced_elements() {
        let refs = sample().referenced_elements();
        assert_eq!(refs.len(), 1);
        assert!(refs.contains("el-submit"));
    }

    #[test]
    fn test_variable_type_matching() {
        assert!(VariableType::Number.matches(&json!(1.5)));
        assert!(VariableType::Array.matches(&json!([])));
        assert!(!VariableType::String.matches(&json!(3)));
        assert!(!VariableType::Boolean.matches(&Value::Null));
    }

    #[test]
    fn test_retry_policy_attempts() {
        assert_eq!(ErrorPolicy::Stop.total_attempts(3), 1);
        assert_eq!(ErrorPolicy::Continue.total_attempts(3), 1);
        assert_eq!(ErrorPolicy::retry(1).total_attempts(3), 2);
        assert_eq!(ErrorPolicy::Retry { max_attempts: None }.total_attempts(3), 4);
        assert_eq!(ErrorPolicy::retry(u32::MAX).total_attempts(0), u32::MAX);
    }

    #[test]
    fn test_retry_without_max_attempts_parses() {
        let policy: ErrorPolicy = serde_json::from_value(json!({"type": "retry"})).unwrap();
        assert_eq!(policy, ErrorPolicy::Retry { max_attempts: None });
        assert_eq!(serde_json::to_value(&policy).unwrap(), json!({"type": "retry"}));
    }
}
