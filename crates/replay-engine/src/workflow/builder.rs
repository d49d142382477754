//! Fluent builder for workflows
//!
//! Provides a fluent API for constructing workflows programmatically.
//! Structural problems are collected and reported by [`WorkflowBuilder::build`].

use chrono::Utc;
use serde_json::Value;

use super::types::{
    ErrorPolicy, NodeType, Variable, Workflow, WorkflowDocument, WorkflowEdge, WorkflowMetadata,
    WorkflowNode,
};
use super::validation;
use crate::error::StructuralError;

/// Version given to newly created workflows
pub const INITIAL_VERSION: &str = "1.0.0";

/// Fluent builder for constructing workflows
///
/// # Example
///
/// ```ignore
/// let workflow = WorkflowBuilder::new("wf-1", "Submit form")
///     .add_node("fill", NodeType::Action)
///     .with_config(json!({"action": "type", "element": "name-field"}))
///     .add_node("submit", NodeType::Action)
///     .with_config(json!({"action": "click", "element": "submit-btn"}))
///     .connect("fill", "submit")
///     .build()?;
/// ```
pub struct WorkflowBuilder {
    id: String,
    name: String,
    description: String,
    version: String,
    nodes: Vec<WorkflowNode>,
    edges: Vec<WorkflowEdge>,
    variables: Vec<Variable>,
    metadata: WorkflowMetadata,
    /// Set when editing an existing workflow; `build()` bumps the patch version
    revising: bool,
    edge_counter: usize,
}

impl WorkflowBuilder {
    /// Create a new workflow builder
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: INITIAL_VERSION.to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
            variables: Vec::new(),
            metadata: WorkflowMetadata::default(),
            revising: false,
            edge_counter: 0,
        }
    }

    /// Seed a builder from an existing workflow
    pub(crate) fn from_workflow(workflow: &Workflow) -> Self {
        let doc: WorkflowDocument = workflow.to_document();
        Self {
            id: doc.id,
            name: doc.name,
            description: doc.description,
            version: doc.version,
            nodes: doc.nodes,
            edges: doc.edges,
            variables: doc.variables,
            metadata: doc.metadata,
            revising: true,
            edge_counter: 0,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Override the version (validated at build time)
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn created_by(mut self, author: impl Into<String>) -> Self {
        self.metadata.created_by = Some(author.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.push(tag.into());
        self
    }

    /// Add a node with default configuration
    pub fn add_node(mut self, id: impl Into<String>, node_type: NodeType) -> Self {
        self.nodes.push(WorkflowNode::new(id, node_type));
        self
    }

    /// Add a fully constructed node
    pub fn node(mut self, node: WorkflowNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Set config on the most recently added node
    ///
    /// Must be called immediately after `add_node`.
    pub fn with_config(mut self, config: Value) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.config = config;
        }
        self
    }

    /// Set the error policy of the most recently added node
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.on_error = Some(policy);
        }
        self
    }

    /// Set the label of the most recently added node
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.label = label.into();
        }
        self
    }

    /// Remove a node and every edge touching it
    pub fn remove_node(mut self, node_id: &str) -> Self {
        self.nodes.retain(|n| n.id != node_id);
        self.edges
            .retain(|e| e.source != node_id && e.target != node_id);
        self
    }

    /// Connect two nodes with an unguarded edge (auto-generates edge ID)
    pub fn connect(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        let edge_id = self.next_edge_id();
        self.add_edge(WorkflowEdge::new(edge_id, source, target))
    }

    /// Connect two nodes with a guarded edge (auto-generates edge ID)
    pub fn connect_if(
        self,
        source: impl Into<String>,
        target: impl Into<String>,
        guard: impl Into<String>,
    ) -> Self {
        let edge_id = self.next_edge_id();
        self.add_edge(WorkflowEdge::new(edge_id, source, target).with_guard(guard))
    }

    /// Add an edge with an explicit ID
    pub fn add_edge(mut self, edge: WorkflowEdge) -> Self {
        self.edge_counter += 1;
        self.edges.push(edge);
        self
    }

    pub fn remove_edge(mut self, edge_id: &str) -> Self {
        self.edges.retain(|e| e.id != edge_id);
        self
    }

    pub fn add_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    fn next_edge_id(&self) -> String {
        let mut n = self.edge_counter + 1;
        loop {
            let candidate = format!("edge-{}", n);
            if !self.edges.iter().any(|e| e.id == candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Validate and build the workflow
    ///
    /// When revising an existing workflow, the patch version is bumped and
    /// `updatedAt` refreshed.
    pub fn build(mut self) -> Result<Workflow, StructuralError> {
        if self.revising {
            self.version = next_patch_version(&self.version)?;
            self.metadata.updated_at = Utc::now();
        }

        let doc = WorkflowDocument {
            id: self.id,
            name: self.name,
            description: self.description,
            version: self.version,
            nodes: self.nodes,
            edges: self.edges,
            variables: self.variables,
            metadata: self.metadata,
        };

        let errors = validation::validate_document(&doc);
        if let Some(first) = errors.first() {
            log::debug!(
                "Workflow '{}' failed validation with {} error(s)",
                doc.id,
                errors.len()
            );
            return Err(first.clone());
        }

        Workflow::try_from(doc)
    }
}

fn next_patch_version(version: &str) -> Result<String, StructuralError> {
    let invalid = || StructuralError::InvalidVersion(version.to_string());
    if !validation::is_semver(version) {
        return Err(invalid());
    }
    let mut parts = version.splitn(3, '.');
    let (Some(major), Some(minor), Some(patch)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    let patch: u64 = patch.parse().map_err(|_| invalid())?;
    Ok(format!("{}.{}.{}", major, minor, patch.saturating_add(1)))
}
