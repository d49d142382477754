//! Structural validation for workflow documents
//!
//! Validates node/edge/variable uniqueness, edge references, start-node
//! uniqueness, version format, and graph-dependent node configuration.

use std::collections::HashSet;

use super::types::{NodeType, WorkflowDocument, WorkflowEdge, WorkflowNode};
use crate::error::StructuralError;

/// Validate a workflow document
///
/// Returns all validation errors found (not just the first).
pub fn validate_document(doc: &WorkflowDocument) -> Vec<StructuralError> {
    let mut errors = Vec::new();

    validate_version(&doc.version, &mut errors);
    validate_nodes(&doc.nodes, &mut errors);
    validate_edges(&doc.nodes, &doc.edges, &mut errors);
    validate_variables(doc, &mut errors);

    // Start-node resolution is meaningless on a graph with dangling edges
    if errors.is_empty() {
        validate_start_node(&doc.nodes, &doc.edges, &mut errors);
        validate_node_configs(&doc.nodes, &doc.edges, &mut errors);
    }

    errors
}

/// Ids of nodes without incoming edges, in declaration order
pub fn start_nodes(nodes: &[WorkflowNode], edges: &[WorkflowEdge]) -> Vec<String> {
    let targets: HashSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();
    nodes
        .iter()
        .filter(|n| !targets.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}

/// Whether a version string is `MAJOR.MINOR.PATCH`
pub fn is_semver(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

fn validate_version(version: &str, errors: &mut Vec<StructuralError>) {
    if !is_semver(version) {
        errors.push(StructuralError::InvalidVersion(version.to_string()));
    }
}

fn validate_nodes(nodes: &[WorkflowNode], errors: &mut Vec<StructuralError>) {
    if nodes.is_empty() {
        errors.push(StructuralError::EmptyWorkflow);
        return;
    }

    let mut seen = HashSet::new();
    for node in nodes {
        if !seen.insert(node.id.as_str()) {
            errors.push(StructuralError::DuplicateNodeId(node.id.clone()));
        }
    }
}

fn validate_edges(
    nodes: &[WorkflowNode],
    edges: &[WorkflowEdge],
    errors: &mut Vec<StructuralError>,
) {
    let node_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let mut seen = HashSet::new();

    for edge in edges {
        if !seen.insert(edge.id.as_str()) {
            errors.push(StructuralError::DuplicateEdgeId(edge.id.clone()));
        }
        for endpoint in [&edge.source, &edge.target] {
            if !node_ids.contains(endpoint.as_str()) {
                errors.push(StructuralError::UnknownNode {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }
}

fn validate_variables(doc: &WorkflowDocument, errors: &mut Vec<StructuralError>) {
    let mut seen = HashSet::new();
    for var in &doc.variables {
        if !seen.insert(var.name.as_str()) {
            errors.push(StructuralError::DuplicateVariable(var.name.clone()));
        }
    }
}

fn validate_start_node(
    nodes: &[WorkflowNode],
    edges: &[WorkflowEdge],
    errors: &mut Vec<StructuralError>,
) {
    let starts = start_nodes(nodes, edges);
    match starts.len() {
        0 => errors.push(StructuralError::MissingStartNode),
        1 => {}
        _ => errors.push(StructuralError::MultipleStartNodes(starts)),
    }
}

/// Loop bodies must be direct successors; parallel joins must exist
fn validate_node_configs(
    nodes: &[WorkflowNode],
    edges: &[WorkflowEdge],
    errors: &mut Vec<StructuralError>,
) {
    for node in nodes {
        match node.node_type {
            NodeType::Loop => {
                let Some(body) = node.config_str("body") else {
                    continue;
                };
                let is_successor = edges
                    .iter()
                    .any(|e| e.source == node.id && e.target == body);
                if !is_successor {
                    errors.push(StructuralError::InvalidNodeConfig {
                        node_id: node.id.clone(),
                        message: format!("loop body '{}' is not a successor of the loop", body),
                    });
                }
            }
            NodeType::Parallel => {
                let Some(join) = node.config_str("join") else {
                    continue;
                };
                if !nodes.iter().any(|n| n.id == join) {
                    errors.push(StructuralError::InvalidNodeConfig {
                        node_id: node.id.clone(),
                        message: format!("join node '{}' does not exist", join),
                    });
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{Variable, VariableType, WorkflowMetadata};
    use serde_json::json;

    fn doc(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> WorkflowDocument {
        WorkflowDocument {
            id: "wf".into(),
            name: "Test".into(),
            description: String::new(),
            version: "1.0.0".into(),
            nodes,
            edges,
            variables: Vec::new(),
            metadata: WorkflowMetadata::default(),
        }
    }

    fn action(id: &str) -> WorkflowNode {
        WorkflowNode::new(id, NodeType::Action)
    }

    #[test]
    fn test_valid_chain() {
        let d = doc(
            vec![action("a"), action("b")],
            vec![WorkflowEdge::new("e1", "a", "b")],
        );
        assert!(validate_document(&d).is_empty());
    }

    #[test]
    fn test_empty_workflow() {
        let errors = validate_document(&doc(vec![], vec![]));
        assert_eq!(errors, vec![StructuralError::EmptyWorkflow]);
    }

    #[test]
    fn test_duplicates() {
        let mut d = doc(
            vec![action("a"), action("a"), action("b")],
            vec![WorkflowEdge::new("e1", "a", "b"), WorkflowEdge::new("e1", "a", "b")],
        );
        d.variables = vec![
            Variable::new("x", VariableType::Number),
            Variable::new("x", VariableType::String),
        ];
        let errors = validate_document(&d);
        assert!(errors.contains(&StructuralError::DuplicateNodeId("a".into())));
        assert!(errors.contains(&StructuralError::DuplicateEdgeId("e1".into())));
        assert!(errors.contains(&StructuralError::DuplicateVariable("x".into())));
    }

    #[test]
    fn test_dangling_edge() {
        let d = doc(vec![action("a")], vec![WorkflowEdge::new("e1", "a", "missing")]);
        assert_eq!(
            validate_document(&d),
            vec![StructuralError::UnknownNode {
                edge_id: "e1".into(),
                node_id: "missing".into()
            }]
        );
    }

    #[test]
    fn test_ambiguous_start() {
        let d = doc(
            vec![action("a"), action("b"), action("c")],
            vec![WorkflowEdge::new("e1", "a", "c")],
        );
        assert_eq!(
            validate_document(&d),
            vec![StructuralError::MultipleStartNodes(vec!["a".into(), "b".into()])]
        );
    }

    #[test]
    fn test_missing_start() {
        let d = doc(
            vec![action("a"), action("b")],
            vec![WorkflowEdge::new("e1", "a", "b"), WorkflowEdge::new("e2", "b", "a")],
        );
        assert_eq!(validate_document(&d), vec![StructuralError::MissingStartNode]);
    }

    #[test]
    fn test_version_format() {
        assert!(is_semver("1.0.0"));
        assert!(is_semver("10.20.30"));
        assert!(!is_semver("1.0"));
        assert!(!is_semver("v1.0.0"));
        assert!(!is_semver("1..0"));

        let mut d = doc(vec![action("a")], vec![]);
        d.version = "latest".into();
        assert_eq!(
            validate_document(&d),
            vec![StructuralError::InvalidVersion("latest".into())]
        );
    }

    #[test]
    fn test_loop_body_must_be_successor() {
        let d = doc(
            vec![
                WorkflowNode::new("loop", NodeType::Loop)
                    .with_config(json!({"condition": "true", "body": "b"})),
                action("b"),
            ],
            vec![],
        );
        // b is a second start node too, but config errors are reported alongside
        let errors = validate_document(&d);
        assert!(errors
            .iter()
            .any(|e| matches!(e, StructuralError::InvalidNodeConfig { node_id, .. } if node_id == "loop")));
    }
}
