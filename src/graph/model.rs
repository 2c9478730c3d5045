//! Node, edge and document types shared by input and compressed graphs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Node type label
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Entity,
    Concept,
    Process,
    Claim,
    Placeholder,
    Other(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Entity => "entity",
            NodeKind::Concept => "concept",
            NodeKind::Process => "process",
            NodeKind::Claim => "claim",
            NodeKind::Placeholder => "placeholder",
            NodeKind::Other(label) => label,
        }
    }
}

impl From<String> for NodeKind {
    fn from(label: String) -> Self {
        match label.as_str() {
            "entity" => NodeKind::Entity,
            "concept" => NodeKind::Concept,
            "process" => NodeKind::Process,
            "claim" => NodeKind::Claim,
            "placeholder" => NodeKind::Placeholder,
            _ => NodeKind::Other(label),
        }
    }
}

impl From<&str> for NodeKind {
    fn from(label: &str) -> Self {
        NodeKind::from(label.to_string())
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Other(label) => label,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relation label carried by an edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationType {
    IsA,
    PartOf,
    Causes,
    Supports,
    Contradicts,
    RelatedTo,
    SimilarTo,
    SameAs,
    Other(String),
}

impl RelationType {
    pub fn as_str(&self) -> &str {
        match self {
            RelationType::IsA => "is_a",
            RelationType::PartOf => "part_of",
            RelationType::Causes => "causes",
            RelationType::Supports => "supports",
            RelationType::Contradicts => "contradicts",
            RelationType::RelatedTo => "related_to",
            RelationType::SimilarTo => "similar_to",
            RelationType::SameAs => "same_as",
            RelationType::Other(label) => label,
        }
    }

    /// Symmetric relations are undirected for refinement regardless of the edge flag
    pub fn is_symmetric(&self) -> bool {
        matches!(
            self,
            RelationType::RelatedTo | RelationType::SimilarTo | RelationType::SameAs
        )
    }

    /// Self-loops of reflexive relations take part in equivalence comparison
    pub fn is_reflexive(&self) -> bool {
        matches!(self, RelationType::SameAs)
    }
}

impl From<String> for RelationType {
    fn from(label: String) -> Self {
        match label.as_str() {
            "is_a" => RelationType::IsA,
            "part_of" => RelationType::PartOf,
            "causes" => RelationType::Causes,
            "supports" => RelationType::Supports,
            "contradicts" => RelationType::Contradicts,
            "related_to" => RelationType::RelatedTo,
            "similar_to" => RelationType::SimilarTo,
            "same_as" => RelationType::SameAs,
            _ => RelationType::Other(label),
        }
    }
}

impl From<&str> for RelationType {
    fn from(label: &str) -> Self {
        RelationType::from(label.to_string())
    }
}

impl From<RelationType> for String {
    fn from(relation: RelationType) -> Self {
        match relation {
            RelationType::Other(label) => label,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A graph node. `provenance` never influences equivalence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: NodeKind,

    pub confidence: f64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,

    /// Original ids folded into this node (compressed graphs only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_members: Vec<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: impl Into<NodeKind>, confidence: f64) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            confidence,
            properties: BTreeMap::new(),
            provenance: None,
            source_members: Vec::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_provenance(mut self, provenance: impl Into<String>) -> Self {
        self.provenance = Some(provenance.into());
        self
    }

    /// Number of original nodes this node stands for
    pub fn member_weight(&self) -> u64 {
        self.source_members.len().max(1) as u64
    }
}

fn default_strength() -> f64 {
    1.0
}

fn default_directed() -> bool {
    true
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// A typed, weighted relationship between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    pub edge_type: RelationType,

    #[serde(default = "default_strength")]
    pub strength: f64,

    #[serde(default = "default_directed")]
    pub directed: bool,

    /// Number of original edges collapsed into this one (compressed graphs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapsed_count: Option<u64>,

    /// How many of the collapsed edges were genuine self-loops
    #[serde(default, skip_serializing_if = "is_zero")]
    pub loop_count: u64,
}

impl Edge {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        edge_type: impl Into<RelationType>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            edge_type: edge_type.into(),
            strength: default_strength(),
            directed: true,
            collapsed_count: None,
            loop_count: 0,
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn undirected(mut self) -> Self {
        self.directed = false;
        self
    }

    /// Directedness used by refinement and traversal
    pub fn is_directed(&self) -> bool {
        self.directed && !self.edge_type.is_symmetric()
    }

    pub fn is_self_loop(&self) -> bool {
        self.source_id == self.target_id
    }

    /// Number of original edges this edge represents
    pub fn multiplicity(&self) -> u64 {
        self.collapsed_count.unwrap_or(1)
    }

    /// Number of original self-loops this edge represents
    pub fn genuine_loops(&self) -> u64 {
        match self.collapsed_count {
            Some(_) => self.loop_count,
            None if self.is_self_loop() => 1,
            None => 0,
        }
    }
}

/// Serialized graph: both the input schema and the compressed output schema
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<Node>,

    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphDocument {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip_through_strings() {
        assert_eq!(NodeKind::from("placeholder"), NodeKind::Placeholder);
        assert_eq!(String::from(NodeKind::Other("event".into())), "event");
        assert_eq!(RelationType::from("is_a"), RelationType::IsA);
        assert_eq!(RelationType::from("mentions").as_str(), "mentions");
    }

    #[test]
    fn symmetric_relations_ignore_directed_flag() {
        let edge = Edge::new("a", "b", RelationType::RelatedTo);
        assert!(edge.directed);
        assert!(!edge.is_directed());
        assert!(Edge::new("a", "b", "causes").is_directed());
        assert!(!Edge::new("a", "b", "causes").undirected().is_directed());
    }

    #[test]
    fn document_uses_type_field_and_defaults() {
        let json = r#"{
            "nodes": [{"id": "a", "type": "concept", "confidence": 0.7}],
            "edges": [{"source_id": "a", "target_id": "a", "edge_type": "same_as"}]
        }"#;
        let doc: GraphDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.nodes[0].kind, NodeKind::Concept);
        assert_eq!(doc.edges[0].strength, 1.0);
        assert_eq!(doc.edges[0].multiplicity(), 1);
        assert_eq!(doc.edges[0].genuine_loops(), 1);

        let out = serde_json::to_value(&doc.nodes[0]).unwrap();
        assert_eq!(out["type"], "concept");
        assert!(out.get("source_members").is_none());
    }
}
