//! Quotient construction: one node per equivalence class, one edge per
//! (class pair, relation, directedness)

mod index;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{CompressError, Result};
use crate::graph::model::GraphDocument;
use crate::graph::store::GraphStore;
use crate::refine::bisim::{BisimPartition, ClassId};

pub use index::QuotientIndex;

/// How the strengths of collapsed edges are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthAggregation {
    #[default]
    Max,
    Mean,
    /// Mean weighted by each contributing edge's own collapsed count
    CountWeightedMean,
}

impl StrengthAggregation {
    pub fn as_str(self) -> &'static str {
        match self {
            StrengthAggregation::Max => "max",
            StrengthAggregation::Mean => "mean",
            StrengthAggregation::CountWeightedMean => "count_weighted_mean",
        }
    }

    pub(crate) fn combine(self, contributions: &[(f64, u64)]) -> f64 {
        if let [(strength, _)] = contributions {
            return *strength;
        }
        match self {
            StrengthAggregation::Max => contributions
                .iter()
                .map(|(s, _)| *s)
                .fold(f64::NEG_INFINITY, f64::max),
            StrengthAggregation::Mean => {
                contributions.iter().map(|(s, _)| *s).sum::<f64>() / contributions.len() as f64
            }
            StrengthAggregation::CountWeightedMean => {
                let total: u64 = contributions.iter().map(|(_, c)| *c).sum();
                let weighted: f64 = contributions.iter().map(|(s, c)| s * *c as f64).sum();
                weighted / total.max(1) as f64
            }
        }
    }
}

impl FromStr for StrengthAggregation {
    type Err = CompressError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "max" => Ok(StrengthAggregation::Max),
            "mean" => Ok(StrengthAggregation::Mean),
            "count_weighted_mean" | "weighted" => Ok(StrengthAggregation::CountWeightedMean),
            other => Err(CompressError::InvalidConfig {
                field: "aggregation",
                reason: format!("unknown strength aggregation '{other}'"),
            }),
        }
    }
}

impl fmt::Display for StrengthAggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bidirectional index between input node ids and compressed classes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MappingTable {
    /// Input id -> class
    pub class_of: BTreeMap<String, ClassId>,

    /// Class -> input ids, in input order
    pub members: Vec<Vec<String>>,

    /// Class -> id of the compressed node
    pub representatives: Vec<String>,
}

impl MappingTable {
    pub fn class_of(&self, id: &str) -> Option<ClassId> {
        self.class_of.get(id).copied()
    }

    pub fn members(&self, class: ClassId) -> &[String] {
        self.members.get(class as usize).map_or(&[], |m| m.as_slice())
    }

    pub fn representative(&self, class: ClassId) -> Option<&str> {
        self.representatives.get(class as usize).map(String::as_str)
    }

    /// Id of the compressed node an input node was folded into
    pub fn compressed_id(&self, id: &str) -> Option<&str> {
        self.class_of(id).and_then(|c| self.representative(c))
    }

    pub fn class_count(&self) -> usize {
        self.representatives.len()
    }

    pub fn node_count(&self) -> usize {
        self.class_of.len()
    }
}

/// Compressed graph together with its mapping table
#[derive(Debug, Clone, PartialEq)]
pub struct Quotient {
    /// Compressed nodes appear in class order
    pub graph: GraphDocument,
    pub mapping: MappingTable,
}

/// Builds the compressed graph for a partition
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotientConstructor {
    aggregation: StrengthAggregation,
}

impl QuotientConstructor {
    pub fn new(aggregation: StrengthAggregation) -> Self {
        Self { aggregation }
    }

    pub fn construct(&self, store: &GraphStore, partition: &BisimPartition) -> Quotient {
        let quotient =
            QuotientIndex::from_partition(store, partition).materialize(store, self.aggregation);

        log::info!(
            "Quotient has {} nodes and {} edges ({} strength aggregation)",
            quotient.graph.nodes.len(),
            quotient.graph.edges.len(),
            self.aggregation
        );

        quotient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::csr::CsrIndex;
    use crate::graph::model::{Edge, Node};
    use crate::refine::{KBisimPartitioner, OrbitDetector};

    fn compress(store: &GraphStore, aggregation: StrengthAggregation) -> Quotient {
        let csr = CsrIndex::from_store(store);
        let orbits = OrbitDetector::new(64, 5).detect(&csr, None).unwrap();
        let partition = KBisimPartitioner::new(2).partition(&csr, orbits, None).unwrap();
        QuotientConstructor::new(aggregation).construct(store, &partition)
    }

    fn star(strengths: &[f64]) -> GraphStore {
        let mut store = GraphStore::new();
        store.add_node(Node::new("hub", "concept", 0.9)).unwrap();
        for (i, &s) in strengths.iter().enumerate() {
            let id = format!("leaf{i}");
            store
                .add_node(Node::new(id.clone(), "entity", [0.41, 0.45, 0.43][i % 3]))
                .unwrap();
            store
                .add_edge(Edge::new("hub", id, "part_of").with_strength(s))
                .unwrap();
        }
        store
    }

    #[test]
    fn star_collapses_to_one_edge() {
        let q = compress(&star(&[0.2, 0.4, 0.9]), StrengthAggregation::Max);
        assert_eq!(q.graph.nodes.len(), 2);
        assert_eq!(q.graph.edges.len(), 1);

        let edge = &q.graph.edges[0];
        assert_eq!(edge.source_id, "hub");
        assert_eq!(edge.target_id, "leaf0");
        assert_eq!(edge.collapsed_count, Some(3));
        assert_eq!(edge.strength, 0.9);

        let leaf = &q.graph.nodes[1];
        assert_eq!(leaf.source_members, vec!["leaf0", "leaf1", "leaf2"]);
        assert_eq!(leaf.confidence, 0.45);
    }

    #[test]
    fn aggregation_policies() {
        let mean = compress(&star(&[0.2, 0.4, 0.9]), StrengthAggregation::Mean);
        assert!((mean.graph.edges[0].strength - 0.5).abs() < 1e-12);

        // pre-collapsed input edges weigh by their own counts
        let mut store = GraphStore::new();
        store.add_node(Node::new("a", "concept", 0.5)).unwrap();
        store.add_node(Node::new("b", "entity", 0.5)).unwrap();
        store.add_node(Node::new("c", "entity", 0.5)).unwrap();
        let mut heavy = Edge::new("a", "b", "supports").with_strength(1.0);
        heavy.collapsed_count = Some(3);
        store.add_edge(heavy).unwrap();
        store
            .add_edge(Edge::new("a", "c", "supports").with_strength(0.2))
            .unwrap();
        let csr = CsrIndex::from_store(&store);
        // round 0 only: b and c share (type, bucket) despite unequal counts
        let colors = vec![crate::refine::initial_colors(&csr, 5)];
        let partition = BisimPartition::from_colors(&csr.live, colors, 0, 0, false);
        let q = QuotientConstructor::new(StrengthAggregation::CountWeightedMean)
            .construct(&store, &partition);
        assert_eq!(q.graph.edges[0].collapsed_count, Some(4));
        assert!((q.graph.edges[0].strength - 0.8).abs() < 1e-12);
    }

    #[test]
    fn mapping_table_resolves_both_ways() {
        let q = compress(&star(&[1.0, 1.0]), StrengthAggregation::Max);
        let m = &q.mapping;
        assert_eq!(m.class_count(), 2);
        assert_eq!(m.node_count(), 3);
        assert_eq!(m.class_of("leaf1"), Some(1));
        assert_eq!(m.members(1), ["leaf0", "leaf1"]);
        assert_eq!(m.compressed_id("leaf1"), Some("leaf0"));
        assert_eq!(m.class_of("missing"), None);
    }

    #[test]
    fn undirected_pairs_are_normalized() {
        let mut store = GraphStore::new();
        store.add_node(Node::new("x", "concept", 0.5)).unwrap();
        store.add_node(Node::new("y", "claim", 0.5)).unwrap();
        store.add_edge(Edge::new("y", "x", "similar_to")).unwrap();

        let q = compress(&store, StrengthAggregation::Max);
        let edge = &q.graph.edges[0];
        assert_eq!((edge.source_id.as_str(), edge.target_id.as_str()), ("x", "y"));
        assert!(!edge.directed);
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!(
            "count-weighted-mean".parse::<StrengthAggregation>().unwrap(),
            StrengthAggregation::CountWeightedMean
        );
        assert_eq!("MAX".parse::<StrengthAggregation>().unwrap(), StrengthAggregation::Max);
        assert!("median".parse::<StrengthAggregation>().is_err());
    }
}
