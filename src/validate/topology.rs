//! Graph-level topology statistics

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::ValidationConfig;
use crate::graph::store::{GraphStore, NodeIdx};

/// Density, isolation and clustering of one graph
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TopologyMetrics {
    pub node_count: usize,
    pub edge_count: usize,
    pub edge_node_ratio: f64,
    /// Share of nodes without any edge to another node
    pub isolated_ratio: f64,
    /// Average local clustering coefficient, ignoring direction
    pub clustering_coefficient: f64,
    /// Sparse or poorly connected input; extraction likely lost information
    pub low_information_density: bool,
}

impl TopologyMetrics {
    pub fn compute(store: &GraphStore, config: &ValidationConfig) -> Self {
        let node_count = store.node_count();
        let edge_count = store.edge_count();
        if node_count == 0 {
            return Self {
                low_information_density: true,
                ..Self::default()
            };
        }

        // Undirected simple neighborhoods, self excluded
        let neighborhoods: Vec<HashSet<NodeIdx>> = (0..store.slot_count())
            .into_par_iter()
            .map(|slot| store.adjacent(slot as NodeIdx).collect())
            .collect();

        let live: Vec<NodeIdx> = store.nodes().map(|(idx, _)| idx).collect();
        let isolated = live
            .iter()
            .filter(|&&idx| neighborhoods[idx as usize].is_empty())
            .count();

        let clustering_sum: f64 = live
            .par_iter()
            .map(|&idx| local_clustering(&neighborhoods, idx))
            .sum();

        let edge_node_ratio = edge_count as f64 / node_count as f64;
        let isolated_ratio = isolated as f64 / node_count as f64;

        Self {
            node_count,
            edge_count,
            edge_node_ratio,
            isolated_ratio,
            clustering_coefficient: clustering_sum / node_count as f64,
            low_information_density: edge_node_ratio < config.min_edge_node_ratio
                || isolated_ratio >= config.max_isolated_ratio,
        }
    }
}

/// Linked neighbor pairs over possible neighbor pairs
fn local_clustering(neighborhoods: &[HashSet<NodeIdx>], node: NodeIdx) -> f64 {
    let neighbors = &neighborhoods[node as usize];
    let n = neighbors.len();
    if n < 2 {
        return 0.0;
    }

    let mut links = 0usize;
    for &a in neighbors {
        for &b in neighbors {
            if a < b && neighborhoods[a as usize].contains(&b) {
                links += 1;
            }
        }
    }

    let possible = n * (n - 1) / 2;
    links as f64 / possible as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::{Edge, Node};

    #[test]
    fn triangle_with_isolated_node() {
        let mut store = GraphStore::new();
        for id in ["a", "b", "c", "d"] {
            store.add_node(Node::new(id, "entity", 0.5)).unwrap();
        }
        store.add_edge(Edge::new("a", "b", "causes")).unwrap();
        store.add_edge(Edge::new("b", "c", "causes")).unwrap();
        store.add_edge(Edge::new("c", "a", "related_to")).unwrap();

        let metrics = TopologyMetrics::compute(&store, &ValidationConfig::default());
        assert_eq!(metrics.node_count, 4);
        assert_eq!(metrics.edge_count, 3);
        assert!((metrics.edge_node_ratio - 0.75).abs() < 1e-12);
        assert!((metrics.isolated_ratio - 0.25).abs() < 1e-12);
        assert!((metrics.clustering_coefficient - 0.75).abs() < 1e-12);
        assert!(metrics.low_information_density);
    }

    #[test]
    fn dense_graph_is_not_flagged() {
        let mut store = GraphStore::new();
        let ids: Vec<String> = (0..4).map(|i| format!("n{i}")).collect();
        for id in &ids {
            store.add_node(Node::new(id.clone(), "concept", 0.5)).unwrap();
        }
        for a in &ids {
            for b in &ids {
                if a != b {
                    store.add_edge(Edge::new(a.clone(), b.clone(), "supports")).unwrap();
                    store.add_edge(Edge::new(a.clone(), b.clone(), "causes")).unwrap();
                }
            }
        }

        let config = ValidationConfig {
            min_edge_node_ratio: 4.0,
            ..ValidationConfig::default()
        };
        let metrics = TopologyMetrics::compute(&store, &config);
        assert_eq!(metrics.edge_node_ratio, 6.0);
        assert_eq!(metrics.clustering_coefficient, 1.0);
        assert!(!metrics.low_information_density);
    }

    #[test]
    fn self_loops_do_not_count_as_connections() {
        let mut store = GraphStore::new();
        store.add_node(Node::new("a", "entity", 0.5)).unwrap();
        store.add_edge(Edge::new("a", "a", "same_as")).unwrap();
        let metrics = TopologyMetrics::compute(&store, &ValidationConfig::default());
        assert_eq!(metrics.isolated_ratio, 1.0);
    }
}
