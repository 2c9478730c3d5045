//! All-or-nothing graph construction

use crate::error::Result;
use crate::graph::model::{Edge, GraphDocument, Node};
use crate::graph::store::GraphStore;

/// Collects nodes and edges, then validates them together in `build`.
/// A defect anywhere rejects the whole graph.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn with_capacity(node_capacity: usize, edge_capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(node_capacity),
            edges: Vec::with_capacity(edge_capacity),
        }
    }

    pub fn from_document(document: GraphDocument) -> Self {
        Self {
            nodes: document.nodes,
            edges: document.edges,
        }
    }

    pub fn node(&mut self, node: Node) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(&mut self, edge: Edge) -> &mut Self {
        self.edges.push(edge);
        self
    }

    /// Nodes first, so edges may reference nodes declared after them
    pub fn build(self) -> Result<GraphStore> {
        let mut store = GraphStore::with_capacity(self.nodes.len(), self.edges.len());

        for node in self.nodes {
            store.add_node(node)?;
        }
        for edge in self.edges {
            store.add_edge(edge)?;
        }

        log::debug!(
            "Built graph store with {} nodes and {} edges",
            store.node_count(),
            store.edge_count()
        );

        Ok(store)
    }
}
