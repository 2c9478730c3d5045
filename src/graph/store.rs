//! In-memory graph store with forward and backward adjacency

use std::collections::HashMap;

use crate::error::{MalformedInput, Result};
use crate::graph::model::{Edge, GraphDocument, Node, RelationType};

/// Slot index of a node inside a store. Slots are never reused.
pub type NodeIdx = u32;

/// Slot index of an edge inside a store
pub type EdgeIdx = u32;

#[derive(Debug, Clone)]
struct StoredEdge {
    edge: Edge,
    source: NodeIdx,
    target: NodeIdx,
}

/// A neighbor reached through one edge
#[derive(Debug, Clone, Copy)]
pub struct Neighbor<'a> {
    pub edge: &'a Edge,
    pub node: &'a Node,
    pub index: NodeIdx,
}

/// Owns raw nodes and edges. Removed entries leave empty slots so that
/// indices held by colorings stay valid across edits.
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    nodes: Vec<Option<Node>>,
    edges: Vec<Option<StoredEdge>>,
    id_to_index: HashMap<String, NodeIdx>,
    forward: Vec<Vec<EdgeIdx>>,
    backward: Vec<Vec<EdgeIdx>>,
    live_nodes: usize,
    live_edges: usize,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(node_capacity: usize, edge_capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(node_capacity),
            edges: Vec::with_capacity(edge_capacity),
            id_to_index: HashMap::with_capacity(node_capacity),
            forward: Vec::with_capacity(node_capacity),
            backward: Vec::with_capacity(node_capacity),
            live_nodes: 0,
            live_edges: 0,
        }
    }

    /// Build a store from a document, rejecting it entirely on the first defect
    pub fn from_document(document: &GraphDocument) -> Result<Self> {
        crate::graph::builder::GraphBuilder::from_document(document.clone()).build()
    }

    pub fn add_node(&mut self, node: Node) -> Result<NodeIdx> {
        if !(0.0..=1.0).contains(&node.confidence) {
            return Err(MalformedInput::ConfidenceOutOfRange {
                id: node.id.clone(),
                confidence: node.confidence,
            }
            .into());
        }
        if self.id_to_index.contains_key(&node.id) {
            return Err(MalformedInput::DuplicateNode { id: node.id.clone() }.into());
        }

        let idx = self.nodes.len() as NodeIdx;
        self.id_to_index.insert(node.id.clone(), idx);
        self.nodes.push(Some(node));
        self.forward.push(Vec::new());
        self.backward.push(Vec::new());
        self.live_nodes += 1;

        Ok(idx)
    }

    pub fn add_edge(&mut self, edge: Edge) -> Result<EdgeIdx> {
        let source = self.resolve_endpoint(&edge, &edge.source_id)?;
        let target = self.resolve_endpoint(&edge, &edge.target_id)?;

        if !edge.strength.is_finite() {
            return Err(MalformedInput::InvalidStrength {
                source_id: edge.source_id.clone(),
                target_id: edge.target_id.clone(),
                strength: edge.strength,
            }
            .into());
        }
        let loops = edge.genuine_loops();
        if loops > edge.multiplicity() || (loops > 0 && source != target) {
            return Err(MalformedInput::InvalidMultiplicity {
                source_id: edge.source_id.clone(),
                target_id: edge.target_id.clone(),
                collapsed_count: edge.multiplicity(),
                loop_count: loops,
            }
            .into());
        }

        let idx = self.edges.len() as EdgeIdx;
        self.edges.push(Some(StoredEdge {
            edge,
            source,
            target,
        }));
        self.forward[source as usize].push(idx);
        self.backward[target as usize].push(idx);
        self.live_edges += 1;

        Ok(idx)
    }

    fn resolve_endpoint(&self, edge: &Edge, id: &str) -> Result<NodeIdx> {
        self.id_to_index.get(id).copied().ok_or_else(|| {
            MalformedInput::DanglingEdge {
                source_id: edge.source_id.clone(),
                target_id: edge.target_id.clone(),
                missing: id.to_string(),
            }
            .into()
        })
    }

    /// Remove a node together with every incident edge
    pub fn remove_node(&mut self, id: &str) -> Result<(Node, Vec<Edge>)> {
        let (_, node, edges) = self.take_node(id)?;
        Ok((node, edges.into_iter().map(|(_, edge)| edge).collect()))
    }

    /// Like [`GraphStore::remove_node`], also reporting the freed slots
    pub(crate) fn take_node(&mut self, id: &str) -> Result<(NodeIdx, Node, Vec<(EdgeIdx, Edge)>)> {
        let idx = self
            .id_to_index
            .remove(id)
            .ok_or_else(|| MalformedInput::UnknownNode { id: id.to_string() })?;

        let mut incident: Vec<EdgeIdx> = self.forward[idx as usize]
            .iter()
            .chain(self.backward[idx as usize].iter())
            .copied()
            .collect();
        incident.sort_unstable();
        incident.dedup();

        let removed_edges = incident
            .into_iter()
            .filter_map(|edge_idx| self.detach_edge(edge_idx).map(|edge| (edge_idx, edge)))
            .collect();

        let node = self.nodes[idx as usize]
            .take()
            .ok_or_else(|| MalformedInput::UnknownNode { id: id.to_string() })?;
        self.live_nodes -= 1;

        Ok((idx, node, removed_edges))
    }

    /// Put a removed node back into its former slot. Edges are not restored.
    pub(crate) fn restore_node(&mut self, idx: NodeIdx, node: Node) -> Result<()> {
        let slot_free = matches!(self.nodes.get(idx as usize), Some(None));
        if !slot_free || self.id_to_index.contains_key(&node.id) {
            return Err(MalformedInput::DuplicateNode { id: node.id }.into());
        }
        self.id_to_index.insert(node.id.clone(), idx);
        self.nodes[idx as usize] = Some(node);
        self.live_nodes += 1;
        Ok(())
    }

    /// Put a removed edge back into its former slot
    pub(crate) fn restore_edge(&mut self, idx: EdgeIdx, edge: Edge) -> Result<()> {
        let source = self.resolve_endpoint(&edge, &edge.source_id)?;
        let target = self.resolve_endpoint(&edge, &edge.target_id)?;
        if !matches!(self.edges.get(idx as usize), Some(None)) {
            return Err(MalformedInput::UnknownEdge {
                source_id: edge.source_id,
                target_id: edge.target_id,
                edge_type: edge.edge_type.to_string(),
            }
            .into());
        }

        self.edges[idx as usize] = Some(StoredEdge {
            edge,
            source,
            target,
        });
        self.forward[source as usize].push(idx);
        self.backward[target as usize].push(idx);
        self.live_edges += 1;
        Ok(())
    }

    /// Remove an edge by slot
    pub fn remove_edge_at(&mut self, idx: EdgeIdx) -> Option<Edge> {
        self.detach_edge(idx)
    }

    /// Remove the first live edge matching source, target and relation
    pub fn remove_edge(
        &mut self,
        source_id: &str,
        target_id: &str,
        edge_type: &RelationType,
    ) -> Result<Edge> {
        self.take_edge(source_id, target_id, edge_type)
            .map(|(_, edge)| edge)
    }

    /// Like [`GraphStore::remove_edge`], also reporting the freed slot
    pub(crate) fn take_edge(
        &mut self,
        source_id: &str,
        target_id: &str,
        edge_type: &RelationType,
    ) -> Result<(EdgeIdx, Edge)> {
        self.find_edge(source_id, target_id, edge_type)
            .and_then(|edge_idx| self.detach_edge(edge_idx).map(|edge| (edge_idx, edge)))
            .ok_or_else(|| {
                MalformedInput::UnknownEdge {
                    source_id: source_id.to_string(),
                    target_id: target_id.to_string(),
                    edge_type: edge_type.to_string(),
                }
                .into()
            })
    }

    /// Locate a live edge. Undirected edges match in either orientation.
    pub fn find_edge(
        &self,
        source_id: &str,
        target_id: &str,
        edge_type: &RelationType,
    ) -> Option<EdgeIdx> {
        let source = self.index_of(source_id)?;
        let target = self.index_of(target_id)?;

        let forward = self.forward[source as usize].iter().copied().find(|&e| {
            self.edge_entry(e)
                .map_or(false, |s| s.target == target && &s.edge.edge_type == edge_type)
        });
        forward.or_else(|| {
            self.forward[target as usize].iter().copied().find(|&e| {
                self.edge_entry(e).map_or(false, |s| {
                    s.target == source && &s.edge.edge_type == edge_type && !s.edge.is_directed()
                })
            })
        })
    }

    fn detach_edge(&mut self, edge_idx: EdgeIdx) -> Option<Edge> {
        let stored = self.edges.get_mut(edge_idx as usize)?.take()?;
        self.forward[stored.source as usize].retain(|&e| e != edge_idx);
        self.backward[stored.target as usize].retain(|&e| e != edge_idx);
        self.live_edges -= 1;
        Some(stored.edge)
    }

    fn edge_entry(&self, edge_idx: EdgeIdx) -> Option<&StoredEdge> {
        self.edges.get(edge_idx as usize)?.as_ref()
    }

    /// Out-neighbors plus undirected neighbors, optionally filtered by relation
    pub fn neighbors(
        &self,
        id: &str,
        edge_type: Option<&RelationType>,
    ) -> Result<Vec<Neighbor<'_>>> {
        let idx = self.require(id)?;
        let outgoing = self.forward[idx as usize]
            .iter()
            .filter_map(|&e| self.edge_entry(e))
            .map(|s| (s, s.target));
        let undirected_incoming = self.backward[idx as usize]
            .iter()
            .filter_map(|&e| self.edge_entry(e))
            .filter(|s| !s.edge.is_directed() && s.source != s.target)
            .map(|s| (s, s.source));

        Ok(self.collect_neighbors(outgoing.chain(undirected_incoming), edge_type))
    }

    /// In-neighbors plus undirected neighbors, optionally filtered by relation
    pub fn predecessors(
        &self,
        id: &str,
        edge_type: Option<&RelationType>,
    ) -> Result<Vec<Neighbor<'_>>> {
        let idx = self.require(id)?;
        let incoming = self.backward[idx as usize]
            .iter()
            .filter_map(|&e| self.edge_entry(e))
            .map(|s| (s, s.source));
        let undirected_outgoing = self.forward[idx as usize]
            .iter()
            .filter_map(|&e| self.edge_entry(e))
            .filter(|s| !s.edge.is_directed() && s.source != s.target)
            .map(|s| (s, s.target));

        Ok(self.collect_neighbors(incoming.chain(undirected_outgoing), edge_type))
    }

    fn collect_neighbors<'a>(
        &'a self,
        entries: impl Iterator<Item = (&'a StoredEdge, NodeIdx)>,
        edge_type: Option<&RelationType>,
    ) -> Vec<Neighbor<'a>> {
        entries
            .filter(|(s, _)| edge_type.map_or(true, |t| &s.edge.edge_type == t))
            .filter_map(|(s, other)| {
                self.node_at(other).map(|node| Neighbor {
                    edge: &s.edge,
                    node,
                    index: other,
                })
            })
            .collect()
    }

    fn require(&self, id: &str) -> Result<NodeIdx> {
        self.index_of(id)
            .ok_or_else(|| MalformedInput::UnknownNode { id: id.to_string() }.into())
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIdx> {
        self.id_to_index.get(id).copied()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index_of(id).and_then(|idx| self.node_at(idx))
    }

    pub fn node_at(&self, idx: NodeIdx) -> Option<&Node> {
        self.nodes.get(idx as usize)?.as_ref()
    }

    pub fn is_live(&self, idx: NodeIdx) -> bool {
        self.node_at(idx).is_some()
    }

    /// Edge with its resolved endpoints
    pub fn edge_at(&self, idx: EdgeIdx) -> Option<(&Edge, NodeIdx, NodeIdx)> {
        self.edge_entry(idx).map(|s| (&s.edge, s.source, s.target))
    }

    /// Edge slots leaving a node (live edges only)
    pub fn outgoing(&self, idx: NodeIdx) -> &[EdgeIdx] {
        self.forward.get(idx as usize).map_or(&[], |v| v.as_slice())
    }

    /// Edge slots entering a node (live edges only)
    pub fn incoming(&self, idx: NodeIdx) -> &[EdgeIdx] {
        self.backward.get(idx as usize).map_or(&[], |v| v.as_slice())
    }

    /// Nodes adjacent to `idx` in either direction, self excluded
    pub fn adjacent(&self, idx: NodeIdx) -> impl Iterator<Item = NodeIdx> + '_ {
        let out = self
            .outgoing(idx)
            .iter()
            .filter_map(move |&e| self.edge_entry(e).map(|s| s.target));
        let inc = self
            .incoming(idx)
            .iter()
            .filter_map(move |&e| self.edge_entry(e).map(|s| s.source));
        out.chain(inc).filter(move |&other| other != idx)
    }

    /// Live nodes in slot order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIdx, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|node| (i as NodeIdx, node)))
    }

    /// Live edges in slot order with resolved endpoints
    pub fn edges(&self) -> impl Iterator<Item = (&Edge, NodeIdx, NodeIdx)> {
        self.edges
            .iter()
            .filter_map(|s| s.as_ref().map(|s| (&s.edge, s.source, s.target)))
    }

    /// Live edges in slot order with their slots
    pub fn indexed_edges(&self) -> impl Iterator<Item = (EdgeIdx, &Edge, NodeIdx, NodeIdx)> {
        self.edges.iter().enumerate().filter_map(|(i, s)| {
            s.as_ref()
                .map(|s| (i as EdgeIdx, &s.edge, s.source, s.target))
        })
    }

    pub fn node_count(&self) -> usize {
        self.live_nodes
    }

    pub fn edge_count(&self) -> usize {
        self.live_edges
    }

    /// Number of node slots, including removed ones
    pub fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    /// Snapshot of the live graph in slot order
    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            nodes: self.nodes().map(|(_, n)| n.clone()).collect(),
            edges: self.edges().map(|(e, _, _)| e.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompressError;

    fn small_store() -> GraphStore {
        let mut store = GraphStore::new();
        store.add_node(Node::new("a", "concept", 0.9)).unwrap();
        store.add_node(Node::new("b", "entity", 0.5)).unwrap();
        store.add_node(Node::new("c", "entity", 0.5)).unwrap();
        store.add_edge(Edge::new("a", "b", "part_of")).unwrap();
        store.add_edge(Edge::new("a", "c", "causes")).unwrap();
        store.add_edge(Edge::new("c", "b", "related_to")).unwrap();
        store
    }

    #[test]
    fn rejects_dangling_edges() {
        let mut store = small_store();
        let err = store.add_edge(Edge::new("a", "zz", "is_a")).unwrap_err();
        match err {
            CompressError::MalformedInput(MalformedInput::DanglingEdge { missing, .. }) => {
                assert_eq!(missing, "zz")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.edge_count(), 3);
    }

    #[test]
    fn rejects_duplicates_and_bad_confidence() {
        let mut store = small_store();
        assert!(matches!(
            store.add_node(Node::new("a", "entity", 0.1)),
            Err(CompressError::MalformedInput(MalformedInput::DuplicateNode { .. }))
        ));
        assert!(matches!(
            store.add_node(Node::new("d", "entity", 1.5)),
            Err(CompressError::MalformedInput(MalformedInput::ConfidenceOutOfRange { .. }))
        ));
        assert!(matches!(
            store.add_node(Node::new("e", "entity", f64::NAN)),
            Err(CompressError::MalformedInput(MalformedInput::ConfidenceOutOfRange { .. }))
        ));
        assert_eq!(store.node_count(), 3);
    }

    #[test]
    fn neighbors_follow_direction_and_filter() {
        let store = small_store();
        let all: Vec<_> = store
            .neighbors("a", None)
            .unwrap()
            .into_iter()
            .map(|n| n.node.id.clone())
            .collect();
        assert_eq!(all, vec!["b", "c"]);

        let part_of = store.neighbors("a", Some(&RelationType::PartOf)).unwrap();
        assert_eq!(part_of.len(), 1);
        assert_eq!(part_of[0].node.id, "b");

        // related_to is symmetric, so b sees c as a neighbor
        let from_b: Vec<_> = store
            .neighbors("b", None)
            .unwrap()
            .into_iter()
            .map(|n| n.node.id.clone())
            .collect();
        assert_eq!(from_b, vec!["c"]);

        let preds = store.predecessors("b", Some(&RelationType::PartOf)).unwrap();
        assert_eq!(preds[0].node.id, "a");
    }

    #[test]
    fn removing_a_node_drops_incident_edges() {
        let mut store = small_store();
        let (node, edges) = store.remove_node("c").unwrap();
        assert_eq!(node.id, "c");
        assert_eq!(edges.len(), 2);
        assert_eq!(store.node_count(), 2);
        assert_eq!(store.edge_count(), 1);
        assert_eq!(store.slot_count(), 3);
        assert!(store.neighbors("c", None).is_err());

        store.add_node(Node::new("c", "entity", 0.5)).unwrap();
        assert_eq!(store.index_of("c"), Some(3));
    }

    #[test]
    fn restores_a_node_and_its_edges_into_their_old_slots() {
        let mut store = small_store();
        let before = store.to_document();
        let (idx, node, edges) = store.take_node("c").unwrap();
        assert_eq!(idx, 2);
        assert_eq!(edges.iter().map(|(e, _)| *e).collect::<Vec<_>>(), vec![1, 2]);

        store.restore_node(idx, node.clone()).unwrap();
        for (edge_idx, edge) in edges {
            store.restore_edge(edge_idx, edge).unwrap();
        }
        assert_eq!(store.index_of("c"), Some(2));
        assert_eq!(store.edge_count(), 3);
        assert_eq!(store.to_document(), before);
        assert!(store.restore_node(2, node).is_err());

        let (edge_idx, edge) = store.take_edge("a", "b", &RelationType::PartOf).unwrap();
        assert_eq!(edge_idx, 0);
        store.restore_edge(edge_idx, edge.clone()).unwrap();
        assert!(store.restore_edge(edge_idx, edge).is_err());
    }

    #[test]
    fn removes_undirected_edge_in_either_orientation() {
        let mut store = small_store();
        let removed = store
            .remove_edge("b", "c", &RelationType::RelatedTo)
            .unwrap();
        assert_eq!(removed.source_id, "c");
        assert!(store.remove_edge("b", "a", &RelationType::PartOf).is_err());
    }
}
