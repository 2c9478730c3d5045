//! Compressed sparse row incidence index
//!
//! Refinement rounds and validator traversals run over this flattened,
//! read-only view of a [`GraphStore`]. Every node slot owns a contiguous
//! range of [`Incidence`] entries; `offsets[i]..offsets[i + 1]` is the
//! range for slot `i`.

use rayon::prelude::*;
use std::collections::HashMap;
use std::mem;

use crate::graph::model::{Edge, NodeKind, RelationType};
use crate::graph::store::{GraphStore, NodeIdx};
use crate::refine::{kind_key, relation_key};

/// How an incidence is seen from the node that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Direction {
    Out = 0,
    In = 1,
    Undirected = 2,
    /// Self-loop of a reflexive relation
    Loop = 3,
}

impl Direction {
    /// Whether a forward traversal may follow this incidence
    pub fn is_traversable(self) -> bool {
        !matches!(self, Direction::In)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Out => "out",
            Direction::In => "in",
            Direction::Undirected => "undirected",
            Direction::Loop => "loop",
        }
    }
}

/// One endpoint's view of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Incidence {
    /// Stable hash of the relation label
    pub relation: u64,
    pub direction: Direction,
    pub neighbor: NodeIdx,
    /// Original edges represented, summed over all members of the owning node
    pub count: u64,
}

/// The parts of an edge that shape its incidences
#[derive(Debug, Clone, Copy)]
pub(crate) struct EdgeShape {
    pub relation: u64,
    pub directed: bool,
    pub reflexive: bool,
    /// Original edges represented
    pub count: u64,
    /// Genuine self-loops among them
    pub loops: u64,
}

impl EdgeShape {
    pub fn of(edge: &Edge) -> Self {
        Self {
            relation: relation_key(&edge.edge_type),
            directed: edge.is_directed(),
            reflexive: edge.edge_type.is_reflexive(),
            count: edge.multiplicity(),
            loops: edge.genuine_loops(),
        }
    }

    /// Incidences of an edge leaving `owner` towards `target`
    pub fn push_outgoing(&self, incidences: &mut Vec<Incidence>, owner: NodeIdx, target: NodeIdx) {
        if owner != target {
            let direction = if self.directed {
                Direction::Out
            } else {
                Direction::Undirected
            };
            incidences.push(Incidence {
                relation: self.relation,
                direction,
                neighbor: target,
                count: self.count,
            });
            return;
        }

        let intra = self.count.saturating_sub(self.loops);
        if intra > 0 {
            if self.directed {
                for direction in [Direction::Out, Direction::In] {
                    incidences.push(Incidence {
                        relation: self.relation,
                        direction,
                        neighbor: owner,
                        count: intra,
                    });
                }
            } else {
                incidences.push(Incidence {
                    relation: self.relation,
                    direction: Direction::Undirected,
                    neighbor: owner,
                    count: 2 * intra,
                });
            }
        }
        if self.loops > 0 && self.reflexive {
            incidences.push(Incidence {
                relation: self.relation,
                direction: Direction::Loop,
                neighbor: owner,
                count: self.loops,
            });
        }
    }

    /// Incidence of an edge entering `owner` from `source`. Self-edges are
    /// fully covered by [`EdgeShape::push_outgoing`].
    pub fn push_incoming(&self, incidences: &mut Vec<Incidence>, owner: NodeIdx, source: NodeIdx) {
        if owner == source {
            return;
        }
        let direction = if self.directed {
            Direction::In
        } else {
            Direction::Undirected
        };
        incidences.push(Incidence {
            relation: self.relation,
            direction,
            neighbor: source,
            count: self.count,
        });
    }
}

/// Incidences of one node, derived directly from the store.
///
/// Non-reflexive self-loops are dropped. Edges between two members of the
/// same compressed node (`collapsed_count - loop_count`) are kept as
/// out/in (or undirected) incidences on the node itself.
pub fn store_incidences(store: &GraphStore, idx: NodeIdx) -> Vec<Incidence> {
    let mut incidences = Vec::new();
    if !store.is_live(idx) {
        return incidences;
    }

    for &edge_idx in store.outgoing(idx) {
        if let Some((edge, _, target)) = store.edge_at(edge_idx) {
            EdgeShape::of(edge).push_outgoing(&mut incidences, idx, target);
        }
    }
    for &edge_idx in store.incoming(idx) {
        if let Some((edge, source, _)) = store.edge_at(edge_idx) {
            EdgeShape::of(edge).push_incoming(&mut incidences, idx, source);
        }
    }

    incidences
}

/// Flattened incidence lists plus the per-node data refinement needs
#[derive(Debug, Clone)]
pub struct CsrIndex {
    /// offsets[i]..offsets[i + 1] is the incidence range of slot i
    pub offsets: Vec<usize>,

    /// Concatenated incidence lists
    pub entries: Vec<Incidence>,

    /// Whether each slot holds a live node
    pub live: Vec<bool>,

    /// Kind hash per slot
    pub kinds: Vec<u64>,

    pub confidence: Vec<f64>,

    /// Original nodes represented by each slot
    pub member_weight: Vec<u64>,

    relation_names: HashMap<u64, RelationType>,
    kind_names: HashMap<u64, NodeKind>,
}

impl CsrIndex {
    pub fn from_store(store: &GraphStore) -> Self {
        let slot_count = store.slot_count();

        let lists: Vec<Vec<Incidence>> = (0..slot_count)
            .into_par_iter()
            .map(|slot| store_incidences(store, slot as NodeIdx))
            .collect();

        let total: usize = lists.iter().map(Vec::len).sum();
        let mut offsets = Vec::with_capacity(slot_count + 1);
        let mut entries = Vec::with_capacity(total);
        offsets.push(0);
        for list in lists {
            entries.extend(list);
            offsets.push(entries.len());
        }

        let mut live = vec![false; slot_count];
        let mut kinds = vec![0; slot_count];
        let mut confidence = vec![0.0; slot_count];
        let mut member_weight = vec![1; slot_count];
        let mut kind_names = HashMap::new();
        for (idx, node) in store.nodes() {
            let i = idx as usize;
            live[i] = true;
            kinds[i] = kind_key(&node.kind);
            confidence[i] = node.confidence;
            member_weight[i] = node.member_weight();
            kind_names.entry(kinds[i]).or_insert_with(|| node.kind.clone());
        }

        let relation_names = store
            .edges()
            .map(|(edge, _, _)| (relation_key(&edge.edge_type), edge.edge_type.clone()))
            .collect();

        Self {
            offsets,
            entries,
            live,
            kinds,
            confidence,
            member_weight,
            relation_names,
            kind_names,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.live.len()
    }

    /// Live slots in order
    pub fn live_slots(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        self.live
            .iter()
            .enumerate()
            .filter(|(_, &alive)| alive)
            .map(|(i, _)| i as NodeIdx)
    }

    pub fn incidences(&self, node: NodeIdx) -> &[Incidence] {
        let start = self.offsets[node as usize];
        let end = self.offsets[node as usize + 1];
        &self.entries[start..end]
    }

    pub fn degree(&self, node: NodeIdx) -> usize {
        self.offsets[node as usize + 1] - self.offsets[node as usize]
    }

    pub fn relation_name(&self, key: u64) -> String {
        self.relation_names
            .get(&key)
            .map_or_else(|| format!("#{key:016x}"), |r| r.to_string())
    }

    pub fn kind_name(&self, key: u64) -> String {
        self.kind_names
            .get(&key)
            .map_or_else(|| format!("#{key:016x}"), |k| k.to_string())
    }

    /// Estimate memory usage in bytes
    pub fn memory_usage(&self) -> usize {
        mem::size_of::<Self>()
            + self.offsets.capacity() * mem::size_of::<usize>()
            + self.entries.capacity() * mem::size_of::<Incidence>()
            + self.live.capacity()
            + self.kinds.capacity() * mem::size_of::<u64>()
            + self.confidence.capacity() * mem::size_of::<f64>()
            + self.member_weight.capacity() * mem::size_of::<u64>()
    }
}
