//! Patchable quotient: class membership and collapsed-edge groups kept per
//! slot, so an edit only touches the classes and edges it affects

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::graph::algorithms::IncidenceView;
use crate::graph::csr::{EdgeShape, Incidence};
use crate::graph::model::{Edge, GraphDocument, Node, RelationType};
use crate::graph::store::{EdgeIdx, GraphStore, NodeIdx};
use crate::quotient::{MappingTable, Quotient, StrengthAggregation};
use crate::refine::bisim::{BisimPartition, ClassId};
use crate::refine::{kind_key, relation_key};

/// Compressed edges are grouped by class pair, relation and directedness.
/// Undirected groups store the lower class first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GroupKey {
    from: ClassId,
    to: ClassId,
    relation: u64,
    directed: bool,
}

#[derive(Debug, Clone, Copy)]
struct Contribution {
    strength: f64,
    count: u64,
    loops: u64,
}

#[derive(Debug, Clone)]
struct EdgeGroup {
    relation: RelationType,
    /// Keyed by edge slot, so strengths combine in slot order
    contributions: BTreeMap<EdgeIdx, Contribution>,
    collapsed: u64,
    loops: u64,
}

impl EdgeGroup {
    fn shape(&self, key: &GroupKey) -> EdgeShape {
        EdgeShape {
            relation: key.relation,
            directed: key.directed,
            reflexive: self.relation.is_reflexive(),
            count: self.collapsed,
            loops: self.loops,
        }
    }
}

#[derive(Debug, Clone)]
struct ClassEntry {
    members: BTreeSet<NodeIdx>,
    /// Original nodes represented by all members
    weight: u64,
    kind: u64,
    groups: HashSet<GroupKey>,
}

#[derive(Debug, Clone, Copy)]
struct SlotEntry {
    class: ClassId,
    weight: u64,
}

/// Classes and edge groups of a quotient, addressed by internal class ids.
/// Ids are reused after [`QuotientIndex::release`];
/// [`QuotientIndex::materialize`] renumbers them by first member.
#[derive(Debug, Clone, Default)]
pub struct QuotientIndex {
    slots: Vec<Option<SlotEntry>>,
    classes: Vec<Option<ClassEntry>>,
    free: Vec<ClassId>,
    groups: HashMap<GroupKey, EdgeGroup>,
    edge_group: HashMap<EdgeIdx, GroupKey>,
    live_classes: usize,
}

impl QuotientIndex {
    /// Index a partition of `store`; internal ids equal the partition's class ids
    pub fn from_partition(store: &GraphStore, partition: &BisimPartition) -> Self {
        let mut index = Self::default();
        for members in &partition.members {
            let kind = members
                .first()
                .and_then(|&m| store.node_at(m))
                .map_or(0, |n| kind_key(&n.kind));
            let class = index.allocate(kind);
            for &member in members {
                if let Some(node) = store.node_at(member) {
                    index.assign(member, class, node.member_weight());
                }
            }
        }
        for (edge_idx, edge, source, target) in store.indexed_edges() {
            index.place_edge(edge_idx, edge, source, target);
        }
        index
    }

    /// Open an empty class for nodes of one kind
    pub fn allocate(&mut self, kind: u64) -> ClassId {
        let entry = ClassEntry {
            members: BTreeSet::new(),
            weight: 0,
            kind,
            groups: HashSet::new(),
        };
        self.live_classes += 1;
        match self.free.pop() {
            Some(class) => {
                self.classes[class as usize] = Some(entry);
                class
            }
            None => {
                self.classes.push(Some(entry));
                (self.classes.len() - 1) as ClassId
            }
        }
    }

    /// Put a slot into a class. Edges of the slot must be placed afterwards.
    pub fn assign(&mut self, slot: NodeIdx, class: ClassId, weight: u64) {
        let Some(entry) = self.classes.get_mut(class as usize).and_then(Option::as_mut) else {
            return;
        };
        entry.members.insert(slot);
        entry.weight += weight;

        let i = slot as usize;
        if self.slots.len() <= i {
            self.slots.resize(i + 1, None);
        }
        self.slots[i] = Some(SlotEntry { class, weight });
    }

    /// Take a slot out of its class; returns the class it left
    pub fn unassign(&mut self, slot: NodeIdx) -> Option<ClassId> {
        let SlotEntry { class, weight } = self.slots.get_mut(slot as usize)?.take()?;
        if let Some(entry) = self.classes.get_mut(class as usize).and_then(Option::as_mut) {
            entry.members.remove(&slot);
            entry.weight -= weight;
        }
        Some(class)
    }

    /// Drop a class once it has no members left; returns whether it was dropped
    pub fn release(&mut self, class: ClassId) -> bool {
        let empty = self
            .classes
            .get(class as usize)
            .and_then(Option::as_ref)
            .map_or(false, |entry| entry.members.is_empty() && entry.groups.is_empty());
        if empty {
            self.classes[class as usize] = None;
            self.free.push(class);
            self.live_classes -= 1;
        }
        empty
    }

    pub fn class_of(&self, slot: NodeIdx) -> Option<ClassId> {
        self.slots.get(slot as usize).copied().flatten().map(|s| s.class)
    }

    /// Lowest member slot of a class
    pub fn first_member(&self, class: ClassId) -> Option<NodeIdx> {
        self.entry(class)?.members.first().copied()
    }

    pub fn class_count(&self) -> usize {
        self.live_classes
    }

    /// Compressed edges
    pub fn edge_count(&self) -> usize {
        self.groups.len()
    }

    fn entry(&self, class: ClassId) -> Option<&ClassEntry> {
        self.classes.get(class as usize)?.as_ref()
    }

    /// File an edge under the group of its endpoints' current classes.
    /// Moves it when it sits in another group; no-op when unchanged.
    pub fn place_edge(&mut self, edge_idx: EdgeIdx, edge: &Edge, source: NodeIdx, target: NodeIdx) {
        let (Some(mut from), Some(mut to)) = (self.class_of(source), self.class_of(target)) else {
            self.remove_edge(edge_idx);
            return;
        };
        let directed = edge.is_directed();
        if !directed && from > to {
            std::mem::swap(&mut from, &mut to);
        }
        let key = GroupKey {
            from,
            to,
            relation: relation_key(&edge.edge_type),
            directed,
        };
        if self.edge_group.get(&edge_idx) == Some(&key) {
            return;
        }
        self.remove_edge(edge_idx);

        let group = self.groups.entry(key).or_insert_with(|| EdgeGroup {
            relation: edge.edge_type.clone(),
            contributions: BTreeMap::new(),
            collapsed: 0,
            loops: 0,
        });
        let contribution = Contribution {
            strength: edge.strength,
            count: edge.multiplicity(),
            loops: edge.genuine_loops(),
        };
        group.contributions.insert(edge_idx, contribution);
        group.collapsed += contribution.count;
        group.loops += contribution.loops;
        self.edge_group.insert(edge_idx, key);

        for class in [from, to] {
            if let Some(entry) = self.classes.get_mut(class as usize).and_then(Option::as_mut) {
                entry.groups.insert(key);
            }
        }
    }

    /// Withdraw an edge's contribution; no-op for unknown slots
    pub fn remove_edge(&mut self, edge_idx: EdgeIdx) {
        let Some(key) = self.edge_group.remove(&edge_idx) else {
            return;
        };
        let Some(group) = self.groups.get_mut(&key) else {
            return;
        };
        if let Some(contribution) = group.contributions.remove(&edge_idx) {
            group.collapsed -= contribution.count;
            group.loops -= contribution.loops;
        }
        if !group.contributions.is_empty() {
            return;
        }

        self.groups.remove(&key);
        for class in [key.from, key.to] {
            if let Some(entry) = self.classes.get_mut(class as usize).and_then(Option::as_mut) {
                entry.groups.remove(&key);
            }
        }
    }

    /// Build the compressed document and mapping table. Classes are numbered
    /// by their lowest member slot.
    pub fn materialize(&self, store: &GraphStore, aggregation: StrengthAggregation) -> Quotient {
        let mut order: Vec<(NodeIdx, ClassId)> = self
            .classes
            .iter()
            .enumerate()
            .filter_map(|(class, entry)| {
                let first = entry.as_ref()?.members.first()?;
                Some((*first, class as ClassId))
            })
            .collect();
        order.sort_unstable();

        let mut dense: HashMap<ClassId, ClassId> = HashMap::with_capacity(order.len());
        let mut nodes = Vec::with_capacity(order.len());
        let mut mapping = MappingTable::default();

        for (_, class) in order {
            let Some(entry) = self.entry(class) else {
                continue;
            };
            let member_nodes: Vec<&Node> =
                entry.members.iter().filter_map(|&idx| store.node_at(idx)).collect();
            let Some(representative) = member_nodes.first() else {
                continue;
            };

            let mut node = (*representative).clone();
            node.confidence = member_nodes
                .iter()
                .map(|n| n.confidence)
                .fold(0.0, f64::max);
            node.source_members = member_nodes
                .iter()
                .flat_map(|n| {
                    if n.source_members.is_empty() {
                        vec![n.id.clone()]
                    } else {
                        n.source_members.clone()
                    }
                })
                .collect();

            let id = mapping.representatives.len() as ClassId;
            dense.insert(class, id);
            let ids: Vec<String> = member_nodes.iter().map(|n| n.id.clone()).collect();
            for member in &ids {
                mapping.class_of.insert(member.clone(), id);
            }
            mapping.members.push(ids);
            mapping.representatives.push(node.id.clone());
            nodes.push(node);
        }

        let mut keyed: Vec<((ClassId, ClassId, &str, bool), &EdgeGroup)> = self
            .groups
            .iter()
            .filter_map(|(key, group)| {
                let mut from = *dense.get(&key.from)?;
                let mut to = *dense.get(&key.to)?;
                if !key.directed && from > to {
                    std::mem::swap(&mut from, &mut to);
                }
                Some(((from, to, group.relation.as_str(), key.directed), group))
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let edges: Vec<Edge> = keyed
            .into_iter()
            .map(|((from, to, _, directed), group)| {
                let contributions: Vec<(f64, u64)> = group
                    .contributions
                    .values()
                    .map(|c| (c.strength, c.count))
                    .collect();
                Edge {
                    source_id: mapping.representatives[from as usize].clone(),
                    target_id: mapping.representatives[to as usize].clone(),
                    edge_type: group.relation.clone(),
                    strength: aggregation.combine(&contributions),
                    directed,
                    collapsed_count: Some(group.collapsed),
                    loop_count: group.loops,
                }
            })
            .collect();

        Quotient {
            graph: GraphDocument::new(nodes, edges),
            mapping,
        }
    }
}

/// Compressed graph seen through internal class ids
impl IncidenceView for QuotientIndex {
    fn incidences(&self, node: NodeIdx) -> Cow<'_, [Incidence]> {
        let mut incidences = Vec::new();
        let Some(entry) = self.entry(node) else {
            return Cow::Owned(incidences);
        };
        for key in &entry.groups {
            let Some(group) = self.groups.get(key) else {
                continue;
            };
            let shape = group.shape(key);
            if key.from == node {
                shape.push_outgoing(&mut incidences, node, key.to);
            }
            if key.to == node {
                shape.push_incoming(&mut incidences, node, key.from);
            }
        }
        Cow::Owned(incidences)
    }

    fn member_weight(&self, node: NodeIdx) -> u64 {
        self.entry(node).map_or(1, |e| e.weight)
    }

    fn kind_key(&self, node: NodeIdx) -> u64 {
        self.entry(node).map_or(0, |e| e.kind)
    }
}
