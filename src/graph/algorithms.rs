//! Traversals used by validation and incremental maintenance

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, VisitMap};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::graph::csr::{store_incidences, CsrIndex, Direction, Incidence};
use crate::graph::model::Node;
use crate::graph::store::{GraphStore, NodeIdx};
use crate::refine::{kind_key, relation_key};

/// Label of one walk step: (relation key, direction, kind key of the node reached)
pub type WalkLabel = (u64, Direction, u64);

/// Walks per original member, by label, at one depth
pub type WalkLevel = BTreeMap<WalkLabel, f64>;

/// Relative tolerance when comparing averaged walk counts
const WALK_TOLERANCE: f64 = 1e-9;

/// Incidence lists of some graph, original or compressed
pub trait IncidenceView: Sync {
    fn incidences(&self, node: NodeIdx) -> Cow<'_, [Incidence]>;

    /// Original nodes represented by `node`
    fn member_weight(&self, node: NodeIdx) -> u64;

    fn kind_key(&self, node: NodeIdx) -> u64;

    fn relation_name(&self, key: u64) -> String {
        format!("#{key:016x}")
    }

    fn kind_name(&self, key: u64) -> String {
        format!("#{key:016x}")
    }
}

impl IncidenceView for CsrIndex {
    fn incidences(&self, node: NodeIdx) -> Cow<'_, [Incidence]> {
        Cow::Borrowed(CsrIndex::incidences(self, node))
    }

    fn member_weight(&self, node: NodeIdx) -> u64 {
        self.member_weight.get(node as usize).copied().unwrap_or(1)
    }

    fn kind_key(&self, node: NodeIdx) -> u64 {
        self.kinds.get(node as usize).copied().unwrap_or(0)
    }

    fn relation_name(&self, key: u64) -> String {
        CsrIndex::relation_name(self, key)
    }

    fn kind_name(&self, key: u64) -> String {
        CsrIndex::kind_name(self, key)
    }
}

/// Incidences straight from the store, for traversals that touch only a
/// small part of a large graph
impl IncidenceView for GraphStore {
    fn incidences(&self, node: NodeIdx) -> Cow<'_, [Incidence]> {
        Cow::Owned(store_incidences(self, node))
    }

    fn member_weight(&self, node: NodeIdx) -> u64 {
        self.node_at(node).map_or(1, Node::member_weight)
    }

    fn kind_key(&self, node: NodeIdx) -> u64 {
        self.node_at(node).map_or(0, |n| kind_key(&n.kind))
    }

    fn relation_name(&self, key: u64) -> String {
        self.edges()
            .find(|(edge, _, _)| relation_key(&edge.edge_type) == key)
            .map_or_else(|| format!("#{key:016x}"), |(edge, _, _)| edge.edge_type.to_string())
    }

    fn kind_name(&self, key: u64) -> String {
        self.nodes()
            .find(|(_, node)| kind_key(&node.kind) == key)
            .map_or_else(|| format!("#{key:016x}"), |(_, node)| node.kind.to_string())
    }
}

/// Forward-reachability view of a CSR index.
/// Follows out, undirected and reflexive-loop incidences.
pub struct ReachabilityView {
    graph: DiGraph<(), ()>,
}

impl ReachabilityView {
    pub fn from_csr(csr: &CsrIndex) -> Self {
        let mut graph = DiGraph::with_capacity(csr.slot_count(), csr.entries.len());
        for _ in 0..csr.slot_count() {
            graph.add_node(());
        }
        for node in csr.live_slots() {
            let mut targets: Vec<NodeIdx> = csr
                .incidences(node)
                .iter()
                .filter(|inc| inc.direction.is_traversable())
                .map(|inc| inc.neighbor)
                .collect();
            targets.sort_unstable();
            targets.dedup();
            for target in targets {
                graph.add_edge(NodeIndex::new(node as usize), NodeIndex::new(target as usize), ());
            }
        }
        Self { graph }
    }

    /// Nodes reachable from `start` by a path of at least one edge
    pub fn reachable_from(&self, start: NodeIdx) -> Vec<bool> {
        let mut reached = vec![false; self.graph.node_count()];
        let start = NodeIndex::new(start as usize);

        let mut bfs = Bfs::new(&self.graph, start);
        bfs.stack.clear();
        bfs.discovered.clear();
        for succ in self.graph.neighbors(start) {
            if bfs.discovered.visit(succ) {
                bfs.stack.push_back(succ);
            }
        }
        while let Some(node) = bfs.next(&self.graph) {
            reached[node.index()] = true;
        }

        reached
    }
}

/// Nodes reachable from `start` by a path of `1..=hops` edges, following
/// the same incidences as [`ReachabilityView`]
pub fn reachable_within<V: IncidenceView + ?Sized>(
    view: &V,
    start: NodeIdx,
    hops: usize,
) -> HashSet<NodeIdx> {
    let mut reached = HashSet::new();
    let mut frontier = vec![start];

    for _ in 0..hops {
        let mut next = Vec::new();
        for node in frontier {
            for inc in view.incidences(node).iter() {
                if inc.direction.is_traversable() && reached.insert(inc.neighbor) {
                    next.push(inc.neighbor);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    reached
}

/// Label multisets of all walks of length 1..=depth starting at `anchor`.
///
/// Counts are per original member: a compressed node's incidence counts are
/// divided by its member weight. When every class along a walk agrees on
/// its members' neighborhoods to the remaining depth, the profile of a
/// compressed node equals the profile of any one of its members.
pub fn walk_profile<V: IncidenceView + ?Sized>(
    view: &V,
    anchor: NodeIdx,
    depth: usize,
) -> Vec<WalkLevel> {
    let mut levels = Vec::with_capacity(depth);
    let mut frontier: HashMap<NodeIdx, f64> = HashMap::from([(anchor, 1.0)]);

    for _ in 0..depth {
        let mut next: HashMap<NodeIdx, f64> = HashMap::new();
        let mut level = WalkLevel::new();

        for (&node, &walks) in &frontier {
            let members = view.member_weight(node).max(1) as f64;
            for inc in view.incidences(node).iter() {
                if !inc.direction.is_traversable() {
                    continue;
                }
                let added = walks * inc.count as f64 / members;
                *next.entry(inc.neighbor).or_insert(0.0) += added;
                let label = (inc.relation, inc.direction, view.kind_key(inc.neighbor));
                *level.entry(label).or_insert(0.0) += added;
            }
        }

        levels.push(level);
        frontier = next;
    }

    levels
}

/// First label whose walk counts differ beyond rounding, with both counts
pub fn level_mismatch(lhs: &WalkLevel, rhs: &WalkLevel) -> Option<(WalkLabel, f64, f64)> {
    let differs = |a: f64, b: f64| (a - b).abs() > WALK_TOLERANCE * a.abs().max(b.abs()).max(1.0);

    lhs.iter()
        .map(|(label, &count)| (*label, count, rhs.get(label).copied().unwrap_or(0.0)))
        .chain(
            rhs.iter()
                .filter(|(label, _)| !lhs.contains_key(*label))
                .map(|(label, &count)| (*label, 0.0, count)),
        )
        .find(|&(_, a, b)| differs(a, b))
}

/// Live nodes within `radius` hops of any seed, ignoring edge direction
pub fn k_hop_ball(store: &GraphStore, seeds: &[NodeIdx], radius: usize) -> Vec<NodeIdx> {
    let mut seen: HashSet<NodeIdx> = HashSet::new();
    let mut queue: VecDeque<(NodeIdx, usize)> = VecDeque::new();

    for &seed in seeds {
        if store.is_live(seed) && seen.insert(seed) {
            queue.push_back((seed, 0));
        }
    }

    while let Some((node, dist)) = queue.pop_front() {
        if dist == radius {
            continue;
        }
        for other in store.adjacent(node) {
            if store.is_live(other) && seen.insert(other) {
                queue.push_back((other, dist + 1));
            }
        }
    }

    let mut ball: Vec<NodeIdx> = seen.into_iter().collect();
    ball.sort_unstable();
    ball
}
