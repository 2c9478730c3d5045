//! Incremental maintenance of a compression under graph edits
//!
//! Every refinement round of the last full run is kept. After an edit only
//! the nodes within `k` hops of the touched nodes are recolored, through all
//! rounds, while every other node keeps its recorded colors. Recolored nodes
//! move between classes of a [`QuotientIndex`] and only their edges are
//! regrouped, so an update costs in proportion to the edited region.
//! Localized colors can drift from what a full run would produce;
//! [`IncrementalUpdater::audit`] detects that and replaces the state with a
//! full recompute.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

use crate::config::Config;
use crate::error::{MalformedInput, Result, Warning};
use crate::graph::algorithms::k_hop_ball;
use crate::graph::csr::{store_incidences, Incidence};
use crate::graph::model::{Edge, Node, RelationType};
use crate::graph::store::{EdgeIdx, GraphStore, NodeIdx};
use crate::pipeline::Compressor;
use crate::quotient::{Quotient, QuotientIndex};
use crate::refine::bisim::{BisimPartition, ClassId};
use crate::refine::regions::group_regions;
use crate::refine::{initial_color, kind_key, refine_color, Color};
use crate::validate::{ClassLookup, RegionCounts, Validator, VerificationReport};

/// One graph edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GraphChange {
    AddNode(Node),
    RemoveNode {
        id: String,
    },
    AddEdge(Edge),
    RemoveEdge {
        source_id: String,
        target_id: String,
        edge_type: RelationType,
    },
}

/// Edits applied together; either all succeed or none do
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<GraphChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(mut self, node: Node) -> Self {
        self.changes.push(GraphChange::AddNode(node));
        self
    }

    pub fn remove_node(mut self, id: impl Into<String>) -> Self {
        self.changes.push(GraphChange::RemoveNode { id: id.into() });
        self
    }

    pub fn add_edge(mut self, edge: Edge) -> Self {
        self.changes.push(GraphChange::AddEdge(edge));
        self
    }

    pub fn remove_edge(
        mut self,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        edge_type: impl Into<RelationType>,
    ) -> Self {
        self.changes.push(GraphChange::RemoveEdge {
            source_id: source_id.into(),
            target_id: target_id.into(),
            edge_type: edge_type.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// What an update touched and how it validated
#[derive(Debug, Clone)]
pub struct UpdateSummary {
    /// Nodes recolored
    pub affected_nodes: usize,
    /// Independent region groups refined in parallel
    pub regions: usize,
    /// Whether region validation failed and a full run replaced the state
    pub full_recompute: bool,
    pub report: VerificationReport,
    pub warnings: Vec<Warning>,
}

/// Comparison of the maintained partition with a full recompute
#[derive(Debug, Clone, PartialEq)]
pub struct AuditOutcome {
    pub consistent: bool,
    pub divergent_nodes: usize,
    pub incremental_classes: usize,
    pub full_classes: usize,
    pub warning: Option<Warning>,
}

/// Nodes and edges affected by an applied batch
#[derive(Default)]
struct Touched {
    /// Live nodes whose neighborhood changed
    live: Vec<NodeIdx>,
    /// Slots emptied by the batch
    removed: Vec<NodeIdx>,
    added_edges: Vec<EdgeIdx>,
    removed_edges: Vec<EdgeIdx>,
}

/// Undo record for one applied edit
enum Applied {
    AddedNode(String),
    RemovedNode(NodeIdx, Node, Vec<(EdgeIdx, Edge)>),
    AddedEdge(EdgeIdx),
    RemovedEdge(EdgeIdx, Edge),
}

/// Colors of every round plus the classes they induce
#[derive(Debug)]
struct TrackedPartition {
    history: Vec<Vec<Color>>,
    orbit_rounds: usize,
    k: usize,
    stable: bool,
    /// Live nodes per color in the last two rounds, oldest first
    populations: Vec<HashMap<Color, usize>>,
    class_by_color: HashMap<Color, ClassId>,
    color_of_class: HashMap<ClassId, Color>,
    index: QuotientIndex,
}

impl TrackedPartition {
    fn new(store: &GraphStore, partition: BisimPartition) -> Self {
        let index = QuotientIndex::from_partition(store, &partition);

        let colors = partition.colors();
        let mut class_by_color = HashMap::with_capacity(partition.class_count());
        let mut color_of_class = HashMap::with_capacity(partition.class_count());
        for (class, members) in partition.members.iter().enumerate() {
            if let Some(&first) = members.first() {
                class_by_color.insert(colors[first as usize], class as ClassId);
                color_of_class.insert(class as ClassId, colors[first as usize]);
            }
        }

        let mut tracked = Self {
            history: partition.history,
            orbit_rounds: partition.orbit_rounds,
            k: partition.k,
            stable: partition.stable,
            populations: Vec::new(),
            class_by_color,
            color_of_class,
            index,
        };
        tracked.populations = tracked
            .tracked_rounds()
            .map(|round| {
                let mut counts = HashMap::new();
                for (slot, _) in store.nodes() {
                    *counts.entry(tracked.history[round][slot as usize]).or_insert(0) += 1;
                }
                counts
            })
            .collect();
        tracked
    }

    fn tracked_rounds(&self) -> Range<usize> {
        self.history.len().saturating_sub(2)..self.history.len()
    }

    fn final_color(&self, slot: NodeIdx) -> Option<Color> {
        self.history.last()?.get(slot as usize).copied()
    }

    /// Move a slot's colors out of the population counts
    fn forget(&mut self, slot: NodeIdx) {
        let rounds = self.tracked_rounds();
        for (population, round) in self.populations.iter_mut().zip(rounds) {
            let color = self.history[round][slot as usize];
            if let Some(count) = population.get_mut(&color) {
                *count -= 1;
                if *count == 0 {
                    population.remove(&color);
                }
            }
        }
    }

    fn count(&mut self, slot: NodeIdx) {
        let rounds = self.tracked_rounds();
        for (population, round) in self.populations.iter_mut().zip(rounds) {
            *population.entry(self.history[round][slot as usize]).or_insert(0) += 1;
        }
    }

    /// Write recolored nodes into the history and patch classes and edge
    /// groups around them
    fn update(
        &mut self,
        store: &GraphStore,
        recolored: Vec<(NodeIdx, Vec<Color>)>,
        touched: &Touched,
    ) {
        for round in self.history.iter_mut() {
            round.resize(store.slot_count(), 0);
        }

        let mut left: Vec<ClassId> = Vec::new();
        for &slot in &touched.removed {
            if let Some(class) = self.index.unassign(slot) {
                self.forget(slot);
                left.push(class);
            }
            for round in self.history.iter_mut() {
                round[slot as usize] = 0;
            }
        }
        for (node, colors) in &recolored {
            if let Some(class) = self.index.unassign(*node) {
                self.forget(*node);
                left.push(class);
            }
            for (round, &color) in colors.iter().enumerate() {
                self.history[round][*node as usize] = color;
            }
        }

        for (node, _) in &recolored {
            let (Some(data), Some(color)) = (store.node_at(*node), self.final_color(*node)) else {
                continue;
            };
            self.count(*node);
            let class = match self.class_by_color.get(&color) {
                Some(&class) => class,
                None => {
                    let class = self.index.allocate(kind_key(&data.kind));
                    self.class_by_color.insert(color, class);
                    self.color_of_class.insert(class, color);
                    class
                }
            };
            self.index.assign(*node, class, data.member_weight());
        }

        for &edge_idx in &touched.removed_edges {
            self.index.remove_edge(edge_idx);
        }
        let mut moved: BTreeSet<EdgeIdx> = touched.added_edges.iter().copied().collect();
        for (node, _) in &recolored {
            moved.extend(store.outgoing(*node));
            moved.extend(store.incoming(*node));
        }
        for edge_idx in moved {
            if let Some((edge, source, target)) = store.edge_at(edge_idx) {
                self.index.place_edge(edge_idx, edge, source, target);
            }
        }

        for class in left {
            if self.index.release(class) {
                if let Some(color) = self.color_of_class.remove(&class) {
                    self.class_by_color.remove(&color);
                }
            }
        }

        if let [previous, last] = self.populations.as_slice() {
            self.stable = previous.len() == last.len();
        }
    }

    /// Class of each slot, numbered by first appearance in slot order
    fn canonical_classes(&self, slot_count: usize) -> Vec<Option<ClassId>> {
        let mut dense: HashMap<ClassId, ClassId> = HashMap::new();
        (0..slot_count)
            .map(|slot| {
                let class = self.index.class_of(slot as NodeIdx)?;
                let next = dense.len() as ClassId;
                Some(*dense.entry(class).or_insert(next))
            })
            .collect()
    }

    fn counts(&self) -> RegionCounts {
        RegionCounts {
            nodes: self.index.class_count(),
            edges: self.index.edge_count(),
            rounds: self.orbit_rounds + self.k,
            stable: self.stable,
        }
    }
}

/// Internal class ids, with coarse colors taken from the orbit round
impl ClassLookup for TrackedPartition {
    fn class_of(&self, node: NodeIdx) -> Option<ClassId> {
        self.index.class_of(node)
    }

    fn member_of(&self, class: ClassId) -> Option<NodeIdx> {
        self.index.first_member(class)
    }

    fn coarse_color(&self, node: NodeIdx) -> Color {
        self.history
            .get(self.orbit_rounds)
            .and_then(|round| round.get(node as usize))
            .copied()
            .unwrap_or(0)
    }
}

/// Disagreement between the maintained partition and a full run
struct Drift {
    divergent_nodes: usize,
    incremental_classes: usize,
    full_classes: usize,
}

impl Drift {
    fn warning(&self) -> Warning {
        Warning::IncrementalDrift {
            divergent_nodes: self.divergent_nodes,
            incremental_classes: self.incremental_classes,
            full_classes: self.full_classes,
        }
    }
}

/// Owns a store and keeps its compression current under edits
#[derive(Debug)]
pub struct IncrementalUpdater {
    compressor: Compressor,
    store: GraphStore,
    tracked: TrackedPartition,
    report: VerificationReport,
}

impl IncrementalUpdater {
    /// Run a full compression of `store` and keep every round for later edits
    pub fn new(config: Config, store: GraphStore) -> Result<Self> {
        let compressor = Compressor::new(config)?;
        let run = compressor.run(&store, true)?;
        let tracked = TrackedPartition::new(&store, run.partition);
        Ok(Self {
            compressor,
            store,
            tracked,
            report: run.report,
        })
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Compressed nodes currently maintained
    pub fn class_count(&self) -> usize {
        self.tracked.index.class_count()
    }

    /// Build the compressed graph and mapping table. This walks the whole
    /// quotient; edits themselves never do.
    pub fn quotient(&self) -> Quotient {
        self.tracked
            .index
            .materialize(&self.store, self.compressor.config().aggregation)
    }

    pub fn report(&self) -> &VerificationReport {
        &self.report
    }

    pub fn apply(&mut self, changes: ChangeSet) -> Result<UpdateSummary> {
        self.apply_batch(vec![changes])
    }

    /// Apply several change-sets at once. Regions that overlap or touch are
    /// refined together; the rest are refined in parallel.
    pub fn apply_batch(&mut self, batch: Vec<ChangeSet>) -> Result<UpdateSummary> {
        let touched = self.apply_changes(batch)?;
        let config = self.compressor.config();
        let k = config.k;

        let region = k_hop_ball(&self.store, &touched.live, k);
        let groups = group_regions(&self.store, &region);
        log::info!(
            "Recoloring {} nodes in {} region groups",
            region.len(),
            groups.len()
        );

        let buckets = config.confidence_buckets;
        let history = &self.tracked.history;
        let store = &self.store;
        let recolored: Vec<(NodeIdx, Vec<Color>)> = groups
            .par_iter()
            .map(|group| recolor_group(store, history, buckets, group))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect();
        self.tracked.update(&self.store, recolored, &touched);

        let report = Validator::new(config.validation.clone(), k).verify_region(
            &self.store,
            &self.tracked.index,
            &self.tracked,
            &region,
            k,
            &self.report,
            self.tracked.counts(),
        );

        let mut summary = UpdateSummary {
            affected_nodes: region.len(),
            regions: groups.len(),
            full_recompute: false,
            report: report.clone(),
            warnings: Vec::new(),
        };

        if report.is_clean() {
            self.report = report;
        } else {
            let warning = self.recompute_full()?.warning();
            log::warn!("{}", warning);
            summary.full_recompute = true;
            summary.report = self.report.clone();
            summary.warnings.push(warning);
        }

        Ok(summary)
    }

    /// Compare the maintained partition with a full recompute. On
    /// disagreement the full result replaces the maintained state.
    pub fn audit(&mut self) -> Result<AuditOutcome> {
        let drift = self.recompute_full()?;
        let consistent = drift.divergent_nodes == 0;
        let warning = drift.warning();
        if consistent {
            log::info!("Audit found the incremental partition consistent");
        } else {
            log::warn!("{}", warning);
        }

        Ok(AuditOutcome {
            consistent,
            divergent_nodes: drift.divergent_nodes,
            incremental_classes: drift.incremental_classes,
            full_classes: drift.full_classes,
            warning: (!consistent).then_some(warning),
        })
    }

    /// Replace the state with a full run
    fn recompute_full(&mut self) -> Result<Drift> {
        let run = self.compressor.run(&self.store, true)?;
        let maintained = self.tracked.canonical_classes(self.store.slot_count());
        let drift = Drift {
            divergent_nodes: divergence(&maintained, &run.partition.class_of),
            incremental_classes: self.class_count(),
            full_classes: run.partition.class_count(),
        };

        self.tracked = TrackedPartition::new(&self.store, run.partition);
        self.report = run.report;
        Ok(drift)
    }

    /// Apply every change to the store, rolling all of them back on the
    /// first failure
    fn apply_changes(&mut self, batch: Vec<ChangeSet>) -> Result<Touched> {
        let mut applied: Vec<Applied> = Vec::new();
        let mut touched = Touched::default();

        for change in batch.into_iter().flat_map(|set| set.changes) {
            match self.apply_change(change, &mut touched.live) {
                Ok(undo) => applied.push(undo),
                Err(err) => {
                    self.roll_back(applied);
                    return Err(err);
                }
            }
        }

        for undo in &applied {
            match undo {
                Applied::RemovedNode(idx, _, edges) => {
                    touched.removed.push(*idx);
                    touched.removed_edges.extend(edges.iter().map(|(e, _)| *e));
                }
                Applied::AddedEdge(edge_idx) => touched.added_edges.push(*edge_idx),
                Applied::RemovedEdge(edge_idx, _) => touched.removed_edges.push(*edge_idx),
                Applied::AddedNode(_) => {}
            }
        }
        touched.removed.retain(|&idx| !self.store.is_live(idx));
        touched.live.retain(|&idx| self.store.is_live(idx));
        touched.live.sort_unstable();
        touched.live.dedup();
        Ok(touched)
    }

    fn apply_change(&mut self, change: GraphChange, touched: &mut Vec<NodeIdx>) -> Result<Applied> {
        match change {
            GraphChange::AddNode(node) => {
                let id = node.id.clone();
                touched.push(self.store.add_node(node)?);
                Ok(Applied::AddedNode(id))
            }
            GraphChange::RemoveNode { id } => {
                let idx = self
                    .store
                    .index_of(&id)
                    .ok_or_else(|| MalformedInput::UnknownNode { id: id.clone() })?;
                touched.extend(self.store.adjacent(idx));
                let (idx, node, edges) = self.store.take_node(&id)?;
                Ok(Applied::RemovedNode(idx, node, edges))
            }
            GraphChange::AddEdge(edge) => {
                let edge_idx = self.store.add_edge(edge)?;
                if let Some((_, source, target)) = self.store.edge_at(edge_idx) {
                    touched.extend([source, target]);
                }
                Ok(Applied::AddedEdge(edge_idx))
            }
            GraphChange::RemoveEdge {
                source_id,
                target_id,
                edge_type,
            } => {
                let (edge_idx, edge) = self.store.take_edge(&source_id, &target_id, &edge_type)?;
                touched.extend(
                    [&edge.source_id, &edge.target_id]
                        .into_iter()
                        .filter_map(|id| self.store.index_of(id)),
                );
                Ok(Applied::RemovedEdge(edge_idx, edge))
            }
        }
    }

    /// Undo applied edits in reverse, putting removed entries back into
    /// their former slots
    fn roll_back(&mut self, applied: Vec<Applied>) {
        log::debug!("Rolling back {} applied changes", applied.len());
        for undo in applied.into_iter().rev() {
            let restored = match undo {
                Applied::AddedNode(id) => self.store.remove_node(&id).map(|_| ()),
                Applied::RemovedNode(idx, node, edges) => {
                    self.store.restore_node(idx, node).and_then(|()| {
                        edges
                            .into_iter()
                            .try_for_each(|(edge_idx, edge)| self.store.restore_edge(edge_idx, edge))
                    })
                }
                Applied::AddedEdge(edge_idx) => {
                    self.store.remove_edge_at(edge_idx);
                    Ok(())
                }
                Applied::RemovedEdge(edge_idx, edge) => self.store.restore_edge(edge_idx, edge),
            };
            if let Err(err) = restored {
                log::error!("Rollback step failed: {}", err);
            }
        }
    }
}

/// Recolor one region group through every recorded round. Neighbors outside
/// the group contribute their recorded colors.
fn recolor_group(
    store: &GraphStore,
    history: &[Vec<Color>],
    buckets: u32,
    group: &[NodeIdx],
) -> Vec<(NodeIdx, Vec<Color>)> {
    let position: HashMap<NodeIdx, usize> =
        group.iter().enumerate().map(|(pos, &n)| (n, pos)).collect();
    let incidences: Vec<Vec<Incidence>> =
        group.iter().map(|&n| store_incidences(store, n)).collect();
    let weights: Vec<u64> = group
        .iter()
        .map(|&n| store.node_at(n).map_or(1, Node::member_weight))
        .collect();

    let rounds = history.len();
    let mut local: Vec<Vec<Color>> = group
        .iter()
        .map(|&n| {
            let mut colors = vec![0; rounds];
            if let (Some(node), Some(first)) = (store.node_at(n), colors.first_mut()) {
                *first = initial_color(kind_key(&node.kind), node.confidence, buckets);
            }
            colors
        })
        .collect();

    for round in 1..rounds {
        for pos in 0..group.len() {
            let color = refine_color(
                local[pos][round - 1],
                &incidences[pos],
                weights[pos],
                |neighbor| match position.get(&neighbor) {
                    Some(&p) => local[p][round - 1],
                    None => history[round - 1]
                        .get(neighbor as usize)
                        .copied()
                        .unwrap_or(0),
                },
            );
            local[pos][round] = color;
        }
    }

    group.iter().copied().zip(local).collect()
}

/// Live slots whose class differs between two partitions of one store
fn divergence(lhs: &[Option<u32>], rhs: &[Option<u32>]) -> usize {
    let len = lhs.len().max(rhs.len());
    (0..len)
        .filter(|&i| lhs.get(i).copied().flatten() != rhs.get(i).copied().flatten())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompressError;

    fn star(prefix: &str, hub_kind: &str, leaves: usize) -> Vec<GraphChange> {
        let hub = format!("{prefix}hub");
        let mut changes = vec![GraphChange::AddNode(Node::new(hub.clone(), hub_kind, 0.9))];
        for i in 0..leaves {
            let leaf = format!("{prefix}leaf{i}");
            changes.push(GraphChange::AddNode(Node::new(leaf.clone(), "entity", 0.5)));
            changes.push(GraphChange::AddEdge(Edge::new(hub.clone(), leaf, "part_of")));
        }
        changes
    }

    fn store_from(changes: Vec<GraphChange>) -> GraphStore {
        let mut store = GraphStore::new();
        for change in changes {
            match change {
                GraphChange::AddNode(node) => {
                    store.add_node(node).unwrap();
                }
                GraphChange::AddEdge(edge) => {
                    store.add_edge(edge).unwrap();
                }
                _ => unreachable!(),
            }
        }
        store
    }

    fn full_compression(updater: &IncrementalUpdater) -> crate::pipeline::CompressionOutcome {
        Compressor::new(Config::new(2))
            .unwrap()
            .compress(updater.store())
            .unwrap()
    }

    fn directed_path(store: &mut GraphStore, prefix: &str, len: usize) {
        for i in 0..len {
            store
                .add_node(Node::new(format!("{prefix}{i}"), "entity", 0.5))
                .unwrap();
        }
        for i in 1..len {
            store
                .add_edge(Edge::new(
                    format!("{prefix}{}", i - 1),
                    format!("{prefix}{i}"),
                    "causes",
                ))
                .unwrap();
        }
    }

    #[test]
    fn new_leaf_joins_the_leaf_class() {
        let store = store_from(star("", "concept", 3));
        let mut updater = IncrementalUpdater::new(Config::new(2), store).unwrap();
        assert_eq!(updater.class_count(), 2);

        let summary = updater
            .apply(
                ChangeSet::new()
                    .add_node(Node::new("leaf3", "entity", 0.5))
                    .add_edge(Edge::new("hub", "leaf3", "part_of")),
            )
            .unwrap();

        assert!(!summary.full_recompute);
        assert!(summary.report.is_clean());
        assert_eq!(summary.regions, 1);
        assert_eq!(updater.class_count(), 2);
        assert_eq!(updater.quotient().mapping.compressed_id("leaf3"), Some("leaf0"));
        assert_eq!(updater.quotient().graph.edges[0].collapsed_count, Some(4));
        assert!(updater.audit().unwrap().consistent);
    }

    #[test]
    fn removed_node_leaves_the_mapping() {
        let store = store_from(star("", "concept", 3));
        let mut updater = IncrementalUpdater::new(Config::new(2), store).unwrap();

        updater.apply(ChangeSet::new().remove_node("leaf1")).unwrap();

        assert_eq!(updater.quotient().mapping.class_of("leaf1"), None);
        assert_eq!(updater.quotient().mapping.members(1), ["leaf0", "leaf2"]);
        assert_eq!(updater.quotient().graph.edges[0].collapsed_count, Some(2));
        assert!(updater.audit().unwrap().consistent);
    }

    #[test]
    fn failed_change_set_is_rolled_back() {
        let store = store_from(star("", "concept", 2));
        let mut updater = IncrementalUpdater::new(Config::new(2), store).unwrap();
        let before = updater.store().to_document();

        let err = updater
            .apply(
                ChangeSet::new()
                    .remove_node("leaf0")
                    .add_node(Node::new("x", "claim", 0.5))
                    .add_edge(Edge::new("x", "missing", "supports")),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            CompressError::MalformedInput(MalformedInput::DanglingEdge { .. })
        ));
        assert_eq!(updater.store().to_document(), before);
        assert_eq!(updater.store().index_of("leaf0"), Some(1));

        // restored edges keep their slots, so later edits still find them
        updater.apply(ChangeSet::new().remove_node("leaf0")).unwrap();
        assert_eq!(updater.quotient().graph, full_compression(&updater).compressed);
        assert_eq!(updater.quotient().graph.edges[0].collapsed_count, Some(1));
    }

    #[test]
    fn patched_quotient_matches_a_full_run() {
        let store = store_from(star("", "concept", 3));
        let mut updater = IncrementalUpdater::new(Config::new(2), store).unwrap();

        updater
            .apply(
                ChangeSet::new()
                    .add_node(Node::new("leaf3", "entity", 0.5))
                    .add_edge(Edge::new("hub", "leaf3", "part_of").with_strength(0.4)),
            )
            .unwrap();
        updater.apply(ChangeSet::new().remove_node("leaf1")).unwrap();
        let summary = updater
            .apply(ChangeSet::new().add_edge(Edge::new("leaf2", "leaf0", "related_to")))
            .unwrap();
        assert!(!summary.full_recompute);

        let full = full_compression(&updater);
        let quotient = updater.quotient();
        assert_eq!(quotient.graph, full.compressed);
        assert_eq!(quotient.mapping, full.mapping);
        assert_eq!(updater.class_count(), 3);
        assert_eq!(summary.report.compressed_node_count, 3);
        assert_eq!(summary.report.compressed_edge_count, 3);
        assert!(updater.audit().unwrap().consistent);
    }

    #[test]
    fn region_checks_stay_local_to_the_edit() {
        let mut store = store_from(star("", "concept", 3));
        for i in 0..100 {
            directed_path(&mut store, &format!("c{i}_"), 3);
        }
        let mut updater = IncrementalUpdater::new(Config::new(2), store).unwrap();
        let before = updater.report().clone();
        assert_eq!(updater.class_count(), 5);

        let summary = updater
            .apply(
                ChangeSet::new()
                    .add_node(Node::new("leaf3", "entity", 0.5))
                    .add_edge(Edge::new("hub", "leaf3", "part_of")),
            )
            .unwrap();
        let report = &summary.report;

        assert_eq!(summary.affected_nodes, 5);
        assert!(report.is_clean());
        assert!(!report.exhaustive);
        assert_eq!(report.reachability_hops, Some(2));
        // the hub reaches one class of leaves; leaves reach nothing
        assert_eq!(report.reachability_checks_run, 1);
        assert_eq!(report.pattern_checks_run, 5 * 2);
        assert_eq!(report.original_node_count, 305);
        assert_eq!(report.compressed_node_count, 5);
        assert_eq!(report.topology_before, before.topology_before);
        assert_eq!(report.topology_after, before.topology_after);
    }

    #[test]
    fn audit_detects_drift_beyond_the_region() {
        let mut store = GraphStore::new();
        directed_path(&mut store, "p", 6);
        directed_path(&mut store, "q", 6);
        let mut updater = IncrementalUpdater::new(Config::new(1), store).unwrap();
        assert_eq!(updater.class_count(), 6);

        let summary = updater
            .apply(
                ChangeSet::new()
                    .add_node(Node::new("x", "claim", 0.5))
                    .add_edge(Edge::new("p5", "x", "causes")),
            )
            .unwrap();
        assert!(summary.warnings.is_empty());
        // p0..p3 still share classes with q0..q3
        assert_eq!(updater.class_count(), 9);

        let audit = updater.audit().unwrap();
        assert!(!audit.consistent);
        assert_eq!(audit.incremental_classes, 9);
        assert_eq!(audit.full_classes, 13);
        assert!(matches!(
            audit.warning,
            Some(Warning::IncrementalDrift { full_classes: 13, .. })
        ));
        assert_eq!(updater.class_count(), 13);
        assert!(updater.audit().unwrap().consistent);
    }

    #[test]
    fn disjoint_change_sets_refine_in_parallel() {
        let mut changes = star("a_", "concept", 3);
        changes.extend(star("b_", "process", 3));
        let store = store_from(changes);
        let mut updater = IncrementalUpdater::new(Config::new(1), store).unwrap();
        assert_eq!(updater.class_count(), 4);

        let summary = updater
            .apply_batch(vec![
                ChangeSet::new().add_edge(Edge::new("a_hub", "a_leaf0", "part_of")),
                ChangeSet::new().add_edge(Edge::new("b_hub", "b_leaf2", "supports")),
            ])
            .unwrap();

        assert_eq!(summary.regions, 2);
        assert!(summary.affected_nodes >= 8);
        assert!(updater.audit().unwrap().consistent);
    }

    #[test]
    fn change_sets_round_trip_through_json() {
        let set = ChangeSet::new()
            .add_node(Node::new("n", "concept", 0.4))
            .remove_edge("a", "b", "is_a");
        let json = serde_json::to_string(&set).unwrap();
        assert!(json.contains(r#""op":"add_node""#));
        let back: ChangeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
