//! Reachability and bounded-hop pattern agreement between a graph and its quotient

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use crate::graph::algorithms::{
    level_mismatch, reachable_within, walk_profile, IncidenceView, ReachabilityView, WalkLevel,
};
use crate::graph::csr::CsrIndex;
use crate::graph::store::{GraphStore, NodeIdx};
use crate::refine::bisim::{BisimPartition, ClassId};
use crate::refine::Color;
use crate::validate::ViolatingQuery;

/// Violations kept per report; failures beyond this are only counted
pub const MAX_RECORDED_VIOLATIONS: usize = 16;

/// Outcome of one family of checks
#[derive(Debug, Clone, Default)]
pub struct CheckTally {
    pub checks: usize,
    pub failures: usize,
    pub violations: Vec<ViolatingQuery>,
}

impl CheckTally {
    fn record(&mut self, violation: ViolatingQuery) {
        self.failures += 1;
        if self.violations.len() < MAX_RECORDED_VIOLATIONS {
            self.violations.push(violation);
        }
    }

    fn merge(mut self, other: CheckTally) -> CheckTally {
        self.checks += other.checks;
        self.failures += other.failures;
        let room = MAX_RECORDED_VIOLATIONS.saturating_sub(self.violations.len());
        self.violations.extend(other.violations.into_iter().take(room));
        self
    }
}

/// How original nodes map onto compressed slots
pub trait ClassLookup: Sync {
    /// Compressed slot holding `node`
    fn class_of(&self, node: NodeIdx) -> Option<ClassId>;

    /// Some original member of a compressed slot
    fn member_of(&self, class: ClassId) -> Option<NodeIdx>;

    /// Color from `k` rounds before the final one. Members of a compressed
    /// slot always share it.
    fn coarse_color(&self, node: NodeIdx) -> Color;
}

/// Compressed slot `c` is class `c`
impl ClassLookup for BisimPartition {
    fn class_of(&self, node: NodeIdx) -> Option<ClassId> {
        self.class_of.get(node as usize).copied().flatten()
    }

    fn member_of(&self, class: ClassId) -> Option<NodeIdx> {
        self.members.get(class as usize).and_then(|m| m.first()).copied()
    }

    fn coarse_color(&self, node: NodeIdx) -> Color {
        self.orbit_colors().get(node as usize).copied().unwrap_or(0)
    }
}

/// Read-only pairing of an original graph and its quotient
pub struct PreservationCheck<'a, O: ?Sized, C: ?Sized, L: ?Sized> {
    original: &'a GraphStore,
    original_view: &'a O,
    compressed_view: &'a C,
    lookup: &'a L,
}

impl<'a, O, C, L> PreservationCheck<'a, O, C, L>
where
    O: IncidenceView + ?Sized,
    C: IncidenceView + ?Sized,
    L: ClassLookup + ?Sized,
{
    pub fn new(
        original: &'a GraphStore,
        original_view: &'a O,
        compressed_view: &'a C,
        lookup: &'a L,
    ) -> Self {
        Self {
            original,
            original_view,
            compressed_view,
            lookup,
        }
    }

    /// For every source: the coarse colors reached within `hops` steps must
    /// equal those of the classes its class reaches within `hops` steps in
    /// the quotient. Each distinct color is one check.
    pub fn bounded_reachability(&self, sources: &[NodeIdx], hops: usize) -> CheckTally {
        sources
            .par_iter()
            .map(|&source| self.bounded_reachability_from(source, hops))
            .reduce(CheckTally::default, CheckTally::merge)
    }

    fn bounded_reachability_from(&self, source: NodeIdx, hops: usize) -> CheckTally {
        let mut tally = CheckTally::default();
        let Some(source_class) = self.lookup.class_of(source) else {
            return tally;
        };

        let mut original: BTreeMap<Color, NodeIdx> = BTreeMap::new();
        for node in reachable_within(self.original_view, source, hops) {
            original
                .entry(self.lookup.coarse_color(node))
                .and_modify(|witness| *witness = (*witness).min(node))
                .or_insert(node);
        }
        let mut compressed: BTreeMap<Color, NodeIdx> = BTreeMap::new();
        for class in reachable_within(self.compressed_view, source_class, hops) {
            if let Some(member) = self.lookup.member_of(class) {
                compressed
                    .entry(self.lookup.coarse_color(member))
                    .and_modify(|witness| *witness = (*witness).min(member))
                    .or_insert(member);
            }
        }

        let colors: BTreeSet<Color> = original.keys().chain(compressed.keys()).copied().collect();
        tally.checks += colors.len();
        for color in colors {
            let (in_original, in_compressed) = (original.get(&color), compressed.get(&color));
            if let Some(&witness) = in_original.or(in_compressed) {
                if in_original.is_some() != in_compressed.is_some() {
                    tally.record(ViolatingQuery::Reachability {
                        source: self.original_id(source),
                        target: self.original_id(witness),
                        original: in_original.is_some(),
                        compressed: in_compressed.is_some(),
                        within: Some(hops),
                    });
                }
            }
        }

        tally
    }

    /// Walk label multisets at each depth `1..=depth` must agree between an
    /// anchor and its compressed node
    pub fn patterns(&self, anchors: &[NodeIdx], depth: usize) -> CheckTally {
        anchors
            .par_iter()
            .map(|&anchor| self.pattern_at(anchor, depth))
            .reduce(CheckTally::default, CheckTally::merge)
    }

    fn pattern_at(&self, anchor: NodeIdx, depth: usize) -> CheckTally {
        let mut tally = CheckTally::default();
        let Some(class) = self.lookup.class_of(anchor) else {
            return tally;
        };
        if depth == 0 {
            return tally;
        }

        let original = walk_profile(self.original_view, anchor, depth);
        let compressed = walk_profile(self.compressed_view, class, depth);

        for (level, (lhs, rhs)) in original.iter().zip(&compressed).enumerate() {
            tally.checks += 1;
            if let Some(detail) = self.describe_mismatch(lhs, rhs) {
                tally.record(ViolatingQuery::Pattern {
                    anchor: self.original_id(anchor),
                    depth: level + 1,
                    detail,
                });
            }
        }

        tally
    }

    fn describe_mismatch(&self, original: &WalkLevel, compressed: &WalkLevel) -> Option<String> {
        level_mismatch(original, compressed).map(|((relation, direction, kind), lhs, rhs)| {
            format!(
                "{} {} {}: {} walks in the original, {} in the compressed graph",
                self.original_view.relation_name(relation),
                direction.as_str(),
                self.original_view.kind_name(kind),
                lhs,
                rhs
            )
        })
    }

    fn original_id(&self, idx: NodeIdx) -> String {
        self.original
            .node_at(idx)
            .map_or_else(|| idx.to_string(), |n| n.id.clone())
    }
}

impl<'a, L> PreservationCheck<'a, CsrIndex, CsrIndex, L>
where
    L: ClassLookup + ?Sized,
{
    /// For every source and every live target `b`: "source reaches a member
    /// of class(b)" must equal "class(source) reaches class(b)". Exact only
    /// for stable partitions.
    pub fn reachability(&self, sources: &[NodeIdx]) -> CheckTally {
        let (original_reach, compressed_reach) = rayon::join(
            || ReachabilityView::from_csr(self.original_view),
            || ReachabilityView::from_csr(self.compressed_view),
        );
        sources
            .par_iter()
            .map(|&source| self.reachability_from(&original_reach, &compressed_reach, source))
            .reduce(CheckTally::default, CheckTally::merge)
    }

    fn reachability_from(
        &self,
        original_reach: &ReachabilityView,
        compressed_reach: &ReachabilityView,
        source: NodeIdx,
    ) -> CheckTally {
        let mut tally = CheckTally::default();
        let Some(source_class) = self.lookup.class_of(source) else {
            return tally;
        };

        let reached = original_reach.reachable_from(source);
        let mut class_hit = vec![false; self.compressed_view.slot_count()];
        for (slot, &hit) in reached.iter().enumerate() {
            if let (true, Some(class)) = (hit, self.lookup.class_of(slot as NodeIdx)) {
                class_hit[class as usize] = true;
            }
        }
        let compressed_reached = compressed_reach.reachable_from(source_class);

        for (target, node) in self.original.nodes() {
            let Some(class) = self.lookup.class_of(target) else {
                continue;
            };
            tally.checks += 1;
            let original = class_hit[class as usize];
            let compressed = compressed_reached[class as usize];
            if original != compressed {
                tally.record(ViolatingQuery::Reachability {
                    source: self.original_id(source),
                    target: node.id.clone(),
                    original,
                    compressed,
                    within: None,
                });
            }
        }

        tally
    }
}
