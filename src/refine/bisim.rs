//! k-bisimulation: exactly `k` refinement rounds seeded by the orbit colors

use std::collections::HashMap;

use crate::error::Result;
use crate::graph::csr::CsrIndex;
use crate::graph::store::NodeIdx;
use crate::refine::orbit::OrbitPartition;
use crate::refine::{check_cancelled, class_count, refine_round, CancellationToken, Color};

/// Dense equivalence-class identifier
pub type ClassId = u32;

/// Final equivalence classes of a compression run
#[derive(Debug, Clone)]
pub struct BisimPartition {
    /// Colors per round. Holds every round from 0 when the orbit history was
    /// retained, otherwise the orbit colors followed by the final round.
    pub history: Vec<Vec<Color>>,

    /// Rounds spent in orbit detection
    pub orbit_rounds: usize,

    /// Bounded rounds applied on top of the orbits
    pub k: usize,

    /// True when the last executed round split no class. A stable partition
    /// is equitable: members of one class have the same number of neighbors
    /// in every other class, per relation and direction.
    pub stable: bool,

    /// Class of each slot; `None` for removed slots
    pub class_of: Vec<Option<ClassId>>,

    /// Members of each class in slot order
    pub members: Vec<Vec<NodeIdx>>,
}

impl BisimPartition {
    /// Group live slots by final color. Class ids follow first appearance in
    /// slot order, so equal partitions get equal ids.
    pub fn from_colors(
        live: &[bool],
        history: Vec<Vec<Color>>,
        orbit_rounds: usize,
        k: usize,
        stable: bool,
    ) -> Self {
        let colors = history.last().map_or(&[][..], |c| c.as_slice());
        let mut class_of = vec![None; live.len()];
        let mut members: Vec<Vec<NodeIdx>> = Vec::new();
        let mut by_color: HashMap<Color, ClassId> = HashMap::new();

        for (slot, &alive) in live.iter().enumerate() {
            if !alive {
                continue;
            }
            let class = *by_color.entry(colors[slot]).or_insert_with(|| {
                members.push(Vec::new());
                (members.len() - 1) as ClassId
            });
            class_of[slot] = Some(class);
            members[class as usize].push(slot as NodeIdx);
        }

        Self {
            history,
            orbit_rounds,
            k,
            stable,
            class_of,
            members,
        }
    }

    pub fn colors(&self) -> &[Color] {
        self.history.last().map_or(&[], |c| c.as_slice())
    }

    /// Colors after orbit detection, before the `k` bounded rounds. Every
    /// class lies inside one orbit color.
    pub fn orbit_colors(&self) -> &[Color] {
        let index = if self.history.len() > self.total_rounds() {
            self.orbit_rounds
        } else {
            0
        };
        self.history.get(index).map_or(&[], |c| c.as_slice())
    }

    pub fn class_count(&self) -> usize {
        self.members.len()
    }

    pub fn total_rounds(&self) -> usize {
        self.orbit_rounds + self.k
    }

    /// Whether two partitions group live slots identically
    pub fn same_grouping(&self, other: &BisimPartition) -> bool {
        self.class_of == other.class_of
    }
}

/// Refines orbits into classes bounded to neighborhood depth `k`
#[derive(Debug, Clone)]
pub struct KBisimPartitioner {
    k: usize,
}

impl KBisimPartitioner {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    /// Apply the refinement step exactly `k` times, starting from the orbit
    /// colors. Always terminates after `k` rounds.
    pub fn partition(
        &self,
        csr: &CsrIndex,
        orbits: OrbitPartition,
        cancel: Option<&CancellationToken>,
    ) -> Result<BisimPartition> {
        let retain = orbits.retained;
        let orbit_rounds = orbits.rounds;
        let mut history = orbits.history;
        let mut classes = orbits.class_count;
        let mut stable = orbits.converged;

        for step in 1..=self.k {
            check_cancelled(cancel, orbit_rounds + step)?;

            let previous = history.last().map_or(&[][..], |c| c.as_slice());
            let next = refine_round(csr, previous);
            let next_classes = class_count(csr, &next);
            stable = next_classes == classes;
            classes = next_classes;

            if !retain {
                history.truncate(1);
            }
            history.push(next);
        }

        let partition =
            BisimPartition::from_colors(&csr.live, history, orbit_rounds, self.k, stable);

        log::info!(
            "k-bisimulation (k = {}) produced {} classes after {} total rounds{}",
            self.k,
            partition.class_count(),
            partition.total_rounds(),
            if partition.stable { "" } else { " (not stable)" }
        );

        Ok(partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::{Edge, Node};
    use crate::graph::store::GraphStore;
    use crate::refine::orbit::OrbitDetector;

    fn directed_path(len: usize) -> GraphStore {
        let mut store = GraphStore::new();
        for i in 0..len {
            store.add_node(Node::new(format!("p{i}"), "entity", 0.5)).unwrap();
        }
        for i in 1..len {
            store
                .add_edge(Edge::new(format!("p{}", i - 1), format!("p{i}"), "causes"))
                .unwrap();
        }
        store
    }

    fn classes_for(store: &GraphStore, round_cap: usize, k: usize) -> BisimPartition {
        let csr = CsrIndex::from_store(store);
        let orbits = OrbitDetector::new(round_cap, 5).detect(&csr, None).unwrap();
        KBisimPartitioner::new(k).partition(&csr, orbits, None).unwrap()
    }

    #[test]
    fn larger_k_never_coarsens_a_truncated_partition() {
        let store = directed_path(12);
        let counts: Vec<usize> = [0, 1, 2, 3, 8]
            .iter()
            .map(|&k| classes_for(&store, 1, k).class_count())
            .collect();
        assert!(counts.windows(2).all(|w| w[0] <= w[1]), "{counts:?}");
        assert_eq!(counts[0], 3);
        assert_eq!(*counts.last().unwrap(), 12);
    }

    #[test]
    fn converged_orbits_are_not_split_further() {
        let store = directed_path(5);
        let p = classes_for(&store, 32, 5);
        assert!(p.stable);
        assert_eq!(p.class_count(), 5);
        assert_eq!(p.k, 5);
    }

    #[test]
    fn isolated_nodes_group_by_type_and_bucket() {
        let mut store = GraphStore::new();
        store.add_node(Node::new("a", "entity", 0.11)).unwrap();
        store.add_node(Node::new("b", "entity", 0.19)).unwrap();
        store.add_node(Node::new("c", "entity", 0.45)).unwrap();
        store.add_node(Node::new("d", "placeholder", 0.1)).unwrap();

        let p = classes_for(&store, 8, 5);
        assert_eq!(p.class_count(), 3);
        assert_eq!(p.class_of[0], p.class_of[1]);
        assert_ne!(p.class_of[0], p.class_of[2]);
        assert_eq!(p.members[p.class_of[3].unwrap() as usize], vec![3]);
    }

    #[test]
    fn orbit_colors_survive_without_retained_history() {
        let store = directed_path(12);
        let csr = CsrIndex::from_store(&store);
        let detector = OrbitDetector::new(1, 5);

        let kept = KBisimPartitioner::new(3)
            .partition(&csr, detector.clone().retain_history(true).detect(&csr, None).unwrap(), None)
            .unwrap();
        let dropped = KBisimPartitioner::new(3)
            .partition(&csr, detector.detect(&csr, None).unwrap(), None)
            .unwrap();

        assert_eq!(kept.history.len(), 5);
        assert_eq!(dropped.history.len(), 2);
        assert_eq!(kept.orbit_colors(), dropped.orbit_colors());
        assert_eq!(kept.colors(), dropped.colors());
        // one round: the source, the sink and the ten nodes between them
        assert_eq!(class_count(&csr, dropped.orbit_colors()), 3);
    }

    #[test]
    fn class_ids_follow_slot_order() {
        let store = directed_path(3);
        let p = classes_for(&store, 8, 1);
        assert_eq!(p.class_of, vec![Some(0), Some(1), Some(2)]);
    }
}
