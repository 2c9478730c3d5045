//! Orbit detection: color refinement run to a fixpoint or a round cap

use crate::error::{Result, Warning};
use crate::graph::csr::CsrIndex;
use crate::refine::{
    check_cancelled, class_count, initial_colors, refine_round, CancellationToken, Color,
};

/// Result of orbit detection
#[derive(Debug, Clone)]
pub struct OrbitPartition {
    /// Colors per round, oldest first. Holds every round from 0 when history
    /// is retained, otherwise only the latest round.
    pub history: Vec<Vec<Color>>,

    /// Refinement rounds executed after the initial coloring
    pub rounds: usize,

    /// Whether a round completed without splitting any class
    pub converged: bool,

    pub class_count: usize,

    pub round_cap: usize,

    /// Whether `history` holds every round
    pub retained: bool,
}

impl OrbitPartition {
    pub fn colors(&self) -> &[Color] {
        self.history.last().map_or(&[], |c| c.as_slice())
    }

    pub fn termination_warning(&self) -> Option<Warning> {
        (!self.converged).then(|| Warning::RefinementNonTermination {
            round_cap: self.round_cap,
            class_count: self.class_count,
        })
    }
}

/// Coarse partition before the bounded-depth pass
#[derive(Debug, Clone)]
pub struct OrbitDetector {
    round_cap: usize,
    confidence_buckets: u32,
    retain_history: bool,
}

impl OrbitDetector {
    pub fn new(round_cap: usize, confidence_buckets: u32) -> Self {
        Self {
            round_cap,
            confidence_buckets,
            retain_history: false,
        }
    }

    /// Keep the colors of every round; incremental maintenance needs them
    pub fn retain_history(mut self, retain: bool) -> Self {
        self.retain_history = retain;
        self
    }

    /// Refine until a round leaves the class count unchanged. Refinement only
    /// splits classes, so an unchanged count means an unchanged partition.
    pub fn detect(
        &self,
        csr: &CsrIndex,
        cancel: Option<&CancellationToken>,
    ) -> Result<OrbitPartition> {
        let initial = initial_colors(csr, self.confidence_buckets);
        let mut classes = class_count(csr, &initial);
        let mut history = vec![initial];
        let mut rounds = 0;
        let mut converged = false;

        log::debug!("Orbit detection starting with {} initial classes", classes);

        for round in 1..=self.round_cap {
            check_cancelled(cancel, round)?;

            let previous = history.last().map_or(&[][..], |c| c.as_slice());
            let next = refine_round(csr, previous);
            let next_classes = class_count(csr, &next);
            if !self.retain_history {
                history.clear();
            }
            history.push(next);
            rounds = round;

            log::debug!("Orbit round {}: {} classes", round, next_classes);

            if next_classes == classes {
                converged = true;
                break;
            }
            classes = next_classes;
        }

        let partition = OrbitPartition {
            history,
            rounds,
            converged,
            class_count: classes,
            round_cap: self.round_cap,
            retained: self.retain_history,
        };

        match partition.termination_warning() {
            Some(warning) => log::warn!("{}", warning),
            None => log::info!(
                "Orbit detection converged after {} rounds with {} classes",
                partition.rounds,
                classes
            ),
        }

        Ok(partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::{Edge, Node};
    use crate::graph::store::GraphStore;

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

    #[test]
    fn star_leaves_share_an_orbit() {
        let mut store = GraphStore::new();
        store.add_node(Node::new("hub", "concept", 0.9)).unwrap();
        for i in 0..4 {
            let id = format!("leaf{i}");
            store.add_node(Node::new(id.clone(), "entity", 0.5)).unwrap();
            store.add_edge(Edge::new("hub", id, "part_of")).unwrap();
        }
        let csr = CsrIndex::from_store(&store);
        let orbits = OrbitDetector::new(16, 5).detect(&csr, None).unwrap();

        assert!(orbits.converged);
        assert_eq!(orbits.class_count, 2);
        let colors = orbits.colors();
        assert!(colors[1..].iter().all(|&c| c == colors[1]));
        assert_ne!(colors[0], colors[1]);
    }

    #[test]
    fn directed_path_separates_every_position() {
        let store = directed_path(6);
        let csr = CsrIndex::from_store(&store);
        let orbits = OrbitDetector::new(16, 5).detect(&csr, None).unwrap();
        assert!(orbits.converged);
        assert_eq!(orbits.class_count, 6);
    }

    #[test]
    fn round_cap_truncates_with_a_warning() {
        let store = directed_path(8);
        let csr = CsrIndex::from_store(&store);
        let orbits = OrbitDetector::new(1, 5).detect(&csr, None).unwrap();

        assert!(!orbits.converged);
        assert_eq!(orbits.rounds, 1);
        assert_eq!(orbits.history.len(), 1);
        // start, end and the undistinguished middle
        assert_eq!(orbits.class_count, 3);
        assert_eq!(
            orbits.termination_warning(),
            Some(Warning::RefinementNonTermination {
                round_cap: 1,
                class_count: 3
            })
        );
    }

    #[test]
    fn cancelled_token_stops_before_first_round() {
        let store = directed_path(3);
        let csr = CsrIndex::from_store(&store);
        let token = CancellationToken::new();
        token.cancel();
        assert!(OrbitDetector::new(8, 5).detect(&csr, Some(&token)).is_err());
    }
}
