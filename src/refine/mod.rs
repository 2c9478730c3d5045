//! Color refinement shared by orbit detection, k-bisimulation and incremental updates
//!
//! A node's color at round `r` is a hash of its color at round `r - 1` and the
//! sorted multiset of `(relation, direction, neighbor color)` over its
//! incidences. Round 0 hashes `(node type, confidence bucket)`.
//!
//! Multiplicities are stored as reduced fractions of the node's member
//! weight, so a compressed node whose members were equivalent refines
//! exactly like any one of those members.

pub mod bisim;
pub mod incremental;
pub mod orbit;
pub mod regions;

use itertools::Itertools;
use rayon::prelude::*;
use std::collections::HashSet;
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use twox_hash::XxHash64;

use crate::error::{CompressError, Result};
use crate::graph::csr::{CsrIndex, Incidence};
use crate::graph::model::{NodeKind, RelationType};
use crate::graph::store::NodeIdx;

pub use bisim::{BisimPartition, ClassId, KBisimPartitioner};
pub use incremental::{AuditOutcome, ChangeSet, GraphChange, IncrementalUpdater, UpdateSummary};
pub use orbit::{OrbitDetector, OrbitPartition};

/// Refinement label
pub type Color = u64;

const COLOR_SEED: u64 = 0x6b62_6973_696d_0001;
const KIND_SEED: u64 = 0x6b62_6973_696d_0002;
const RELATION_SEED: u64 = 0x6b62_6973_696d_0003;

/// Nodes per parallel work unit within a round
const ROUND_CHUNK: usize = 4096;

fn label_key(seed: u64, label: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(seed);
    hasher.write(label.as_bytes());
    hasher.finish()
}

pub fn kind_key(kind: &NodeKind) -> u64 {
    label_key(KIND_SEED, kind.as_str())
}

pub fn relation_key(relation: &RelationType) -> u64 {
    label_key(RELATION_SEED, relation.as_str())
}

/// Discretize a confidence into one of `buckets` equal-width bins.
/// More buckets keep near-equal confidences apart (less compression);
/// fewer buckets merge them.
pub fn confidence_bucket(confidence: f64, buckets: u32) -> u32 {
    let buckets = buckets.max(1);
    let bin = (confidence.clamp(0.0, 1.0) * buckets as f64).floor() as u32;
    bin.min(buckets - 1)
}

pub fn initial_color(kind: u64, confidence: f64, buckets: u32) -> Color {
    let mut hasher = XxHash64::with_seed(COLOR_SEED);
    hasher.write_u64(kind);
    hasher.write_u32(confidence_bucket(confidence, buckets));
    hasher.finish()
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// One refinement step for a single node
pub fn refine_color(
    previous: Color,
    incidences: &[Incidence],
    member_weight: u64,
    neighbor_color: impl Fn(NodeIdx) -> Color,
) -> Color {
    let mut entries: Vec<(u64, u8, Color, u64)> = incidences
        .iter()
        .map(|inc| {
            (
                inc.relation,
                inc.direction as u8,
                neighbor_color(inc.neighbor),
                inc.count,
            )
        })
        .collect();
    entries.sort_unstable();

    let mut hasher = XxHash64::with_seed(COLOR_SEED);
    hasher.write_u64(previous);

    let merged = entries.into_iter().coalesce(|a, b| {
        if (a.0, a.1, a.2) == (b.0, b.1, b.2) {
            Ok((a.0, a.1, a.2, a.3 + b.3))
        } else {
            Err((a, b))
        }
    });
    for (relation, direction, color, count) in merged {
        let divisor = gcd(count, member_weight).max(1);
        hasher.write_u64(relation);
        hasher.write_u8(direction);
        hasher.write_u64(color);
        hasher.write_u64(count / divisor);
        hasher.write_u64(member_weight / divisor);
    }

    hasher.finish()
}

/// Round-0 colors for every slot. Dead slots get color 0.
pub fn initial_colors(csr: &CsrIndex, buckets: u32) -> Vec<Color> {
    (0..csr.slot_count())
        .into_par_iter()
        .map(|i| {
            if csr.live[i] {
                initial_color(csr.kinds[i], csr.confidence[i], buckets)
            } else {
                0
            }
        })
        .collect()
}

/// One full round. Reads only `previous`; the returned buffer is the next
/// round, so no node ever observes a color computed in the same round.
pub fn refine_round(csr: &CsrIndex, previous: &[Color]) -> Vec<Color> {
    let mut next = vec![0; previous.len()];
    next.par_chunks_mut(ROUND_CHUNK)
        .enumerate()
        .for_each(|(chunk_idx, out)| {
            let start = chunk_idx * ROUND_CHUNK;
            for (offset, slot) in out.iter_mut().enumerate() {
                let node = start + offset;
                if !csr.live[node] {
                    continue;
                }
                *slot = refine_color(
                    previous[node],
                    csr.incidences(node as NodeIdx),
                    csr.member_weight[node],
                    |n| previous[n as usize],
                );
            }
        });
    next
}

/// Number of distinct colors among live slots
pub fn class_count(csr: &CsrIndex, colors: &[Color]) -> usize {
    colors
        .iter()
        .zip(&csr.live)
        .filter(|(_, &alive)| alive)
        .map(|(c, _)| *c)
        .collect::<HashSet<_>>()
        .len()
}

/// Cooperative cancellation, observed between rounds only
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) fn check_cancelled(token: Option<&CancellationToken>, round: usize) -> Result<()> {
    match token {
        Some(t) if t.is_cancelled() => Err(CompressError::Cancelled { round }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::csr::Direction;

    #[test]
    fn buckets_are_half_open_with_closed_top() {
        assert_eq!(confidence_bucket(0.0, 5), 0);
        assert_eq!(confidence_bucket(0.19, 5), 0);
        assert_eq!(confidence_bucket(0.2, 5), 1);
        assert_eq!(confidence_bucket(0.99, 5), 4);
        assert_eq!(confidence_bucket(1.0, 5), 4);
        assert_eq!(confidence_bucket(0.7, 1), 0);
    }

    #[test]
    fn signature_ignores_incidence_order() {
        let a = Incidence {
            relation: 1,
            direction: Direction::Out,
            neighbor: 0,
            count: 1,
        };
        let b = Incidence {
            relation: 2,
            direction: Direction::In,
            neighbor: 1,
            count: 1,
        };
        let colors = [10, 20];
        let lhs = refine_color(7, &[a, b], 1, |n| colors[n as usize]);
        let rhs = refine_color(7, &[b, a], 1, |n| colors[n as usize]);
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn multiplicity_is_normalized_by_member_weight() {
        let inc = |count| Incidence {
            relation: 1,
            direction: Direction::Out,
            neighbor: 0,
            count,
        };
        let single = refine_color(3, &[inc(2)], 1, |_| 5);
        let merged = refine_color(3, &[inc(6)], 3, |_| 5);
        let split = refine_color(3, &[inc(1), inc(1)], 1, |_| 5);
        assert_eq!(single, merged);
        assert_eq!(single, split);
        assert_ne!(single, refine_color(3, &[inc(1)], 1, |_| 5));
    }

    #[test]
    fn cancellation_is_reported_with_round() {
        let token = CancellationToken::new();
        assert!(check_cancelled(Some(&token), 3).is_ok());
        token.cancel();
        assert!(matches!(
            check_cancelled(Some(&token), 3),
            Err(CompressError::Cancelled { round: 3 })
        ));
    }
}
