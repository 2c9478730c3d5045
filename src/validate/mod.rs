//! Topology and query-preservation validation of a compressed graph

pub mod preservation;
pub mod topology;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ValidationConfig;
use crate::error::{CompressError, Result, Warning};
use crate::graph::algorithms::IncidenceView;
use crate::graph::csr::CsrIndex;
use crate::graph::store::{GraphStore, NodeIdx};
use crate::quotient::Quotient;
use crate::refine::bisim::BisimPartition;

pub use preservation::{CheckTally, ClassLookup, PreservationCheck, MAX_RECORDED_VIOLATIONS};
pub use topology::TopologyMetrics;

/// A query answered differently by the original and the compressed graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum ViolatingQuery {
    Reachability {
        source: String,
        target: String,
        original: bool,
        compressed: bool,
        /// Hop limit of the query; `None` for unbounded reachability
        #[serde(default, skip_serializing_if = "Option::is_none")]
        within: Option<usize>,
    },
    Pattern {
        anchor: String,
        depth: usize,
        detail: String,
    },
}

impl fmt::Display for ViolatingQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolatingQuery::Reachability {
                source,
                target,
                original,
                compressed,
                within,
            } => {
                write!(f, "reachable({source}, {target})")?;
                if let Some(hops) = within {
                    write!(f, " within {hops} hops")?;
                }
                write!(
                    f,
                    " is {original} in the original but {compressed} in the compressed graph"
                )
            }
            ViolatingQuery::Pattern {
                anchor,
                depth,
                detail,
            } => write!(f, "pattern at '{anchor}' differs at depth {depth}: {detail}"),
        }
    }
}

/// Summary of one compression run and its checks
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    pub original_node_count: usize,
    pub original_edge_count: usize,
    pub compressed_node_count: usize,
    pub compressed_edge_count: usize,
    /// Original nodes per compressed node
    pub compression_ratio: f64,
    pub reachability_checks_run: usize,
    pub reachability_failures: usize,
    /// Hop limit of the reachability checks. Unstable partitions and
    /// incremental regions are checked within `k` hops, comparing colors
    /// from before the bounded rounds.
    #[serde(default)]
    pub reachability_hops: Option<usize>,
    pub pattern_checks_run: usize,
    pub pattern_failures: usize,
    pub topology_before: TopologyMetrics,
    pub topology_after: TopologyMetrics,
    /// Every node was used as source and anchor
    pub exhaustive: bool,
    pub refinement_rounds: usize,
    pub stable_partition: bool,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    /// First recorded violations
    #[serde(default)]
    pub violations: Vec<ViolatingQuery>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.reachability_failures == 0 && self.pattern_failures == 0
    }

    pub fn first_violation(&self) -> Option<&ViolatingQuery> {
        self.violations.first()
    }

    /// Turn recorded failures into a [`CompressError::PreservationViolation`]
    pub fn ensure_preserved(self) -> Result<Self> {
        if self.is_clean() {
            return Ok(self);
        }
        let violation = self
            .first_violation()
            .cloned()
            .unwrap_or_else(|| ViolatingQuery::Pattern {
                anchor: String::new(),
                depth: 0,
                detail: "failures were counted but none recorded".to_string(),
            });
        Err(CompressError::PreservationViolation {
            violation,
            report: Box::new(self),
        })
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} nodes (ratio {:.2}), reachability {}/{} failed, patterns {}/{} failed",
            self.original_node_count,
            self.compressed_node_count,
            self.compression_ratio,
            self.reachability_failures,
            self.reachability_checks_run,
            self.pattern_failures,
            self.pattern_checks_run
        )
    }
}

/// Sizes of an incrementally maintained quotient
#[derive(Debug, Clone, Copy)]
pub struct RegionCounts {
    pub nodes: usize,
    pub edges: usize,
    pub rounds: usize,
    pub stable: bool,
}

fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if compressed == 0 {
        1.0
    } else {
        original as f64 / compressed as f64
    }
}

fn merge_violations(reachability: CheckTally, patterns: CheckTally) -> Vec<ViolatingQuery> {
    let mut violations = reachability.violations;
    violations.extend(patterns.violations);
    violations.truncate(MAX_RECORDED_VIOLATIONS);
    violations
}

fn log_outcome(report: &VerificationReport) {
    if report.is_clean() {
        log::info!("Validation passed: {}", report);
    } else {
        log::warn!("Validation failed: {}", report);
    }
}

/// Compares a graph with its quotient
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
    depth: usize,
}

impl Validator {
    /// `depth` is the pattern depth, normally the equivalence depth `k`
    pub fn new(config: ValidationConfig, depth: usize) -> Self {
        Self { config, depth }
    }

    /// Check the quotient against the original over the whole graph, or a
    /// deterministic sample of it above the exhaustive threshold
    pub fn verify(
        &self,
        original: &GraphStore,
        original_csr: &CsrIndex,
        partition: &BisimPartition,
        quotient: &Quotient,
    ) -> Result<VerificationReport> {
        let compressed = GraphStore::from_document(&quotient.graph)?;
        let compressed_csr = CsrIndex::from_store(&compressed);

        let (topology_before, topology_after) = rayon::join(
            || TopologyMetrics::compute(original, &self.config),
            || TopologyMetrics::compute(&compressed, &self.config),
        );

        let live: Vec<NodeIdx> = original.nodes().map(|(idx, _)| idx).collect();
        let exhaustive = live.len() <= self.config.exhaustive_threshold;
        let (sources, anchors) = if exhaustive {
            (live.clone(), live)
        } else {
            (
                self.sample(&live, self.config.sample_sources, 0),
                self.sample(&live, self.config.pattern_anchors, 1),
            )
        };
        let hops = (!partition.stable).then_some(partition.k);

        log::debug!(
            "Validating with {} reachability sources and {} pattern anchors{}",
            sources.len(),
            anchors.len(),
            if exhaustive { " (exhaustive)" } else { "" }
        );

        let check = PreservationCheck::new(original, original_csr, &compressed_csr, partition);
        let (reachability, patterns) = rayon::join(
            || match hops {
                Some(hops) => check.bounded_reachability(&sources, hops),
                None => check.reachability(&sources),
            },
            || check.patterns(&anchors, self.depth),
        );

        let mut warnings = Vec::new();
        if topology_before.low_information_density {
            let warning = Warning::LowInformationDensity {
                edge_node_ratio: topology_before.edge_node_ratio,
                isolated_ratio: topology_before.isolated_ratio,
            };
            log::warn!("{}", warning);
            warnings.push(warning);
        }

        let original_node_count = original.node_count();
        let compressed_node_count = compressed.node_count();
        let report = VerificationReport {
            original_node_count,
            original_edge_count: original.edge_count(),
            compressed_node_count,
            compressed_edge_count: compressed.edge_count(),
            compression_ratio: compression_ratio(original_node_count, compressed_node_count),
            reachability_checks_run: reachability.checks,
            reachability_failures: reachability.failures,
            reachability_hops: hops,
            pattern_checks_run: patterns.checks,
            pattern_failures: patterns.failures,
            topology_before,
            topology_after,
            exhaustive,
            refinement_rounds: partition.total_rounds(),
            stable_partition: partition.stable,
            warnings,
            violations: merge_violations(reachability, patterns),
        };

        log_outcome(&report);
        Ok(report)
    }

    /// Check only `region` as sources and anchors, within `hops` steps.
    /// Traversals stay inside the `hops` ball of the region, so the cost does
    /// not grow with the rest of the graph. Topology is carried over from
    /// `previous` and the counts are refreshed from the arguments.
    #[allow(clippy::too_many_arguments)]
    pub fn verify_region<C, L>(
        &self,
        original: &GraphStore,
        compressed: &C,
        lookup: &L,
        region: &[NodeIdx],
        hops: usize,
        previous: &VerificationReport,
        counts: RegionCounts,
    ) -> VerificationReport
    where
        C: IncidenceView + ?Sized,
        L: ClassLookup + ?Sized,
    {
        let region: Vec<NodeIdx> = region
            .iter()
            .copied()
            .filter(|&idx| original.is_live(idx))
            .collect();

        log::debug!("Validating a region of {} nodes within {} hops", region.len(), hops);

        let check = PreservationCheck::new(original, original, compressed, lookup);
        let (reachability, patterns) = rayon::join(
            || check.bounded_reachability(&region, hops),
            || check.patterns(&region, self.depth),
        );

        let report = VerificationReport {
            original_node_count: original.node_count(),
            original_edge_count: original.edge_count(),
            compressed_node_count: counts.nodes,
            compressed_edge_count: counts.edges,
            compression_ratio: compression_ratio(original.node_count(), counts.nodes),
            reachability_checks_run: reachability.checks,
            reachability_failures: reachability.failures,
            reachability_hops: Some(hops),
            pattern_checks_run: patterns.checks,
            pattern_failures: patterns.failures,
            topology_before: previous.topology_before.clone(),
            topology_after: previous.topology_after.clone(),
            exhaustive: false,
            refinement_rounds: counts.rounds,
            stable_partition: counts.stable,
            warnings: previous
                .warnings
                .iter()
                .filter(|w| matches!(w, Warning::LowInformationDensity { .. }))
                .cloned()
                .collect(),
            violations: merge_violations(reachability, patterns),
        };

        log_outcome(&report);
        report
    }

    fn sample(&self, live: &[NodeIdx], amount: usize, stream: u64) -> Vec<NodeIdx> {
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(stream));
        let mut picked: Vec<NodeIdx> = live.choose_multiple(&mut rng, amount).copied().collect();
        picked.sort_unstable();
        picked
    }
}
