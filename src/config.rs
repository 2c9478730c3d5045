//! Configuration management for the compression engine

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{CompressError, Result};
use crate::quotient::StrengthAggregation;

/// Settings for one compression run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Equivalence depth: refinement rounds applied after orbit detection.
    ///
    /// When orbit detection converges, these rounds split nothing and `k`
    /// only sets the pattern depth checked by validation. It refines the
    /// partition only when detection stops at `orbit_round_cap`. Such a
    /// partition is then validated within `k` hops.
    pub k: usize,

    /// Number of equal-width confidence bins used by the initial coloring
    pub confidence_buckets: u32,

    /// Maximum orbit refinement rounds before the partition is truncated
    pub orbit_round_cap: usize,

    /// Strength aggregation for collapsed edges
    pub aggregation: StrengthAggregation,

    pub validation: ValidationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            k: 5,
            confidence_buckets: 5,
            orbit_round_cap: 64,
            aggregation: StrengthAggregation::Max,
            validation: ValidationConfig::default(),
        }
    }
}

/// Settings for the post-compression checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Graphs with at most this many nodes are checked exhaustively
    pub exhaustive_threshold: usize,

    /// Reachability sources sampled above the threshold
    pub sample_sources: usize,

    /// Pattern anchors sampled above the threshold
    pub pattern_anchors: usize,

    /// Seed for sampling
    pub seed: u64,

    /// Inputs below this edge/node ratio are flagged as low density
    pub min_edge_node_ratio: f64,

    /// Inputs with at least this share of isolated nodes are flagged as low density
    pub max_isolated_ratio: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            exhaustive_threshold: 256,
            sample_sources: 64,
            pattern_anchors: 64,
            seed: 0x5eed,
            min_edge_node_ratio: 4.0,
            max_isolated_ratio: 0.2,
        }
    }
}

impl Config {
    /// Create a configuration with the given depth and defaults elsewhere
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading configuration from {}", path.display());
        let config: Config = serde_json::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no run can honor
    pub fn validate(&self) -> Result<()> {
        if self.confidence_buckets == 0 {
            return Err(invalid("confidence_buckets", "must be at least 1"));
        }
        let v = &self.validation;
        if v.sample_sources == 0 {
            return Err(invalid("validation.sample_sources", "must be at least 1"));
        }
        if v.pattern_anchors == 0 {
            return Err(invalid("validation.pattern_anchors", "must be at least 1"));
        }
        if !v.min_edge_node_ratio.is_finite() || v.min_edge_node_ratio < 0.0 {
            return Err(invalid(
                "validation.min_edge_node_ratio",
                "must be a non-negative number",
            ));
        }
        if !(0.0..=1.0).contains(&v.max_isolated_ratio) {
            return Err(invalid("validation.max_isolated_ratio", "must lie in [0, 1]"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> CompressError {
    CompressError::InvalidConfig {
        field,
        reason: reason.to_string(),
    }
}
