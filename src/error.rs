//! Error taxonomy for the compression engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validate::{VerificationReport, ViolatingQuery};

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, CompressError>;

/// Input that violates the graph data model. Rejected before any processing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedInput {
    #[error("edge {source_id} -> {target_id} references unknown node '{missing}'")]
    DanglingEdge {
        source_id: String,
        target_id: String,
        missing: String,
    },

    #[error("duplicate node id '{id}'")]
    DuplicateNode { id: String },

    #[error("node '{id}' has confidence {confidence} outside [0, 1]")]
    ConfidenceOutOfRange { id: String, confidence: f64 },

    #[error("edge {source_id} -> {target_id} has non-finite strength {strength}")]
    InvalidStrength {
        source_id: String,
        target_id: String,
        strength: f64,
    },

    #[error("edge {source_id} -> {target_id} has inconsistent collapsed_count {collapsed_count} and loop_count {loop_count}")]
    InvalidMultiplicity {
        source_id: String,
        target_id: String,
        collapsed_count: u64,
        loop_count: u64,
    },

    #[error("unknown node '{id}'")]
    UnknownNode { id: String },

    #[error("no {edge_type} edge from '{source_id}' to '{target_id}'")]
    UnknownEdge {
        source_id: String,
        target_id: String,
        edge_type: String,
    },
}

/// Errors returned by library operations
#[derive(Debug, Error)]
pub enum CompressError {
    #[error("malformed input: {0}")]
    MalformedInput(#[from] MalformedInput),

    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// The compressed graph answers a query differently from the original.
    /// This is an algorithmic defect, never a data problem.
    #[error("query preservation violated: {violation}")]
    PreservationViolation {
        violation: ViolatingQuery,
        report: Box<VerificationReport>,
    },

    #[error("refinement cancelled before round {round}")]
    Cancelled { round: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Non-fatal conditions collected during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Orbit detection hit its round cap before the partition stabilized.
    /// The partition is coarser than the fixpoint would be.
    RefinementNonTermination { round_cap: usize, class_count: usize },

    /// Input graph is sparse or poorly connected; extraction is the likely problem.
    LowInformationDensity {
        edge_node_ratio: f64,
        isolated_ratio: f64,
    },

    /// Localized refinement disagreed with a full recompute.
    IncrementalDrift {
        divergent_nodes: usize,
        incremental_classes: usize,
        full_classes: usize,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::RefinementNonTermination {
                round_cap,
                class_count,
            } => write!(
                f,
                "orbit refinement did not stabilize within {} rounds ({} classes)",
                round_cap, class_count
            ),
            Warning::LowInformationDensity {
                edge_node_ratio,
                isolated_ratio,
            } => write!(
                f,
                "low information density: edge/node ratio {:.2}, isolated ratio {:.2}",
                edge_node_ratio, isolated_ratio
            ),
            Warning::IncrementalDrift {
                divergent_nodes,
                incremental_classes,
                full_classes,
            } => write!(
                f,
                "incremental partition drifted on {} nodes ({} classes vs {} after full recompute)",
                divergent_nodes, incremental_classes, full_classes
            ),
        }
    }
}
