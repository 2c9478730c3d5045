//! Core library for structural-equivalence compression of knowledge graphs
//!
//! A graph is partitioned by color refinement (orbits, then `k` bounded
//! rounds), collapsed into one node per class, and checked for reachability
//! and bounded-hop pattern agreement with the original.

pub mod config;
pub mod data;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod quotient;
pub mod refine;
pub mod storage;
pub mod validate;

pub use config::{Config, ValidationConfig};
pub use error::{CompressError, MalformedInput, Result, Warning};
pub use graph::{Edge, GraphBuilder, GraphDocument, GraphStore, Node, NodeKind, RelationType};
pub use pipeline::{CompressionOutcome, Compressor};
pub use quotient::{MappingTable, Quotient, QuotientConstructor, StrengthAggregation};
pub use refine::{
    AuditOutcome, BisimPartition, CancellationToken, ChangeSet, GraphChange, IncrementalUpdater,
    KBisimPartitioner, OrbitDetector, OrbitPartition, UpdateSummary,
};
pub use validate::{TopologyMetrics, Validator, VerificationReport, ViolatingQuery};
