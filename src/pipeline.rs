//! End-to-end compression: orbits, k-bisimulation, quotient, validation

use std::time::Instant;

use crate::config::Config;
use crate::error::{Result, Warning};
use crate::graph::csr::CsrIndex;
use crate::graph::model::GraphDocument;
use crate::graph::store::GraphStore;
use crate::quotient::{MappingTable, Quotient, QuotientConstructor};
use crate::refine::{BisimPartition, CancellationToken, KBisimPartitioner, OrbitDetector};
use crate::validate::{Validator, VerificationReport};

/// Result of a successful compression
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub compressed: GraphDocument,
    pub mapping: MappingTable,
    pub report: VerificationReport,
}

/// Every intermediate product of one full run
#[derive(Debug, Clone)]
pub(crate) struct FullRun {
    pub partition: BisimPartition,
    pub quotient: Quotient,
    pub report: VerificationReport,
}

/// Drives a compression run over a borrowed store
#[derive(Debug, Clone)]
pub struct Compressor {
    config: Config,
    cancel: Option<CancellationToken>,
}

impl Compressor {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: None,
        })
    }

    /// Observe `token` between refinement rounds
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compress a store. Fails with a preservation violation when the
    /// compressed graph answers any checked query differently.
    pub fn compress(&self, store: &GraphStore) -> Result<CompressionOutcome> {
        let run = self.run(store, false)?;
        Ok(CompressionOutcome {
            compressed: run.quotient.graph,
            mapping: run.quotient.mapping,
            report: run.report,
        })
    }

    /// Validate a document into a store, then compress it
    pub fn compress_document(&self, document: &GraphDocument) -> Result<CompressionOutcome> {
        let store = GraphStore::from_document(document)?;
        log::info!(
            "Loaded graph with {} nodes and {} edges",
            store.node_count(),
            store.edge_count()
        );
        self.compress(&store)
    }

    /// Orbit detection followed by `k` bounded rounds
    pub fn partition(
        &self,
        csr: &CsrIndex,
        retain_history: bool,
    ) -> Result<(BisimPartition, Vec<Warning>)> {
        let orbits = OrbitDetector::new(self.config.orbit_round_cap, self.config.confidence_buckets)
            .retain_history(retain_history)
            .detect(csr, self.cancel.as_ref())?;
        let warnings: Vec<Warning> = orbits.termination_warning().into_iter().collect();

        let partition =
            KBisimPartitioner::new(self.config.k).partition(csr, orbits, self.cancel.as_ref())?;
        Ok((partition, warnings))
    }

    pub(crate) fn run(&self, store: &GraphStore, retain_history: bool) -> Result<FullRun> {
        let start = Instant::now();

        let csr = CsrIndex::from_store(store);
        log::debug!(
            "Built incidence index with {} entries ({} bytes)",
            csr.entries.len(),
            csr.memory_usage()
        );

        let (partition, warnings) = self.partition(&csr, retain_history)?;
        let quotient = QuotientConstructor::new(self.config.aggregation).construct(store, &partition);

        let mut report = Validator::new(self.config.validation.clone(), self.config.k)
            .verify(store, &csr, &partition, &quotient)?;
        report.warnings.splice(0..0, warnings);
        let report = report.ensure_preserved()?;

        log::info!(
            "Compressed {} nodes into {} in {:.2?}",
            report.original_node_count,
            report.compressed_node_count,
            start.elapsed()
        );

        Ok(FullRun {
            partition,
            quotient,
            report,
        })
    }
}
