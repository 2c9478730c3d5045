use anyhow::{Context, Result};
use clap::Parser;

use kgraph_compress::data;
use kgraph_compress::storage;
use kgraph_compress::{
    CompressionOutcome, Compressor, Config, GraphStore, IncrementalUpdater, StrengthAggregation,
};

#[derive(Parser, Debug)]
#[clap(
    name = "kgraph-compress",
    about = "Structural-equivalence compression of knowledge graphs"
)]
struct Cli {
    /// Path to input JSON graph ({ nodes, edges, k?, aggregation? })
    #[clap(long)]
    input: String,

    /// Output directory for results
    #[clap(long, default_value = "compression_results")]
    output_dir: String,

    /// JSON configuration file
    #[clap(long)]
    config: Option<String>,

    /// Equivalence depth (overrides the input file and config)
    #[clap(long)]
    k: Option<usize>,

    /// Strength aggregation: max, mean or count-weighted-mean
    #[clap(long)]
    aggregation: Option<String>,

    /// Number of confidence buckets for the initial coloring
    #[clap(long)]
    confidence_buckets: Option<u32>,

    /// Maximum orbit refinement rounds
    #[clap(long)]
    round_cap: Option<usize>,

    /// Seed for validation sampling
    #[clap(long)]
    seed: Option<u64>,

    /// Change-set file applied incrementally after the initial compression
    #[clap(long)]
    changes: Option<String>,

    /// Number of worker threads (0 = use all available cores)
    #[clap(long, default_value = "0")]
    threads: usize,

    /// Verbose logging
    #[clap(long, short)]
    verbose: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Cli::parse();

    // Configure logging
    let log_level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    // Set number of threads
    let num_threads = if args.threads > 0 {
        args.threads
    } else {
        // If threads = 0, use all available cores
        num_cpus::get()
    };

    log::info!("Using {} worker threads", num_threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;

    log::info!("Starting graph compression");
    log::info!("Input: {}", args.input);
    log::info!("Output: {}", args.output_dir);

    // 1. Load configuration and input
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load configuration {}", path))?,
        None => Config::default(),
    };

    let request = data::load_request(&args.input)
        .with_context(|| format!("failed to load input graph {}", args.input))?;
    request.apply_to(&mut config);
    apply_overrides(&args, &mut config)?;
    config.validate()?;

    log::info!(
        "Compressing with k = {}, {} confidence buckets, {} aggregation",
        config.k,
        config.confidence_buckets,
        config.aggregation
    );

    // 2. Compress, optionally followed by incremental updates
    let outcome = match &args.changes {
        None => Compressor::new(config)?.compress_document(&request.graph)?,
        Some(path) => {
            let store = GraphStore::from_document(&request.graph)?;
            let mut updater = IncrementalUpdater::new(config, store)?;

            let batches = data::load_change_sets(path)
                .with_context(|| format!("failed to load change-sets {}", path))?;
            let summary = updater.apply_batch(batches)?;
            log::info!(
                "Incremental update recolored {} nodes in {} regions{}",
                summary.affected_nodes,
                summary.regions,
                if summary.full_recompute {
                    " (fell back to a full recompute)"
                } else {
                    ""
                }
            );

            let audit = updater.audit()?;
            if !audit.consistent {
                log::warn!(
                    "Audit replaced the incremental partition ({} divergent nodes)",
                    audit.divergent_nodes
                );
            }

            let quotient = updater.quotient();
            CompressionOutcome {
                compressed: quotient.graph,
                mapping: quotient.mapping,
                report: updater.report().clone(),
            }
        }
    };

    log::info!(
        "Compressed {} nodes into {} (ratio {:.2})",
        outcome.report.original_node_count,
        outcome.report.compressed_node_count,
        outcome.report.compression_ratio
    );

    // 3. Save results
    storage::save_results(&outcome, &args.output_dir)?;

    log::info!("Compression complete. Results saved to {}", args.output_dir);

    Ok(())
}

/// Command line flags win over the input file and the configuration file
fn apply_overrides(args: &Cli, config: &mut Config) -> Result<()> {
    if let Some(k) = args.k {
        config.k = k;
    }
    if let Some(aggregation) = &args.aggregation {
        config.aggregation = aggregation.parse::<StrengthAggregation>()?;
    }
    if let Some(buckets) = args.confidence_buckets {
        config.confidence_buckets = buckets;
    }
    if let Some(cap) = args.round_cap {
        config.orbit_round_cap = cap;
    }
    if let Some(seed) = args.seed {
        config.validation.seed = seed;
    }
    Ok(())
}
