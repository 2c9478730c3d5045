//! Results persistence module

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::graph::model::GraphDocument;
use crate::pipeline::CompressionOutcome;
use crate::quotient::MappingTable;
use crate::validate::VerificationReport;

pub const COMPRESSED_FILE: &str = "compressed.json";
pub const MAPPING_FILE: &str = "mapping.json";
pub const MAPPING_SNAPSHOT_FILE: &str = "mapping.bin";
pub const REPORT_FILE: &str = "report.json";
pub const SUMMARY_FILE: &str = "summary.json";

/// Save the compressed graph, mapping table, report and summary
pub fn save_results(outcome: &CompressionOutcome, output_dir: impl AsRef<Path>) -> Result<()> {
    let output_dir = output_dir.as_ref();
    log::info!(
        "Saving {} compressed nodes to {}",
        outcome.compressed.nodes.len(),
        output_dir.display()
    );

    // Ensure output directory exists
    fs::create_dir_all(output_dir)?;

    write_json(&output_dir.join(COMPRESSED_FILE), &outcome.compressed)?;
    save_mapping(&outcome.mapping, output_dir.join(MAPPING_FILE))?;
    save_mapping(&outcome.mapping, output_dir.join(MAPPING_SNAPSHOT_FILE))?;
    write_json(&output_dir.join(REPORT_FILE), &outcome.report)?;
    save_summary(outcome, output_dir)?;

    log::info!("Results saved successfully");

    Ok(())
}

/// Save summary information
fn save_summary(outcome: &CompressionOutcome, output_dir: &Path) -> Result<()> {
    log::info!("Saving summary information");

    let report = &outcome.report;
    let largest_class = outcome
        .mapping
        .members
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0);
    let collapsed_edges: u64 = outcome
        .compressed
        .edges
        .iter()
        .map(|e| e.collapsed_count.unwrap_or(1))
        .sum();

    let summary = json!({
        "graph_stats": {
            "original_node_count": report.original_node_count,
            "original_edge_count": report.original_edge_count,
            "compressed_node_count": report.compressed_node_count,
            "compressed_edge_count": report.compressed_edge_count,
            "collapsed_edges": collapsed_edges,
        },
        "class_stats": {
            "class_count": outcome.mapping.class_count(),
            "largest_class_size": largest_class,
            "singleton_classes": outcome.mapping.members.iter().filter(|m| m.len() == 1).count(),
            "compression_ratio": report.compression_ratio,
        },
        "validation": {
            "exhaustive": report.exhaustive,
            "reachability_checks_run": report.reachability_checks_run,
            "pattern_checks_run": report.pattern_checks_run,
            "refinement_rounds": report.refinement_rounds,
            "stable_partition": report.stable_partition,
            "warnings": report.warnings.len(),
        }
    });

    let mut file = File::create(output_dir.join(SUMMARY_FILE))?;
    file.write_all(serde_json::to_string_pretty(&summary)?.as_bytes())?;

    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    log::debug!("Writing {}", path.display());
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    log::debug!("Reading {}", path.display());
    Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
}

fn is_snapshot(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "bin")
}

pub fn load_compressed(path: impl AsRef<Path>) -> Result<GraphDocument> {
    read_json(path.as_ref())
}

pub fn load_report(path: impl AsRef<Path>) -> Result<VerificationReport> {
    read_json(path.as_ref())
}

/// Write a mapping table; `.bin` paths get a compact bincode snapshot, anything else JSON
pub fn save_mapping(mapping: &MappingTable, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !is_snapshot(path) {
        return write_json(path, mapping);
    }
    log::debug!("Writing snapshot {}", path.display());
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, mapping)?;
    writer.flush()?;
    Ok(())
}

/// Read a mapping table written by [`save_mapping`]
pub fn load_mapping(path: impl AsRef<Path>) -> Result<MappingTable> {
    let path = path.as_ref();
    if !is_snapshot(path) {
        return read_json(path);
    }
    Ok(bincode::deserialize_from(BufReader::new(File::open(path)?))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::graph::model::{Edge, Node};
    use crate::pipeline::Compressor;

    fn outcome() -> CompressionOutcome {
        let mut doc = GraphDocument::default();
        doc.nodes.push(
            Node::new("hub", "concept", 0.9)
                .with_property("label", json!("Hub"))
                .with_provenance("doc-1#p3"),
        );
        for i in 0..3 {
            let id = format!("leaf{i}");
            doc.nodes.push(Node::new(id.clone(), "entity", 0.6));
            doc.edges.push(Edge::new("hub", id, "part_of").with_strength(0.75));
        }
        Compressor::new(Config::new(2))
            .unwrap()
            .compress_document(&doc)
            .unwrap()
    }

    #[test]
    fn results_round_trip_from_disk() {
        let outcome = outcome();
        let dir = tempfile::tempdir().unwrap();
        save_results(&outcome, dir.path()).unwrap();

        assert_eq!(
            load_compressed(dir.path().join(COMPRESSED_FILE)).unwrap(),
            outcome.compressed
        );
        assert_eq!(
            load_mapping(dir.path().join(MAPPING_FILE)).unwrap(),
            outcome.mapping
        );
        assert_eq!(
            load_mapping(dir.path().join(MAPPING_SNAPSHOT_FILE)).unwrap(),
            outcome.mapping
        );
        assert_eq!(load_report(dir.path().join(REPORT_FILE)).unwrap(), outcome.report);

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap())
                .unwrap();
        assert_eq!(summary["class_stats"]["largest_class_size"], 3);
        assert_eq!(summary["graph_stats"]["collapsed_edges"], 3);
    }

    #[test]
    fn compressed_output_keeps_properties_and_counts() {
        let outcome = outcome();
        let json = serde_json::to_value(&outcome.compressed).unwrap();
        assert_eq!(json["nodes"][0]["properties"]["label"], "Hub");
        assert_eq!(json["nodes"][1]["source_members"][2], "leaf2");
        assert_eq!(json["edges"][0]["collapsed_count"], 3);
    }
}
