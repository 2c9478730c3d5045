//! JSON graph documents, compression requests and change-sets

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::config::Config;
use crate::error::Result;
use crate::graph::model::GraphDocument;
use crate::quotient::StrengthAggregation;
use crate::refine::ChangeSet;

/// A graph document with optional per-request overrides
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompressionRequest {
    #[serde(flatten)]
    pub graph: GraphDocument,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<StrengthAggregation>,
}

impl CompressionRequest {
    /// Copy the request's overrides into `config`
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(k) = self.k {
            config.k = k;
        }
        if let Some(aggregation) = self.aggregation {
            config.aggregation = aggregation;
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChangeFile {
    One(ChangeSet),
    Many(Vec<ChangeSet>),
}

fn open(path: &Path, what: &str) -> Result<BufReader<File>> {
    log::info!("Reading {} file: {}", what, path.display());
    Ok(BufReader::new(File::open(path)?))
}

/// Load a compression request: `{ nodes, edges, k?, aggregation? }`
pub fn load_request(path: impl AsRef<Path>) -> Result<CompressionRequest> {
    let request: CompressionRequest = serde_json::from_reader(open(path.as_ref(), "request")?)?;
    log::info!(
        "Loaded {} nodes and {} edges",
        request.graph.nodes.len(),
        request.graph.edges.len()
    );
    Ok(request)
}

/// Load a bare graph document, ignoring any request fields
pub fn load_graph_document(path: impl AsRef<Path>) -> Result<GraphDocument> {
    Ok(load_request(path)?.graph)
}

/// Load one change-set object or an array of them
pub fn load_change_sets(path: impl AsRef<Path>) -> Result<Vec<ChangeSet>> {
    let sets = match serde_json::from_reader(open(path.as_ref(), "change-set")?)? {
        ChangeFile::One(set) => vec![set],
        ChangeFile::Many(sets) => sets,
    };
    log::info!(
        "Loaded {} change-sets with {} changes",
        sets.len(),
        sets.iter().map(ChangeSet::len).sum::<usize>()
    );
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refine::GraphChange;
    use std::fs;

    #[test]
    fn request_overrides_apply_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        fs::write(
            &path,
            r#"{
                "nodes": [{"id": "a", "type": "entity", "confidence": 0.5}],
                "edges": [],
                "k": 3,
                "aggregation": "mean"
            }"#,
        )
        .unwrap();

        let request = load_request(&path).unwrap();
        assert_eq!(request.graph.nodes.len(), 1);

        let mut config = Config::default();
        request.apply_to(&mut config);
        assert_eq!(config.k, 3);
        assert_eq!(config.aggregation, StrengthAggregation::Mean);

        assert_eq!(load_graph_document(&path).unwrap(), request.graph);
    }

    #[test]
    fn change_files_accept_one_or_many() {
        let dir = tempfile::tempdir().unwrap();
        let one = dir.path().join("one.json");
        fs::write(&one, r#"{"changes": [{"op": "remove_node", "id": "a"}]}"#).unwrap();
        let many = dir.path().join("many.json");
        fs::write(
            &many,
            r#"[{"changes": []}, {"changes": [{"op": "remove_edge", "source_id": "a", "target_id": "b", "edge_type": "is_a"}]}]"#,
        )
        .unwrap();

        let sets = load_change_sets(&one).unwrap();
        assert_eq!(sets[0].changes, vec![GraphChange::RemoveNode { id: "a".into() }]);
        assert_eq!(load_change_sets(&many).unwrap().len(), 2);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_request("/nonexistent/graph.json").unwrap_err();
        assert!(matches!(err, crate::error::CompressError::Io(_)));
    }
}
