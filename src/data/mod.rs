//! Input loading

pub mod json;

pub use json::{load_change_sets, load_graph_document, load_request, CompressionRequest};
