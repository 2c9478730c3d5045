//! Graph representation and algorithms module

pub mod algorithms;
pub mod builder;
pub mod csr;
pub mod model;
pub mod store;

pub use builder::GraphBuilder;
pub use csr::{CsrIndex, Direction, Incidence};
pub use model::{Edge, GraphDocument, Node, NodeKind, RelationType};
pub use store::{EdgeIdx, GraphStore, Neighbor, NodeIdx};
