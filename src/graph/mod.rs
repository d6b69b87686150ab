//! Resumable construction of typed object graphs from tagged source
//! documents. The builder keeps its traversal on an explicit work stack so
//! it can suspend mid-graph once its time budget runs out and pick up on a
//! later frame exactly where it left off.

use thiserror::Error;

pub mod builder;
pub mod source;
pub mod value;

pub use builder::{BuildStep, ObjectGraphBuilder};
pub use source::SourceNode;
pub use value::{DictHandle, GraphObject, ListHandle, ObjectHandle, TypeRegistry, Value};

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Unknown object type tag \"{tag}\"")]
    UnknownType { tag: String },

    #[error("Reference to unknown id \"{id}\"")]
    UnresolvedRef { id: String },

    #[error("Document has no root element")]
    EmptyDocument,

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}
