use std::path::PathBuf;

use onnx_graph::{LoadError, TensorError};

/// Errors that abort a conversion run.
///
/// None of them leaves a descriptor or weight blob behind under the final file names.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// The model could not be loaded, including an invalid input path.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A node attribute has a type tag with no descriptor representation.
    #[error("node '{node}': attribute '{attribute}' has unsupported type {type_tag}")]
    UnsupportedAttributeType {
        /// Name of the node carrying the attribute.
        node: String,
        /// Name of the attribute.
        attribute: String,
        /// The ONNX type tag, by name when known.
        type_tag: String,
    },

    /// A tensor payload (initializer or tensor attribute) cannot be laid out as bytes.
    #[error("invalid tensor '{name}': {source}")]
    InvalidTensor {
        /// Name of the tensor.
        name: String,
        /// What is wrong with it.
        source: TensorError,
    },

    /// The model imports no operator set.
    #[error("the model does not declare any operator set import")]
    MissingOpset,

    /// Writing an artifact failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The descriptor could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A finished artifact could not be moved to its final name.
    #[error("unable to publish {}: {source}", path.display())]
    Persist {
        /// Final path of the artifact.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
}

/// Result alias for conversion operations.
pub type Result<T> = std::result::Result<T, ConvertError>;
