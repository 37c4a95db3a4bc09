#![warn(missing_docs)]

//! Reading ONNX models.
//!
//! This crate decodes ONNX protobuf files into the generated [`protos`] types and provides
//! the helpers the graph exporter builds on:
//!
//! - [`load_model`] reads a `.onnx` file and inlines tensors stored as external data,
//! - [`ElementType`] names the ONNX tensor element types,
//! - [`tensor_bytes`] lays out initializer payloads as little-endian bytes,
//! - [`infer_shapes`] annotates intermediate values with their type and shape.

pub mod protos;

#[cfg(any(test, feature = "test-utils"))]
pub mod builder;
mod element;
mod loader;
pub mod shape_inference;
mod tensor;

pub use element::ElementType;
pub use loader::{LoadError, check_model_path, decode_model, inline_external_data, load_model};
pub use shape_inference::infer_shapes;
pub use tensor::{
    TensorError, element_count, tensor_bytes, tensor_element_type, tensor_shape,
};
