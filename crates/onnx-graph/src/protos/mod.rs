//! Rust types generated from the ONNX protobuf schema.

#[allow(clippy::all)]
#[allow(missing_docs)]
mod inner {
    include!(concat!(env!("OUT_DIR"), "/onnx-protos/mod.rs"));
}

pub use inner::onnx::*;
