#![warn(missing_docs)]

//! `onnx-flatten` turns an ONNX computation graph into two artifacts for an external inference
//! engine: a JSON graph descriptor listing every node with its resolved inputs, outputs and
//! attributes, and a flat weight blob holding the raw bytes of every initializer, addressed by
//! the offsets recorded in the descriptor.
//!
//! ```no_run
//! use onnx_flatten::ModelConverter;
//!
//! let report = ModelConverter::new()
//!     .input("lenet.onnx")
//!     .out_dir("artifacts")
//!     .run()
//!     .unwrap();
//! println!("{} bytes of weights", report.blob_size);
//! ```

#[macro_use]
extern crate derive_new;

/// Graph descriptor types serialized to JSON.
pub mod descriptor;

mod assembler;
mod attribute;
mod converter;
mod error;
mod logger;
mod packer;
mod progress;
mod value_info;

pub use assembler::{Assembly, assemble};
pub use attribute::extract;
pub use converter::{ConversionReport, ModelConverter, list_op_types};
pub use error::{ConvertError, Result};
pub use logger::{LoggerError, init_log};
pub use packer::{InitializerTable, PackWarning, PackingPolicy, WeightBlob, WeightPacker};
pub use progress::{ConsoleProgress, NoProgress, ProgressObserver};
pub use value_info::{ValueInfo, ValueInfoMap, resolve};
