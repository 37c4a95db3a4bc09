use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

use half::bf16;
use onnx_graph::{
    ElementType, TensorError,
    protos::{GraphProto, NodeProto, TensorProto},
    tensor_bytes, tensor_shape,
};
use serde::{Deserialize, Serialize};

use crate::descriptor::{InitializerRecord, WeightType};
use crate::error::{ConvertError, Result};

/// Append-only sink for weight bytes.
///
/// The cursor starts at zero and advances by exactly the number of bytes appended, so every
/// range handed out is contiguous with the previous one.
#[derive(Debug)]
pub struct WeightBlob<W: Write> {
    writer: W,
    cursor: u64,
}

impl<W: Write> WeightBlob<W> {
    /// Create an empty blob writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer, cursor: 0 }
    }

    /// Append `bytes`, returning the `(offset, size)` they were written at.
    pub fn append(&mut self, bytes: &[u8]) -> io::Result<(u64, u64)> {
        let offset = self.cursor;
        self.writer.write_all(bytes)?;
        self.cursor += bytes.len() as u64;
        Ok((offset, bytes.len() as u64))
    }

    /// Number of bytes appended so far.
    pub fn len(&self) -> u64 {
        self.cursor
    }

    /// Whether nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Flush buffered bytes to the underlying writer.
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Give back the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// The constant tensors of a graph, by name. Built once per run.
#[derive(Debug, Default)]
pub struct InitializerTable<'a> {
    tensors: HashMap<&'a str, &'a TensorProto>,
}

impl<'a> InitializerTable<'a> {
    /// Index the initializers of `graph`. A repeated name keeps the last tensor.
    pub fn new(graph: &'a GraphProto) -> Self {
        let tensors = graph
            .initializer
            .iter()
            .map(|tensor| (tensor.name.as_str(), tensor))
            .collect();
        Self { tensors }
    }

    /// Look up an initializer.
    pub fn get(&self, name: &str) -> Option<&'a TensorProto> {
        self.tensors.get(name).copied()
    }

    /// Number of initializers.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the graph has no initializers.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

/// What to do when several nodes read the same initializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PackingPolicy {
    /// Write the bytes again, at a new offset, for every node reading the initializer.
    #[default]
    Duplicate,
    /// Write the bytes once and point every later reference at the same range.
    Deduplicate,
}

/// Non-fatal issues met while packing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackWarning {
    /// The declared element type has no weight type. The values were converted to `FLOAT`,
    /// which may lose precision or change integer semantics.
    UnmappedElementType {
        /// Initializer name.
        initializer: String,
        /// The raw ONNX `data_type` value.
        data_type: i32,
        /// The declared type, when it is a known element type.
        declared: Option<ElementType>,
    },
}

impl std::fmt::Display for PackWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnmappedElementType {
                initializer,
                data_type,
                declared,
            } => {
                let declared = declared.map_or_else(|| data_type.to_string(), |d| d.to_string());
                write!(
                    f,
                    "initializer '{initializer}' has element type {declared} with no weight \
                     type, packed as FLOAT"
                )
            }
        }
    }
}

/// Packs the initializers read by each node into a [`WeightBlob`].
#[derive(Debug)]
pub struct WeightPacker<'a> {
    table: &'a InitializerTable<'a>,
    policy: PackingPolicy,
    packed: HashMap<String, InitializerRecord>,
    warned: HashSet<String>,
    warnings: Vec<PackWarning>,
}

impl<'a> WeightPacker<'a> {
    /// Create a packer over the initializers of a graph.
    pub fn new(table: &'a InitializerTable<'a>, policy: PackingPolicy) -> Self {
        Self {
            table,
            policy,
            packed: HashMap::new(),
            warned: HashSet::new(),
            warnings: Vec::new(),
        }
    }

    /// Pack every initializer among the inputs of `node`, in input order.
    pub fn pack<W: Write>(
        &mut self,
        node: &NodeProto,
        blob: &mut WeightBlob<W>,
    ) -> Result<Vec<InitializerRecord>> {
        let mut records = Vec::new();

        for name in node.input.iter().filter(|name| !name.is_empty()) {
            let Some(tensor) = self.table.get(name) else {
                continue;
            };

            if self.policy == PackingPolicy::Deduplicate
                && let Some(record) = self.packed.get(name)
            {
                log::debug!("Reusing '{name}' at offset {}", record.offset);
                records.push(record.clone());
                continue;
            }

            let record = self.pack_tensor(tensor, blob)?;
            log::debug!(
                "Packed '{}' {:?} {:?} at offset {} ({} bytes)",
                record.name,
                record.data_type,
                record.shape,
                record.offset,
                record.size
            );
            self.packed.insert(name.clone(), record.clone());
            records.push(record);
        }

        Ok(records)
    }

    /// Warnings collected so far.
    pub fn warnings(&self) -> &[PackWarning] {
        &self.warnings
    }

    /// Number of distinct initializers written.
    pub fn packed_count(&self) -> usize {
        self.packed.len()
    }

    /// Consume the packer, returning its warnings.
    pub fn into_warnings(self) -> Vec<PackWarning> {
        self.warnings
    }

    fn pack_tensor<W: Write>(
        &mut self,
        tensor: &TensorProto,
        blob: &mut WeightBlob<W>,
    ) -> Result<InitializerRecord> {
        let invalid = |source| ConvertError::InvalidTensor {
            name: tensor.name.clone(),
            source,
        };

        let shape = tensor_shape(tensor).map_err(invalid)?;
        let declared = ElementType::from_proto(tensor.data_type);

        let (data_type, bytes, fallback_from) = match declared.and_then(WeightType::from_element)
        {
            Some(weight_type) => {
                let bytes = tensor_bytes(tensor, weight_type.element()).map_err(invalid)?;
                (weight_type, bytes, None)
            }
            None => {
                self.warn_unmapped(tensor, declared);
                let bytes = float_fallback(tensor, declared).map_err(invalid)?;
                (WeightType::Float, bytes, declared)
            }
        };

        let (offset, size) = blob.append(&bytes)?;

        Ok(InitializerRecord {
            name: tensor.name.clone(),
            shape,
            data_type,
            offset,
            size,
            fallback_from,
        })
    }

    fn warn_unmapped(&mut self, tensor: &TensorProto, declared: Option<ElementType>) {
        if !self.warned.insert(tensor.name.clone()) {
            return;
        }
        let warning = PackWarning::UnmappedElementType {
            initializer: tensor.name.clone(),
            data_type: tensor.data_type,
            declared,
        };
        log::warn!("{warning}");
        self.warnings.push(warning);
    }
}

/// Convert the values of a tensor whose type has no weight type to 32-bit floats.
///
/// Types that can be decoded (BOOL, UINT32, UINT64, BFLOAT16) are converted value by value.
/// Anything else is read as if it had been stored as FLOAT.
fn float_fallback(
    tensor: &TensorProto,
    declared: Option<ElementType>,
) -> std::result::Result<Vec<u8>, TensorError> {
    let values: Vec<f32> = match declared {
        Some(ElementType::Bool) => tensor_bytes(tensor, ElementType::Bool)?
            .iter()
            .map(|&b| if b != 0 { 1.0 } else { 0.0 })
            .collect(),
        Some(ElementType::Uint32) => tensor_bytes(tensor, ElementType::Uint32)?
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32)
            .collect(),
        Some(ElementType::Uint64) => tensor_bytes(tensor, ElementType::Uint64)?
            .chunks_exact(8)
            .map(|c| {
                u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
            })
            .collect(),
        Some(ElementType::BFloat16) => tensor_bytes(tensor, ElementType::BFloat16)?
            .chunks_exact(2)
            .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        _ => return tensor_bytes(tensor, ElementType::Float32),
    };

    Ok(values.iter().flat_map(|v| v.to_le_bytes()).collect())
}
