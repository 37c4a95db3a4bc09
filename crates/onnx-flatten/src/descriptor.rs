use std::collections::BTreeMap;
use std::fmt;

use onnx_graph::ElementType;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The root of the JSON artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDescriptor {
    /// Graph level metadata.
    pub model: ModelInfo,
    /// Declared inputs of the graph, in order.
    pub inputs: Vec<ValueRef>,
    /// Declared outputs of the graph, in order.
    pub outputs: Vec<ValueRef>,
    /// Path of the weight blob, relative to the descriptor.
    pub weights_file: String,
    /// Nodes in execution order.
    pub nodes: Vec<NodeDescriptor>,
}

/// Model name and versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Name of the graph.
    pub name: String,
    /// ONNX IR version of the file.
    pub ir_version: i64,
    /// Version of the default operator set.
    pub opset_version: i64,
    /// Every operator set the model imports.
    pub opset_imports: Vec<OpsetImport>,
    /// Tool that produced the model.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub producer_name: String,
    /// Version of the producing tool.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub producer_version: String,
}

/// One operator set import.
#[derive(new, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsetImport {
    /// Empty for the default ONNX domain.
    pub domain: String,
    /// Imported version.
    pub version: i64,
}

/// One computation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Node name, possibly empty and not necessarily unique.
    pub name: String,
    /// Operator kind, e.g. `Conv`.
    pub op_type: String,
    /// Operator domain, omitted for the default ONNX domain.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    /// Input slots in declaration order.
    pub inputs: Vec<ValueRef>,
    /// Output slots in declaration order.
    pub outputs: Vec<ValueRef>,
    /// Attributes by name.
    pub attributes: AttributeMap,
    /// Weights read by this node, in input order.
    pub initializers: Vec<InitializerRecord>,
}

/// A value slot occurrence in a node or in the graph signature.
///
/// An empty slot name in ONNX marks an omitted optional input or output. It is represented by
/// [`ValueRef::Absent`], never by a value with an empty name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueRef {
    /// A named value.
    Value {
        /// Name of the slot.
        name: String,
        /// Element type, `null` when unknown.
        data_type: Option<ElementType>,
        /// Dimensions, `null` when unknown.
        shape: Shape,
    },
    /// An omitted optional slot.
    Absent,
}

impl ValueRef {
    /// Name of the slot, `None` for an absent slot.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Value { name, .. } => Some(name),
            Self::Absent => None,
        }
    }
}

/// Dimensions of a value.
///
/// `Unknown` (JSON `null`) and `Dims(vec![])` (JSON `[]`, a scalar) are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Shape {
    /// Known rank.
    Dims(Vec<Dim>),
    /// Nothing is known, not even the rank.
    Unknown,
}

/// One dimension of a [`Shape`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    /// A fixed size.
    Fixed(u64),
    /// A symbolic size such as `batch_size`.
    Symbolic(String),
    /// A size that could not be resolved.
    Unknown,
}

/// Attributes of a node, keyed by name.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// A self typed attribute value.
///
/// Serialized as `{"type": "ints", "value": [1, 1]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    /// `INT`
    Int(i64),
    /// `FLOAT`, widened from the stored single precision value.
    Float(f64),
    /// `STRING`
    String(AttrBytes),
    /// `TENSOR`
    Tensor(TensorValue),
    /// `INTS`
    Ints(Vec<i64>),
    /// `FLOATS`
    Floats(Vec<f64>),
    /// `STRINGS`
    Strings(Vec<AttrBytes>),
    /// `TENSORS`
    Tensors(Vec<TensorValue>),
}

/// The bytes of a string attribute.
///
/// ONNX strings are bytes. They serialize as a JSON string when they hold valid UTF-8 and as an
/// array of byte values otherwise, so nothing is lost either way.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct AttrBytes(pub Vec<u8>);

impl AttrBytes {
    /// The text, if the bytes are valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl fmt::Debug for AttrBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) => write!(f, "{text:?}"),
            None => write!(f, "{:?}", self.0),
        }
    }
}

impl From<&str> for AttrBytes {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl Serialize for AttrBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_str() {
            Some(text) => serializer.serialize_str(text),
            None => self.0.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for AttrBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Bytes(Vec<u8>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(text) => Self(text.into_bytes()),
            Repr::Bytes(bytes) => Self(bytes),
        })
    }
}

/// A tensor held inline in an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorValue {
    /// Tensor name, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Declared element type.
    pub data_type: ElementType,
    /// Dimensions, `[]` for a scalar.
    pub shape: Vec<u64>,
    /// Values in little-endian row-major layout. Empty for string tensors.
    pub raw_data: Vec<u8>,
    /// Values of a `STRING` tensor.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub string_data: Vec<AttrBytes>,
}

/// The element types a weight can be stored with in the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WeightType {
    /// 32-bit float, also the fallback for unmapped element types.
    Float,
    /// 64-bit float.
    Double,
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 8-bit integer.
    Uint8,
    /// Unsigned 16-bit integer.
    Uint16,
    /// IEEE half precision float.
    Float16,
}

impl WeightType {
    /// The weight type storing `elem` without conversion, if there is one.
    pub fn from_element(elem: ElementType) -> Option<Self> {
        let ty = match elem {
            ElementType::Float32 => Self::Float,
            ElementType::Float64 => Self::Double,
            ElementType::Int8 => Self::Int8,
            ElementType::Int16 => Self::Int16,
            ElementType::Int32 => Self::Int32,
            ElementType::Int64 => Self::Int64,
            ElementType::Uint8 => Self::Uint8,
            ElementType::Uint16 => Self::Uint16,
            ElementType::Float16 => Self::Float16,
            _ => return None,
        };
        Some(ty)
    }

    /// The matching ONNX element type.
    pub fn element(self) -> ElementType {
        match self {
            Self::Float => ElementType::Float32,
            Self::Double => ElementType::Float64,
            Self::Int8 => ElementType::Int8,
            Self::Int16 => ElementType::Int16,
            Self::Int32 => ElementType::Int32,
            Self::Int64 => ElementType::Int64,
            Self::Uint8 => ElementType::Uint8,
            Self::Uint16 => ElementType::Uint16,
            Self::Float16 => ElementType::Float16,
        }
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 | Self::Float16 => 2,
            Self::Float | Self::Int32 => 4,
            Self::Double | Self::Int64 => 8,
        }
    }
}

/// One weight packed in the blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializerRecord {
    /// Initializer name.
    pub name: String,
    /// Dimensions, `[]` for a scalar.
    pub shape: Vec<u64>,
    /// Layout of the bytes in the blob.
    pub data_type: WeightType,
    /// Byte offset into the blob.
    pub offset: u64,
    /// Number of bytes.
    pub size: u64,
    /// Declared element type when the bytes were converted to `FLOAT` because the declared
    /// type has no weight type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_from: Option<ElementType>,
}

impl InitializerRecord {
    /// End of the byte range, exclusive.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_slot_is_tagged() {
        let value = serde_json::to_value(ValueRef::Absent).unwrap();
        assert_eq!(value, json!({ "kind": "absent" }));
    }

    #[test]
    fn unknown_shape_differs_from_scalar() {
        let unknown = ValueRef::Value {
            name: "x".into(),
            data_type: Some(ElementType::Float32),
            shape: Shape::Unknown,
        };
        let scalar = ValueRef::Value {
            name: "x".into(),
            data_type: Some(ElementType::Float32),
            shape: Shape::Dims(vec![]),
        };

        assert_eq!(
            serde_json::to_value(&unknown).unwrap(),
            json!({ "kind": "value", "name": "x", "data_type": "FLOAT", "shape": null })
        );
        assert_eq!(serde_json::to_value(&scalar).unwrap()["shape"], json!([]));
    }

    #[test]
    fn dims_mix_fixed_symbolic_and_unknown() {
        let shape = Shape::Dims(vec![
            Dim::Symbolic("batch".into()),
            Dim::Fixed(3),
            Dim::Unknown,
        ]);
        let value = serde_json::to_value(&shape).unwrap();
        assert_eq!(value, json!(["batch", 3, null]));
        assert_eq!(serde_json::from_value::<Shape>(value).unwrap(), shape);
    }

    #[test]
    fn attribute_values_are_self_typed() {
        let ints = AttributeValue::Ints(vec![1, 2]);
        assert_eq!(
            serde_json::to_value(&ints).unwrap(),
            json!({ "type": "ints", "value": [1, 2] })
        );

        let text = AttributeValue::String("SAME_UPPER".into());
        assert_eq!(
            serde_json::to_value(&text).unwrap(),
            json!({ "type": "string", "value": "SAME_UPPER" })
        );
    }

    #[test]
    fn non_utf8_strings_keep_their_bytes() {
        let bytes = AttrBytes(vec![0xff, 0x00]);
        let value = serde_json::to_value(&bytes).unwrap();
        assert_eq!(value, json!([255, 0]));
        assert_eq!(serde_json::from_value::<AttrBytes>(value).unwrap(), bytes);
    }

    #[test]
    fn weight_type_names() {
        assert_eq!(serde_json::to_value(WeightType::Float).unwrap(), json!("FLOAT"));
        assert_eq!(serde_json::to_value(WeightType::Uint16).unwrap(), json!("UINT16"));
        assert_eq!(serde_json::to_value(WeightType::Float16).unwrap(), json!("FLOAT16"));
        assert_eq!(WeightType::from_element(ElementType::Bool), None);
    }

    #[test]
    fn fallback_is_omitted_when_not_applied() {
        let record = InitializerRecord {
            name: "W".into(),
            shape: vec![2],
            data_type: WeightType::Float,
            offset: 0,
            size: 8,
            fallback_from: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("fallback_from").is_none());
    }
}
