use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::protos::tensor_proto::DataType as DT;
use protobuf::Enum;

/// The element type of an ONNX tensor.
///
/// Every tensor element type of the ONNX IR has exactly one variant. Names (for `Display`,
/// `FromStr` and serde) are the ONNX `TensorProto.DataType` names, e.g. `FLOAT` or `UINT8`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
pub enum ElementType {
    #[strum(serialize = "FLOAT")]
    #[serde(rename = "FLOAT")]
    Float32,
    #[strum(serialize = "UINT8")]
    #[serde(rename = "UINT8")]
    Uint8,
    #[strum(serialize = "INT8")]
    #[serde(rename = "INT8")]
    Int8,
    #[strum(serialize = "UINT16")]
    #[serde(rename = "UINT16")]
    Uint16,
    #[strum(serialize = "INT16")]
    #[serde(rename = "INT16")]
    Int16,
    #[strum(serialize = "INT32")]
    #[serde(rename = "INT32")]
    Int32,
    #[strum(serialize = "INT64")]
    #[serde(rename = "INT64")]
    Int64,
    #[strum(serialize = "STRING")]
    #[serde(rename = "STRING")]
    String,
    #[strum(serialize = "BOOL")]
    #[serde(rename = "BOOL")]
    Bool,
    #[strum(serialize = "FLOAT16")]
    #[serde(rename = "FLOAT16")]
    Float16,
    #[strum(serialize = "DOUBLE")]
    #[serde(rename = "DOUBLE")]
    Float64,
    #[strum(serialize = "UINT32")]
    #[serde(rename = "UINT32")]
    Uint32,
    #[strum(serialize = "UINT64")]
    #[serde(rename = "UINT64")]
    Uint64,
    #[strum(serialize = "COMPLEX64")]
    #[serde(rename = "COMPLEX64")]
    Complex64,
    #[strum(serialize = "COMPLEX128")]
    #[serde(rename = "COMPLEX128")]
    Complex128,
    #[strum(serialize = "BFLOAT16")]
    #[serde(rename = "BFLOAT16")]
    BFloat16,
    #[strum(serialize = "FLOAT8E4M3FN")]
    #[serde(rename = "FLOAT8E4M3FN")]
    Float8E4M3Fn,
    #[strum(serialize = "FLOAT8E4M3FNUZ")]
    #[serde(rename = "FLOAT8E4M3FNUZ")]
    Float8E4M3FnUz,
    #[strum(serialize = "FLOAT8E5M2")]
    #[serde(rename = "FLOAT8E5M2")]
    Float8E5M2,
    #[strum(serialize = "FLOAT8E5M2FNUZ")]
    #[serde(rename = "FLOAT8E5M2FNUZ")]
    Float8E5M2FnUz,
    #[strum(serialize = "UINT4")]
    #[serde(rename = "UINT4")]
    Uint4,
    #[strum(serialize = "INT4")]
    #[serde(rename = "INT4")]
    Int4,
    #[strum(serialize = "FLOAT4E2M1")]
    #[serde(rename = "FLOAT4E2M1")]
    Float4E2M1,
}

impl ElementType {
    /// Map an ONNX `TensorProto.DataType` value to an element type.
    ///
    /// Returns `None` for `UNDEFINED` and for values this schema does not know.
    pub fn from_proto(data_type: i32) -> Option<Self> {
        let elem = match DT::from_i32(data_type)? {
            DT::UNDEFINED => return None,
            DT::FLOAT => Self::Float32,
            DT::UINT8 => Self::Uint8,
            DT::INT8 => Self::Int8,
            DT::UINT16 => Self::Uint16,
            DT::INT16 => Self::Int16,
            DT::INT32 => Self::Int32,
            DT::INT64 => Self::Int64,
            DT::STRING => Self::String,
            DT::BOOL => Self::Bool,
            DT::FLOAT16 => Self::Float16,
            DT::DOUBLE => Self::Float64,
            DT::UINT32 => Self::Uint32,
            DT::UINT64 => Self::Uint64,
            DT::COMPLEX64 => Self::Complex64,
            DT::COMPLEX128 => Self::Complex128,
            DT::BFLOAT16 => Self::BFloat16,
            DT::FLOAT8E4M3FN => Self::Float8E4M3Fn,
            DT::FLOAT8E4M3FNUZ => Self::Float8E4M3FnUz,
            DT::FLOAT8E5M2 => Self::Float8E5M2,
            DT::FLOAT8E5M2FNUZ => Self::Float8E5M2FnUz,
            DT::UINT4 => Self::Uint4,
            DT::INT4 => Self::Int4,
            DT::FLOAT4E2M1 => Self::Float4E2M1,
        };
        Some(elem)
    }

    /// The ONNX `TensorProto.DataType` value of this element type.
    pub fn to_proto(self) -> i32 {
        let dt = match self {
            Self::Float32 => DT::FLOAT,
            Self::Uint8 => DT::UINT8,
            Self::Int8 => DT::INT8,
            Self::Uint16 => DT::UINT16,
            Self::Int16 => DT::INT16,
            Self::Int32 => DT::INT32,
            Self::Int64 => DT::INT64,
            Self::String => DT::STRING,
            Self::Bool => DT::BOOL,
            Self::Float16 => DT::FLOAT16,
            Self::Float64 => DT::DOUBLE,
            Self::Uint32 => DT::UINT32,
            Self::Uint64 => DT::UINT64,
            Self::Complex64 => DT::COMPLEX64,
            Self::Complex128 => DT::COMPLEX128,
            Self::BFloat16 => DT::BFLOAT16,
            Self::Float8E4M3Fn => DT::FLOAT8E4M3FN,
            Self::Float8E4M3FnUz => DT::FLOAT8E4M3FNUZ,
            Self::Float8E5M2 => DT::FLOAT8E5M2,
            Self::Float8E5M2FnUz => DT::FLOAT8E5M2FNUZ,
            Self::Uint4 => DT::UINT4,
            Self::Int4 => DT::INT4,
            Self::Float4E2M1 => DT::FLOAT4E2M1,
        };
        dt.value()
    }

    /// Size of one element in bytes.
    ///
    /// `None` for strings (variable length) and for the packed sub-byte types.
    pub fn size(self) -> Option<usize> {
        match self {
            Self::Bool
            | Self::Uint8
            | Self::Int8
            | Self::Float8E4M3Fn
            | Self::Float8E4M3FnUz
            | Self::Float8E5M2
            | Self::Float8E5M2FnUz => Some(1),
            Self::Uint16 | Self::Int16 | Self::Float16 | Self::BFloat16 => Some(2),
            Self::Float32 | Self::Int32 | Self::Uint32 => Some(4),
            Self::Float64 | Self::Int64 | Self::Uint64 | Self::Complex64 => Some(8),
            Self::Complex128 => Some(16),
            Self::String | Self::Uint4 | Self::Int4 | Self::Float4E2M1 => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn proto_mapping_is_a_bijection() {
        for elem in ElementType::iter() {
            assert_eq!(ElementType::from_proto(elem.to_proto()), Some(elem));
        }
    }

    #[test]
    fn undefined_and_unknown_values_have_no_type() {
        assert_eq!(ElementType::from_proto(0), None);
        assert_eq!(ElementType::from_proto(999), None);
    }

    #[test]
    fn names_follow_onnx() {
        assert_eq!(ElementType::Float32.to_string(), "FLOAT");
        assert_eq!(ElementType::Float64.to_string(), "DOUBLE");
        assert_eq!(ElementType::Uint16.to_string(), "UINT16");
        assert_eq!(
            ElementType::from_str("FLOAT16").unwrap(),
            ElementType::Float16
        );
        assert_eq!(
            ElementType::from_str("FLOAT8E4M3FNUZ").unwrap(),
            ElementType::Float8E4M3FnUz
        );
    }

    #[test]
    fn sizes() {
        assert_eq!(ElementType::Float32.size(), Some(4));
        assert_eq!(ElementType::Float16.size(), Some(2));
        assert_eq!(ElementType::Bool.size(), Some(1));
        assert_eq!(ElementType::Complex128.size(), Some(16));
        assert_eq!(ElementType::String.size(), None);
        assert_eq!(ElementType::Int4.size(), None);
    }
}
