//! Decoding of `TensorProto` payloads into a flat little-endian byte layout.
//!
//! ONNX stores tensor values either in `raw_data` (already little-endian, row-major) or in one
//! of the typed repeated fields. Which typed field holds which element type is fixed by the
//! ONNX IR:
//!
//! | element type                                      | field         |
//! |---------------------------------------------------|---------------|
//! | FLOAT, COMPLEX64                                  | `float_data`  |
//! | DOUBLE, COMPLEX128                                | `double_data` |
//! | INT64                                             | `int64_data`  |
//! | UINT32, UINT64                                    | `uint64_data` |
//! | INT32, INT16, INT8, UINT16, UINT8, BOOL, FLOAT16, BFLOAT16, FLOAT8* | `int32_data` |
//!
//! Narrow types stored in `int32_data` keep only their low bits (FLOAT16/BFLOAT16 hold the
//! raw bit pattern).

use half::{bf16, f16};

use crate::element::ElementType;
use crate::protos::TensorProto;

/// Error raised when a tensor payload cannot be laid out as bytes.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TensorError {
    /// A dimension is negative.
    #[error("negative dimension in shape {0:?}")]
    NegativeDim(Vec<i64>),

    /// The `data_type` value is `UNDEFINED` or not a known element type.
    #[error("unknown element type {0}")]
    UnknownType(i32),

    /// The byte size implied by the shape does not fit in memory.
    #[error("shape {0:?} is too large to lay out")]
    TooLarge(Vec<u64>),

    /// The element type has no fixed-width byte layout.
    #[error("element type {0} has no fixed-width byte layout")]
    UnsupportedType(ElementType),

    /// The payload does not hold `product(shape)` elements.
    #[error("expected {expected} bytes for shape {shape:?}, found {found}")]
    SizeMismatch {
        /// Declared dimensions.
        shape: Vec<u64>,
        /// Byte count implied by the shape.
        expected: usize,
        /// Byte count actually present.
        found: usize,
    },
}

/// The dimensions of a tensor as unsigned sizes.
pub fn tensor_shape(tensor: &TensorProto) -> Result<Vec<u64>, TensorError> {
    if tensor.dims.iter().any(|&d| d < 0) {
        return Err(TensorError::NegativeDim(tensor.dims.clone()));
    }
    Ok(tensor.dims.iter().map(|&d| d as u64).collect())
}

/// The declared element type of a tensor.
pub fn tensor_element_type(tensor: &TensorProto) -> Result<ElementType, TensorError> {
    ElementType::from_proto(tensor.data_type).ok_or(TensorError::UnknownType(tensor.data_type))
}

/// Number of elements implied by the tensor dimensions (`1` for a scalar), `None` on overflow.
pub fn element_count(shape: &[u64]) -> Option<u64> {
    shape.iter().try_fold(1u64, |count, &d| count.checked_mul(d))
}

/// Lay out the values of `tensor` as bytes, interpreting them as `elem`.
///
/// `elem` is usually the declared element type, but callers may force another interpretation
/// (for instance a float32 fallback). The result always holds exactly
/// `product(dims) * elem.size()` bytes, otherwise [`TensorError::SizeMismatch`] is returned.
pub fn tensor_bytes(tensor: &TensorProto, elem: ElementType) -> Result<Vec<u8>, TensorError> {
    let shape = tensor_shape(tensor)?;
    let width = elem.size().ok_or(TensorError::UnsupportedType(elem))?;
    let expected = element_count(&shape)
        .and_then(|count| usize::try_from(count).ok())
        .and_then(|count| count.checked_mul(width))
        .ok_or_else(|| TensorError::TooLarge(shape.clone()))?;

    let bytes = if !tensor.raw_data.is_empty() {
        tensor.raw_data.clone()
    } else {
        typed_field_bytes(tensor, elem)
    };

    if bytes.len() != expected {
        return Err(TensorError::SizeMismatch {
            shape,
            expected,
            found: bytes.len(),
        });
    }

    Ok(bytes)
}

fn typed_field_bytes(tensor: &TensorProto, elem: ElementType) -> Vec<u8> {
    match elem {
        ElementType::Float32 | ElementType::Complex64 => to_le_bytes(&tensor.float_data),
        ElementType::Float64 | ElementType::Complex128 => to_le_bytes(&tensor.double_data),
        ElementType::Int64 => to_le_bytes(&tensor.int64_data),
        ElementType::Uint64 => to_le_bytes(&tensor.uint64_data),
        ElementType::Uint32 => {
            let data: Vec<u32> = tensor.uint64_data.iter().map(|&x| x as u32).collect();
            to_le_bytes(&data)
        }
        ElementType::Int32 => to_le_bytes(&tensor.int32_data),
        ElementType::Int16 => {
            let data: Vec<i16> = tensor.int32_data.iter().map(|&x| x as i16).collect();
            to_le_bytes(&data)
        }
        ElementType::Uint16 => {
            let data: Vec<u16> = tensor.int32_data.iter().map(|&x| x as u16).collect();
            to_le_bytes(&data)
        }
        ElementType::Float16 => {
            let data: Vec<f16> = tensor
                .int32_data
                .iter()
                .map(|&x| f16::from_bits(x as u16))
                .collect();
            to_le_bytes(&data)
        }
        ElementType::BFloat16 => {
            let data: Vec<bf16> = tensor
                .int32_data
                .iter()
                .map(|&x| bf16::from_bits(x as u16))
                .collect();
            to_le_bytes(&data)
        }
        ElementType::Int8 => tensor.int32_data.iter().map(|&x| x as i8 as u8).collect(),
        ElementType::Uint8
        | ElementType::Bool
        | ElementType::Float8E4M3Fn
        | ElementType::Float8E4M3FnUz
        | ElementType::Float8E5M2
        | ElementType::Float8E5M2FnUz => tensor.int32_data.iter().map(|&x| x as u8).collect(),
        // Rejected by the caller through `ElementType::size`.
        ElementType::String | ElementType::Uint4 | ElementType::Int4 | ElementType::Float4E2M1 => {
            Vec::new()
        }
    }
}

/// Little-endian bytes of a slice of plain numbers.
fn to_le_bytes<T: bytemuck::Pod>(data: &[T]) -> Vec<u8> {
    let mut bytes = bytemuck::cast_slice::<T, u8>(data).to_vec();
    if cfg!(target_endian = "big") {
        let width = core::mem::size_of::<T>();
        for chunk in bytes.chunks_exact_mut(width) {
            chunk.reverse();
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(dims: &[i64], data_type: ElementType) -> TensorProto {
        let mut tensor = TensorProto::new();
        tensor.dims = dims.to_vec();
        tensor.data_type = data_type.to_proto();
        tensor
    }

    #[test]
    fn raw_data_is_copied_verbatim() {
        let mut t = tensor(&[2], ElementType::Float32);
        t.raw_data = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();

        let bytes = tensor_bytes(&t, ElementType::Float32).unwrap();
        assert_eq!(bytes, t.raw_data);
    }

    #[test]
    fn float_data_is_laid_out_little_endian() {
        let mut t = tensor(&[2, 2], ElementType::Float32);
        t.float_data = vec![1.0, 2.0, 3.0, 4.0];

        let bytes = tensor_bytes(&t, ElementType::Float32).unwrap();
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn narrow_integers_come_from_int32_data() {
        let mut t = tensor(&[3], ElementType::Int8);
        t.int32_data = vec![-1, 0, 127];
        assert_eq!(
            tensor_bytes(&t, ElementType::Int8).unwrap(),
            vec![0xff, 0x00, 0x7f]
        );

        let mut t = tensor(&[2], ElementType::Uint16);
        t.int32_data = vec![1, 0xffff];
        assert_eq!(
            tensor_bytes(&t, ElementType::Uint16).unwrap(),
            vec![0x01, 0x00, 0xff, 0xff]
        );
    }

    #[test]
    fn float16_keeps_bit_pattern() {
        let one = f16::from_f32(1.0);
        let mut t = tensor(&[1], ElementType::Float16);
        t.int32_data = vec![one.to_bits() as i32];

        let bytes = tensor_bytes(&t, ElementType::Float16).unwrap();
        assert_eq!(bytes, one.to_le_bytes().to_vec());
    }

    #[test]
    fn scalar_has_one_element() {
        let mut t = tensor(&[], ElementType::Int64);
        t.int64_data = vec![42];
        assert_eq!(
            tensor_bytes(&t, ElementType::Int64).unwrap(),
            42i64.to_le_bytes().to_vec()
        );
    }

    #[test]
    fn empty_tensor_has_no_bytes() {
        let t = tensor(&[0, 3], ElementType::Float32);
        assert!(tensor_bytes(&t, ElementType::Float32).unwrap().is_empty());
    }

    #[test]
    fn size_mismatch_is_reported() {
        let mut t = tensor(&[4], ElementType::Float32);
        t.float_data = vec![1.0, 2.0];

        assert_eq!(
            tensor_bytes(&t, ElementType::Float32),
            Err(TensorError::SizeMismatch {
                shape: vec![4],
                expected: 16,
                found: 8,
            })
        );
    }

    #[test]
    fn strings_are_rejected() {
        let t = tensor(&[1], ElementType::String);
        assert_eq!(
            tensor_bytes(&t, ElementType::String),
            Err(TensorError::UnsupportedType(ElementType::String))
        );
    }

    #[test]
    fn undefined_type_is_unknown() {
        let mut t = TensorProto::new();
        t.data_type = 0;
        assert_eq!(tensor_element_type(&t), Err(TensorError::UnknownType(0)));
    }

    #[test]
    fn overflowing_shape_is_too_large() {
        let t = tensor(&[1 << 40, 1 << 40], ElementType::Float32);
        assert_eq!(
            tensor_bytes(&t, ElementType::Float32),
            Err(TensorError::TooLarge(vec![1 << 40, 1 << 40]))
        );
        assert_eq!(element_count(&[1 << 40, 1 << 40]), None);
        assert_eq!(element_count(&[2, 3, 4]), Some(24));
    }

    #[test]
    fn negative_dims_are_rejected() {
        let t = tensor(&[-1, 2], ElementType::Float32);
        assert_eq!(
            tensor_bytes(&t, ElementType::Float32),
            Err(TensorError::NegativeDim(vec![-1, 2]))
        );
    }
}
