use onnx_graph::{
    ElementType,
    protos::{AttributeProto, NodeProto, TensorProto, attribute_proto::AttributeType},
    tensor_bytes, tensor_element_type, tensor_shape,
};

use crate::descriptor::{AttrBytes, AttributeMap, AttributeValue, TensorValue};
use crate::error::{ConvertError, Result};

/// Convert the attributes of a node into an [`AttributeMap`].
///
/// Every attribute appears exactly once. If a node repeats an attribute name the last
/// occurrence is kept. Graph, sparse tensor and type attributes have no representation and
/// abort the conversion.
pub fn extract(node: &NodeProto) -> Result<AttributeMap> {
    let mut attributes = AttributeMap::new();

    for attr in node.attribute.iter() {
        let value = attribute_value(node, attr)?;
        if attributes.insert(attr.name.clone(), value).is_some() {
            log::warn!(
                "Node '{}' ({}) repeats attribute '{}', keeping the last value",
                node.name,
                node.op_type,
                attr.name
            );
        }
    }

    Ok(attributes)
}

fn attribute_value(node: &NodeProto, attr: &AttributeProto) -> Result<AttributeValue> {
    let kind = attr.type_.enum_value().map_err(|tag| unsupported(node, attr, tag.to_string()))?;

    let value = match kind {
        AttributeType::FLOAT => AttributeValue::Float(attr.f as f64),
        AttributeType::INT => AttributeValue::Int(attr.i),
        AttributeType::STRING => AttributeValue::String(AttrBytes(attr.s.clone())),
        AttributeType::TENSOR => AttributeValue::Tensor(tensor_value(&attr.t)?),
        AttributeType::FLOATS => {
            AttributeValue::Floats(attr.floats.iter().map(|&f| f as f64).collect())
        }
        AttributeType::INTS => AttributeValue::Ints(attr.ints.clone()),
        AttributeType::STRINGS => AttributeValue::Strings(
            attr.strings.iter().map(|s| AttrBytes(s.clone())).collect(),
        ),
        AttributeType::TENSORS => AttributeValue::Tensors(
            attr.tensors
                .iter()
                .map(tensor_value)
                .collect::<Result<Vec<_>>>()?,
        ),
        AttributeType::UNDEFINED
        | AttributeType::GRAPH
        | AttributeType::GRAPHS
        | AttributeType::SPARSE_TENSOR
        | AttributeType::SPARSE_TENSORS
        | AttributeType::TYPE_PROTO
        | AttributeType::TYPE_PROTOS => {
            return Err(unsupported(node, attr, format!("{kind:?}")));
        }
    };

    Ok(value)
}

fn unsupported(node: &NodeProto, attr: &AttributeProto, type_tag: String) -> ConvertError {
    ConvertError::UnsupportedAttributeType {
        node: node.name.clone(),
        attribute: attr.name.clone(),
        type_tag,
    }
}

fn tensor_value(tensor: &TensorProto) -> Result<TensorValue> {
    let invalid = |source| ConvertError::InvalidTensor {
        name: tensor.name.clone(),
        source,
    };

    let data_type = tensor_element_type(tensor).map_err(invalid)?;
    let shape = tensor_shape(tensor).map_err(invalid)?;

    let (raw_data, string_data) = match data_type {
        ElementType::String => (
            Vec::new(),
            tensor.string_data.iter().map(|s| AttrBytes(s.clone())).collect(),
        ),
        elem => (tensor_bytes(tensor, elem).map_err(invalid)?, Vec::new()),
    };

    Ok(TensorValue {
        name: (!tensor.name.is_empty()).then(|| tensor.name.clone()),
        data_type,
        shape,
        raw_data,
        string_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use onnx_graph::builder::{NodeBuilder, attribute, tensor_f32, tensor_i64};
    use rstest::rstest;

    fn conv_node() -> NodeProto {
        NodeBuilder::new("Conv", "conv1")
            .inputs(&["x", "W"])
            .outputs(&["y"])
            .attr_ints("kernel_shape", &[5, 5])
            .attr_ints("pads", &[2, 2, 2, 2])
            .attr_int("group", 1)
            .attr_string("auto_pad", "NOTSET")
            .build()
    }

    #[test]
    fn every_attribute_appears_once() {
        let attributes = extract(&conv_node()).unwrap();

        assert_eq!(attributes.len(), 4);
        assert_eq!(attributes["kernel_shape"], AttributeValue::Ints(vec![5, 5]));
        assert_eq!(attributes["group"], AttributeValue::Int(1));
        assert_eq!(attributes["auto_pad"], AttributeValue::String("NOTSET".into()));
    }

    #[test]
    fn floats_are_widened() {
        let node = NodeBuilder::new("LeakyRelu", "lrelu")
            .attr_float("alpha", 0.5)
            .attr_floats("scales", &[1.0, 2.5])
            .build();

        let attributes = extract(&node).unwrap();
        assert_eq!(attributes["alpha"], AttributeValue::Float(0.5));
        assert_eq!(attributes["scales"], AttributeValue::Floats(vec![1.0, 2.5]));
    }

    #[test]
    fn tensor_attributes_carry_bytes() {
        let node = NodeBuilder::new("Constant", "const")
            .attr_tensor("value", tensor_f32("c", &[2], &[1.0, 2.0]))
            .attr_tensors("pair", vec![tensor_i64("", &[], &[7])])
            .attr_strings("labels", &["cat", "dog"])
            .build();

        let attributes = extract(&node).unwrap();
        let AttributeValue::Tensor(tensor) = &attributes["value"] else {
            panic!("expected a tensor, got {:?}", attributes["value"]);
        };
        assert_eq!(tensor.name.as_deref(), Some("c"));
        assert_eq!(tensor.data_type, ElementType::Float32);
        assert_eq!(tensor.shape, vec![2]);
        assert_eq!(
            tensor.raw_data,
            [1.0f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<_>>()
        );

        let AttributeValue::Tensors(tensors) = &attributes["pair"] else {
            panic!("expected tensors");
        };
        assert_eq!(tensors[0].name, None);
        assert_eq!(tensors[0].raw_data, 7i64.to_le_bytes().to_vec());

        assert_eq!(
            attributes["labels"],
            AttributeValue::Strings(vec!["cat".into(), "dog".into()])
        );
    }

    #[test]
    fn string_tensor_keeps_string_data() {
        let mut tensor = TensorProto::new();
        tensor.dims = vec![1];
        tensor.data_type = ElementType::String.to_proto();
        tensor.string_data = vec![b"hello".to_vec()];
        let node = NodeBuilder::new("Constant", "const")
            .attr_tensor("value", tensor)
            .build();

        let AttributeValue::Tensor(value) = &extract(&node).unwrap()["value"] else {
            panic!("expected a tensor");
        };
        assert!(value.raw_data.is_empty());
        assert_eq!(value.string_data, vec![AttrBytes::from("hello")]);
    }

    #[rstest]
    #[case::graph(AttributeType::GRAPH)]
    #[case::graphs(AttributeType::GRAPHS)]
    #[case::sparse_tensor(AttributeType::SPARSE_TENSOR)]
    #[case::type_proto(AttributeType::TYPE_PROTO)]
    #[case::undefined(AttributeType::UNDEFINED)]
    fn unsupported_types_are_fatal(#[case] kind: AttributeType) {
        let node = NodeBuilder::new("If", "branch")
            .attr(attribute("then_branch", kind))
            .build();

        match extract(&node) {
            Err(ConvertError::UnsupportedAttributeType {
                node,
                attribute,
                type_tag,
            }) => {
                assert_eq!(node, "branch");
                assert_eq!(attribute, "then_branch");
                assert_eq!(type_tag, format!("{kind:?}"));
            }
            other => panic!("expected an unsupported attribute error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_tag_is_fatal() {
        let mut attr = AttributeProto::new();
        attr.name = "future".into();
        attr.type_ = protobuf::EnumOrUnknown::from_i32(99);
        let node = NodeBuilder::new("Custom", "custom").attr(attr).build();

        assert!(matches!(
            extract(&node),
            Err(ConvertError::UnsupportedAttributeType { type_tag, .. }) if type_tag == "99"
        ));
    }

    #[test]
    fn repeated_name_keeps_last_value() {
        let node = NodeBuilder::new("Softmax", "softmax")
            .attr_int("axis", 1)
            .attr_int("axis", -1)
            .build();

        let attributes = extract(&node).unwrap();
        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes["axis"], AttributeValue::Int(-1));
    }

    #[test]
    fn malformed_tensor_attribute_is_fatal() {
        let mut tensor = tensor_f32("bad", &[4], &[1.0]);
        tensor.raw_data.truncate(2);
        let node = NodeBuilder::new("Constant", "const")
            .attr_tensor("value", tensor)
            .build();

        assert!(matches!(
            extract(&node),
            Err(ConvertError::InvalidTensor { name, .. }) if name == "bad"
        ));
    }
}
