//! Builders for assembling ONNX protos in code, for tests where writing `.onnx` fixtures by
//! hand is impractical. Only compiled for this crate's tests and with the `test-utils` feature.

use protobuf::MessageField;

use crate::element::ElementType;
use crate::protos::{
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto,
    TypeProto, ValueInfoProto, attribute_proto::AttributeType, type_proto,
};
use crate::shape_inference::{Dim, TensorInfo};

/// Opset used by [`GraphBuilder`] unless overridden.
pub const DEFAULT_OPSET: i64 = 16;

/// Builder for a single [`NodeProto`].
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    node: NodeProto,
}

impl NodeBuilder {
    /// A node of kind `op_type` in the default domain.
    pub fn new(op_type: &str, name: &str) -> Self {
        let mut node = NodeProto::new();
        node.op_type = op_type.to_string();
        node.name = name.to_string();
        Self { node }
    }

    /// Input names, in order. An empty name marks an omitted optional input.
    pub fn inputs(mut self, names: &[&str]) -> Self {
        self.node.input = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Output names, in order.
    pub fn outputs(mut self, names: &[&str]) -> Self {
        self.node.output = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Operator set domain, e.g. `com.microsoft`.
    pub fn domain(mut self, domain: &str) -> Self {
        self.node.domain = domain.to_string();
        self
    }

    /// Add an attribute that was built elsewhere, e.g. with an unusual type tag.
    pub fn attr(mut self, attribute: AttributeProto) -> Self {
        self.node.attribute.push(attribute);
        self
    }

    /// Add an `INT` attribute.
    pub fn attr_int(self, name: &str, value: i64) -> Self {
        let mut attr = attribute(name, AttributeType::INT);
        attr.i = value;
        self.attr(attr)
    }

    /// Add a `FLOAT` attribute.
    pub fn attr_float(self, name: &str, value: f32) -> Self {
        let mut attr = attribute(name, AttributeType::FLOAT);
        attr.f = value;
        self.attr(attr)
    }

    /// Add a `STRING` attribute.
    pub fn attr_string(self, name: &str, value: &str) -> Self {
        let mut attr = attribute(name, AttributeType::STRING);
        attr.s = value.as_bytes().to_vec();
        self.attr(attr)
    }

    /// Add a `TENSOR` attribute.
    pub fn attr_tensor(self, name: &str, value: TensorProto) -> Self {
        let mut attr = attribute(name, AttributeType::TENSOR);
        attr.t = MessageField::some(value);
        self.attr(attr)
    }

    /// Add an `INTS` attribute.
    pub fn attr_ints(self, name: &str, values: &[i64]) -> Self {
        let mut attr = attribute(name, AttributeType::INTS);
        attr.ints = values.to_vec();
        self.attr(attr)
    }

    /// Add a `FLOATS` attribute.
    pub fn attr_floats(self, name: &str, values: &[f32]) -> Self {
        let mut attr = attribute(name, AttributeType::FLOATS);
        attr.floats = values.to_vec();
        self.attr(attr)
    }

    /// Add a `STRINGS` attribute.
    pub fn attr_strings(self, name: &str, values: &[&str]) -> Self {
        let mut attr = attribute(name, AttributeType::STRINGS);
        attr.strings = values.iter().map(|v| v.as_bytes().to_vec()).collect();
        self.attr(attr)
    }

    /// Add a `TENSORS` attribute.
    pub fn attr_tensors(self, name: &str, values: Vec<TensorProto>) -> Self {
        let mut attr = attribute(name, AttributeType::TENSORS);
        attr.tensors = values;
        self.attr(attr)
    }

    /// Finish the node.
    pub fn build(self) -> NodeProto {
        self.node
    }
}

/// An attribute with only its name and type tag set.
pub fn attribute(name: &str, kind: AttributeType) -> AttributeProto {
    let mut attr = AttributeProto::new();
    attr.name = name.to_string();
    attr.type_ = kind.into();
    attr
}

/// A float32 tensor stored in `raw_data`.
pub fn tensor_f32(name: &str, dims: &[i64], values: &[f32]) -> TensorProto {
    let mut tensor = TensorProto::new();
    tensor.name = name.to_string();
    tensor.dims = dims.to_vec();
    tensor.data_type = ElementType::Float32.to_proto();
    tensor.raw_data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    tensor
}

/// An int64 tensor stored in `int64_data`.
pub fn tensor_i64(name: &str, dims: &[i64], values: &[i64]) -> TensorProto {
    let mut tensor = TensorProto::new();
    tensor.name = name.to_string();
    tensor.dims = dims.to_vec();
    tensor.data_type = ElementType::Int64.to_proto();
    tensor.int64_data = values.to_vec();
    tensor
}

/// A tensor of any element type with its payload given as little-endian bytes.
pub fn tensor_raw(name: &str, data_type: i32, dims: &[i64], raw_data: Vec<u8>) -> TensorProto {
    let mut tensor = TensorProto::new();
    tensor.name = name.to_string();
    tensor.dims = dims.to_vec();
    tensor.data_type = data_type;
    tensor.raw_data = raw_data;
    tensor
}

/// A value of tensor type with fixed dimensions.
pub fn value_info(name: &str, elem: ElementType, dims: &[i64]) -> ValueInfoProto {
    TensorInfo {
        elem_type: elem.to_proto(),
        shape: Some(dims.iter().map(|&d| Dim::Value(d)).collect()),
    }
    .to_value_info(name)
}

/// Builder for a [`ModelProto`] holding one graph.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    model: ModelProto,
}

impl GraphBuilder {
    /// A model with one empty graph named `name`, IR version 8 and the default opset.
    pub fn new(name: &str) -> Self {
        let mut model = ModelProto::new();
        model.ir_version = 8;
        model.producer_name = "onnx-graph".to_string();
        model.graph.mut_or_insert_default().name = name.to_string();
        Self { model }.opset("", DEFAULT_OPSET)
    }

    /// Set the version of an operator set, adding it if needed.
    pub fn opset(mut self, domain: &str, version: i64) -> Self {
        let imports = &mut self.model.opset_import;
        match imports.iter_mut().find(|o| o.domain == domain) {
            Some(import) => import.version = version,
            None => {
                let mut import = OperatorSetIdProto::new();
                import.domain = domain.to_string();
                import.version = version;
                imports.push(import);
            }
        }
        self
    }

    /// Remove all operator set imports.
    pub fn without_opsets(mut self) -> Self {
        self.model.opset_import.clear();
        self
    }

    fn graph(&mut self) -> &mut GraphProto {
        self.model.graph.mut_or_insert_default()
    }

    /// Declare a tensor input with fixed dimensions.
    pub fn input(mut self, name: &str, elem: ElementType, dims: &[i64]) -> Self {
        self.graph().input.push(value_info(name, elem, dims));
        self
    }

    /// Declare a tensor input with symbolic or unknown dimensions.
    pub fn input_dims(mut self, name: &str, elem: ElementType, dims: Vec<Dim>) -> Self {
        let info = TensorInfo {
            elem_type: elem.to_proto(),
            shape: Some(dims),
        };
        self.graph().input.push(info.to_value_info(name));
        self
    }

    /// A tensor input whose shape is not recorded at all.
    pub fn input_unknown_shape(mut self, name: &str, elem: ElementType) -> Self {
        let info = TensorInfo {
            elem_type: elem.to_proto(),
            shape: None,
        };
        self.graph().input.push(info.to_value_info(name));
        self
    }

    /// An input of sequence type, which is not a tensor.
    pub fn input_sequence(mut self, name: &str, elem: ElementType) -> Self {
        let mut inner = TypeProto::new();
        let mut tensor = type_proto::Tensor::new();
        tensor.elem_type = elem.to_proto();
        inner.set_tensor_type(tensor);

        let mut sequence = type_proto::Sequence::new();
        sequence.elem_type = MessageField::some(inner);
        let mut ty = TypeProto::new();
        ty.set_sequence_type(sequence);

        let mut value = ValueInfoProto::new();
        value.name = name.to_string();
        value.type_ = MessageField::some(ty);
        self.graph().input.push(value);
        self
    }

    /// Declare a tensor output with fixed dimensions.
    pub fn output(mut self, name: &str, elem: ElementType, dims: &[i64]) -> Self {
        self.graph().output.push(value_info(name, elem, dims));
        self
    }

    /// Declare the type of an intermediate value.
    pub fn value_info(mut self, value: ValueInfoProto) -> Self {
        self.graph().value_info.push(value);
        self
    }

    /// Add a constant tensor.
    pub fn initializer(mut self, tensor: TensorProto) -> Self {
        self.graph().initializer.push(tensor);
        self
    }

    /// Add a float32 constant tensor.
    pub fn initializer_f32(self, name: &str, dims: &[i64], values: &[f32]) -> Self {
        self.initializer(tensor_f32(name, dims, values))
    }

    /// Add an int64 constant tensor.
    pub fn initializer_i64(self, name: &str, dims: &[i64], values: &[i64]) -> Self {
        self.initializer(tensor_i64(name, dims, values))
    }

    /// Append a node to the graph.
    pub fn node(mut self, node: NodeBuilder) -> Self {
        self.graph().node.push(node.build());
        self
    }

    /// Finish the model.
    pub fn build(self) -> ModelProto {
        self.model
    }
}
