//! Shape and element type inference for intermediate values.
//!
//! The pass walks the nodes in order, propagating the element type and dimensions of every
//! value it can resolve, and records the results in `graph.value_info`. Values that are
//! already declared (graph inputs/outputs, initializers, existing `value_info`) are never
//! overwritten. Anything the pass cannot determine is left unknown: a dimension it cannot
//! compute becomes a dimension without value, a shape it cannot compute is left out, and an
//! operator it does not know gets no annotation at all.

use std::collections::{HashMap, HashSet};

use protobuf::MessageField;

use crate::element::ElementType;
use crate::protos::{
    AttributeProto, GraphProto, ModelProto, NodeProto, TensorProto, TensorShapeProto, TypeProto,
    ValueInfoProto, attribute_proto::AttributeType, tensor_shape_proto::Dimension,
    tensor_shape_proto::dimension::Value, type_proto,
};
use crate::tensor::tensor_bytes;

/// One dimension of an inferred shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
    /// A fixed size.
    Value(i64),
    /// A named symbolic size, e.g. `batch`.
    Param(String),
    /// A size nothing is known about.
    Unknown,
}

/// Element type and (optionally) dimensions of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    /// ONNX `TensorProto.DataType` value, `0` when undefined.
    pub elem_type: i32,
    /// `None` when even the rank is unknown.
    pub shape: Option<Vec<Dim>>,
}

impl TensorInfo {
    fn new(elem_type: i32, shape: Option<Vec<Dim>>) -> Self {
        Self { elem_type, shape }
    }

    fn with_elem(&self, elem: ElementType) -> Self {
        Self::new(elem.to_proto(), self.shape.clone())
    }

    fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(Vec::len)
    }

    /// Read the tensor type of a declared value, if it has one.
    pub fn from_value_info(value: &ValueInfoProto) -> Option<Self> {
        let tensor_type = value.type_.as_ref()?;
        if !tensor_type.has_tensor_type() {
            return None;
        }
        let tensor = tensor_type.tensor_type();
        let shape = tensor.shape.as_ref().map(|shape| {
            shape
                .dim
                .iter()
                .map(|dim| match &dim.value {
                    Some(Value::DimValue(v)) if *v >= 0 => Dim::Value(*v),
                    Some(Value::DimParam(p)) if !p.is_empty() => Dim::Param(p.clone()),
                    _ => Dim::Unknown,
                })
                .collect()
        });
        Some(Self::new(tensor.elem_type, shape))
    }

    fn from_tensor(tensor: &TensorProto) -> Self {
        let shape = tensor
            .dims
            .iter()
            .map(|&d| if d >= 0 { Dim::Value(d) } else { Dim::Unknown })
            .collect();
        Self::new(tensor.data_type, Some(shape))
    }

    /// Build the `ValueInfoProto` describing this value under `name`.
    pub fn to_value_info(&self, name: &str) -> ValueInfoProto {
        let mut tensor = type_proto::Tensor::new();
        tensor.elem_type = self.elem_type;
        if let Some(shape) = &self.shape {
            let mut proto = TensorShapeProto::new();
            proto.dim = shape
                .iter()
                .map(|dim| {
                    let mut d = Dimension::new();
                    d.value = match dim {
                        Dim::Value(v) => Some(Value::DimValue(*v)),
                        Dim::Param(p) => Some(Value::DimParam(p.clone())),
                        Dim::Unknown => None,
                    };
                    d
                })
                .collect();
            tensor.shape = MessageField::some(proto);
        }

        let mut ty = TypeProto::new();
        ty.set_tensor_type(tensor);

        let mut value = ValueInfoProto::new();
        value.name = name.to_string();
        value.type_ = MessageField::some(ty);
        value
    }
}

/// Infer element types and shapes of the intermediate values of `model`.
///
/// Returns the number of `value_info` entries appended to the graph.
pub fn infer_shapes(model: &mut ModelProto) -> usize {
    let graph = model.graph.mut_or_insert_default();
    let inferred = infer_graph(graph);
    let count = inferred.len();
    graph.value_info.extend(inferred);

    log::info!("Shape inference annotated {count} values");
    count
}

fn infer_graph(graph: &GraphProto) -> Vec<ValueInfoProto> {
    let mut env = InferenceEnv::new(graph);
    let mut inferred = Vec::new();

    for node in graph.node.iter() {
        let inputs: Vec<Option<TensorInfo>> = node
            .input
            .iter()
            .map(|name| env.get(name).cloned())
            .collect();

        let outputs = infer_node(node, &inputs, &env);
        if outputs.iter().all(Option::is_none) {
            log::debug!(
                "No shape inferred for node '{}' ({})",
                node.name,
                node.op_type
            );
        }

        if node.op_type == "Constant" {
            env.record_constant(node);
        }

        for (name, info) in node.output.iter().zip(outputs) {
            let Some(info) = info else { continue };
            if name.is_empty() || env.declared.contains(name) {
                continue;
            }
            log::debug!("Inferred {name}: {info:?}");
            inferred.push(info.to_value_info(name));
            env.declared.insert(name.clone());
            env.values.insert(name.clone(), info);
        }
    }

    inferred
}

struct InferenceEnv {
    values: HashMap<String, TensorInfo>,
    constants: HashMap<String, Vec<i64>>,
    declared: HashSet<String>,
}

impl InferenceEnv {
    fn new(graph: &GraphProto) -> Self {
        let mut env = Self {
            values: HashMap::new(),
            constants: HashMap::new(),
            declared: HashSet::new(),
        };

        for tensor in graph.initializer.iter() {
            env.declared.insert(tensor.name.clone());
            env.values
                .insert(tensor.name.clone(), TensorInfo::from_tensor(tensor));
            if let Some(values) = int_values(tensor) {
                env.constants.insert(tensor.name.clone(), values);
            }
        }

        let declared = graph
            .input
            .iter()
            .chain(graph.output.iter())
            .chain(graph.value_info.iter());
        for value in declared {
            env.declared.insert(value.name.clone());
            if let Some(info) = TensorInfo::from_value_info(value) {
                env.values.insert(value.name.clone(), info);
            }
        }

        env
    }

    fn get(&self, name: &str) -> Option<&TensorInfo> {
        if name.is_empty() {
            return None;
        }
        self.values.get(name)
    }

    fn constant(&self, name: Option<&String>) -> Option<&Vec<i64>> {
        self.constants.get(name?.as_str())
    }

    fn record_constant(&mut self, node: &NodeProto) {
        let Some(output) = node.output.first() else {
            return;
        };
        let values = node.attribute.iter().find_map(|attr| match attr.name.as_str() {
            "value" => attr.t.as_ref().and_then(int_values),
            "value_int" => Some(vec![attr.i]),
            "value_ints" => Some(attr.ints.clone()),
            _ => None,
        });
        if let Some(values) = values {
            self.constants.insert(output.clone(), values);
        }
    }
}

/// Integer contents of a tensor, used for shape and axes operands.
fn int_values(tensor: &TensorProto) -> Option<Vec<i64>> {
    let elem = ElementType::from_proto(tensor.data_type)?;
    if !matches!(elem, ElementType::Int64 | ElementType::Int32) {
        return None;
    }
    let bytes = tensor_bytes(tensor, elem).ok()?;
    match elem {
        ElementType::Int64 => Some(
            bytes
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
                .collect(),
        ),
        ElementType::Int32 => Some(
            bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes(c.try_into().unwrap_or([0; 4])) as i64)
                .collect(),
        ),
        _ => None,
    }
}

const SAME_AS_INPUT: &[&str] = &[
    "Abs",
    "Acos",
    "Acosh",
    "Asin",
    "Asinh",
    "Atan",
    "Atanh",
    "BatchNormalization",
    "Ceil",
    "Celu",
    "Clip",
    "Cos",
    "Cosh",
    "CumSum",
    "Elu",
    "Erf",
    "Exp",
    "Floor",
    "Gelu",
    "HardSigmoid",
    "HardSwish",
    "Hardmax",
    "Identity",
    "InstanceNormalization",
    "LRN",
    "LayerNormalization",
    "LeakyRelu",
    "Log",
    "LogSoftmax",
    "LpNormalization",
    "MeanVarianceNormalization",
    "Mish",
    "Neg",
    "Reciprocal",
    "Relu",
    "Round",
    "Selu",
    "Shrink",
    "Sigmoid",
    "Sign",
    "Sin",
    "Sinh",
    "Softmax",
    "Softplus",
    "Softsign",
    "Sqrt",
    "Tan",
    "Tanh",
    "ThresholdedRelu",
];

const BROADCAST_ARITHMETIC: &[&str] = &[
    "Add", "BitShift", "BitwiseAnd", "BitwiseOr", "BitwiseXor", "Div", "Max", "Mean", "Min",
    "Mod", "Mul", "PRelu", "Pow", "Sub", "Sum",
];

const BROADCAST_COMPARISON: &[&str] = &[
    "And",
    "Equal",
    "Greater",
    "GreaterOrEqual",
    "Less",
    "LessOrEqual",
    "Or",
    "Xor",
];

const REDUCTIONS: &[&str] = &[
    "ReduceL1",
    "ReduceL2",
    "ReduceLogSum",
    "ReduceLogSumExp",
    "ReduceMax",
    "ReduceMean",
    "ReduceMin",
    "ReduceProd",
    "ReduceSum",
    "ReduceSumSquare",
];

/// Infer the outputs of one node. The result has one entry per declared output.
fn infer_node(
    node: &NodeProto,
    inputs: &[Option<TensorInfo>],
    env: &InferenceEnv,
) -> Vec<Option<TensorInfo>> {
    let first = inputs.first().and_then(Option::as_ref);
    let op = node.op_type.as_str();

    let outputs = match op {
        _ if !node.domain.is_empty() && node.domain != "ai.onnx" => vec![],
        op if SAME_AS_INPUT.contains(&op) => vec![first.cloned()],
        op if BROADCAST_ARITHMETIC.contains(&op) => vec![broadcast_inputs(inputs, first)],
        op if BROADCAST_COMPARISON.contains(&op) => vec![
            broadcast_inputs(inputs, first).map(|info| info.with_elem(ElementType::Bool)),
        ],
        op if REDUCTIONS.contains(&op) => vec![reduce_output(node, first, env)],
        "Not" | "IsNaN" | "IsInf" => vec![first.map(|info| info.with_elem(ElementType::Bool))],
        "Where" => vec![where_output(inputs)],
        "Dropout" => vec![
            first.cloned(),
            first.map(|info| info.with_elem(ElementType::Bool)),
        ],
        "Conv" => vec![conv_output(node, first, inputs.get(1).and_then(Option::as_ref))],
        "ConvTranspose" => vec![conv_transpose_output(
            node,
            first,
            inputs.get(1).and_then(Option::as_ref),
        )],
        "MaxPool" => {
            let pooled = pool_output(node, first);
            let indices = pooled.as_ref().map(|p| p.with_elem(ElementType::Int64));
            vec![pooled, indices]
        }
        "AveragePool" | "LpPool" => vec![pool_output(node, first)],
        "GlobalAveragePool" | "GlobalMaxPool" | "GlobalLpPool" => vec![global_pool_output(first)],
        "Flatten" => vec![flatten_output(node, first)],
        "Gemm" => vec![gemm_output(node, first, inputs.get(1).and_then(Option::as_ref))],
        "MatMul" => vec![matmul_output(first, inputs.get(1).and_then(Option::as_ref))],
        "Reshape" => vec![reshape_output(node, first, inputs.get(1), env)],
        "Transpose" => vec![transpose_output(node, first)],
        "Concat" => vec![concat_output(node, inputs)],
        "Cast" => vec![cast_output(node, first)],
        "CastLike" => vec![first.zip(inputs.get(1).and_then(Option::as_ref)).map(
            |(input, target)| TensorInfo::new(target.elem_type, input.shape.clone()),
        )],
        "Shape" => vec![shape_output(node, first)],
        "Squeeze" => vec![squeeze_output(node, first, env)],
        "Unsqueeze" => vec![unsqueeze_output(node, first, env)],
        "Gather" => vec![gather_output(node, first, inputs.get(1).and_then(Option::as_ref))],
        "ArgMax" | "ArgMin" => vec![arg_reduce_output(node, first)],
        "Constant" => vec![constant_output(node)],
        _ => vec![],
    };

    let mut outputs = outputs;
    outputs.resize(node.output.len(), None);
    outputs
}

fn attr<'a>(node: &'a NodeProto, name: &str) -> Option<&'a AttributeProto> {
    node.attribute.iter().find(|a| a.name == name)
}

fn attr_int(node: &NodeProto, name: &str) -> Option<i64> {
    attr(node, name).map(|a| a.i)
}

fn attr_ints(node: &NodeProto, name: &str) -> Option<Vec<i64>> {
    attr(node, name).map(|a| a.ints.clone())
}

fn attr_string(node: &NodeProto, name: &str) -> Option<String> {
    attr(node, name).map(|a| String::from_utf8_lossy(&a.s).into_owned())
}

/// Resolve a possibly negative axis against `rank`.
fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let rank = rank as i64;
    let axis = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&axis).then_some(axis as usize)
}

fn product(dims: &[Dim]) -> Dim {
    dims.iter().try_fold(1i64, |acc, dim| match dim {
        Dim::Value(v) => acc.checked_mul(*v),
        _ => None,
    })
    .map_or(Dim::Unknown, Dim::Value)
}

fn broadcast_dim(a: &Dim, b: &Dim) -> Dim {
    match (a, b) {
        (_, Dim::Value(1)) => a.clone(),
        (Dim::Value(1), _) => b.clone(),
        _ if a == b => a.clone(),
        (Dim::Value(_), Dim::Value(_)) => Dim::Unknown,
        (Dim::Value(_), _) => a.clone(),
        (_, Dim::Value(_)) => b.clone(),
        _ => Dim::Unknown,
    }
}

/// Multidirectional (numpy style) broadcasting of several shapes.
fn broadcast(shapes: &[&Vec<Dim>]) -> Vec<Dim> {
    let rank = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    (0..rank)
        .map(|i| {
            shapes.iter().fold(Dim::Value(1), |acc, shape| {
                let offset = rank - shape.len();
                if i < offset {
                    acc
                } else {
                    broadcast_dim(&acc, &shape[i - offset])
                }
            })
        })
        .collect()
}

fn broadcast_inputs(
    inputs: &[Option<TensorInfo>],
    type_source: Option<&TensorInfo>,
) -> Option<TensorInfo> {
    let elem_type = type_source?.elem_type;
    let shapes: Option<Vec<&Vec<Dim>>> = inputs
        .iter()
        .map(|input| input.as_ref().and_then(|i| i.shape.as_ref()))
        .collect();
    Some(TensorInfo::new(elem_type, shapes.map(|s| broadcast(&s))))
}

fn where_output(inputs: &[Option<TensorInfo>]) -> Option<TensorInfo> {
    broadcast_inputs(inputs, inputs.get(1)?.as_ref())
}

/// Output size of one spatial axis of a convolution or pooling window.
#[allow(clippy::too_many_arguments)]
fn window_output_dim(
    input: &Dim,
    kernel: i64,
    stride: i64,
    dilation: i64,
    pad_begin: i64,
    pad_end: i64,
    auto_pad: &str,
    ceil_mode: bool,
) -> Dim {
    let Dim::Value(input) = *input else {
        return Dim::Unknown;
    };
    if stride <= 0 {
        return Dim::Unknown;
    }
    let effective = (kernel - 1) * dilation + 1;

    let out = match auto_pad {
        "SAME_UPPER" | "SAME_LOWER" => (input + stride - 1) / stride,
        "VALID" => {
            let span = input - effective;
            if span < 0 {
                return Dim::Unknown;
            }
            span / stride + 1
        }
        _ => {
            let span = input + pad_begin + pad_end - effective;
            if span < 0 {
                return Dim::Unknown;
            }
            if ceil_mode {
                (span + stride - 1) / stride + 1
            } else {
                span / stride + 1
            }
        }
    };

    Dim::Value(out)
}

struct WindowAttrs {
    kernel: Vec<i64>,
    strides: Vec<i64>,
    dilations: Vec<i64>,
    pads: Vec<i64>,
    auto_pad: String,
    ceil_mode: bool,
}

impl WindowAttrs {
    fn read(node: &NodeProto, kernel: Vec<i64>) -> Self {
        let spatial = kernel.len();
        Self {
            strides: attr_ints(node, "strides").unwrap_or_else(|| vec![1; spatial]),
            dilations: attr_ints(node, "dilations").unwrap_or_else(|| vec![1; spatial]),
            pads: attr_ints(node, "pads").unwrap_or_else(|| vec![0; spatial * 2]),
            auto_pad: attr_string(node, "auto_pad").unwrap_or_else(|| "NOTSET".to_string()),
            ceil_mode: attr_int(node, "ceil_mode").unwrap_or(0) != 0,
            kernel,
        }
    }

    fn fits(&self, spatial: usize) -> bool {
        self.kernel.len() == spatial
            && self.strides.len() == spatial
            && self.dilations.len() == spatial
            && self.pads.len() == spatial * 2
    }

    fn spatial_dims(&self, input: &[Dim]) -> Option<Vec<Dim>> {
        let spatial = self.kernel.len();
        if input.len() != spatial || !self.fits(spatial) {
            return None;
        }
        Some(
            (0..spatial)
                .map(|i| {
                    window_output_dim(
                        &input[i],
                        self.kernel[i],
                        self.strides[i],
                        self.dilations[i],
                        self.pads[i],
                        self.pads[i + spatial],
                        &self.auto_pad,
                        self.ceil_mode,
                    )
                })
                .collect(),
        )
    }
}

fn conv_output(
    node: &NodeProto,
    input: Option<&TensorInfo>,
    weight: Option<&TensorInfo>,
) -> Option<TensorInfo> {
    let input = input?;
    let weight_shape = weight.and_then(|w| w.shape.as_ref());

    let shape = input.shape.as_ref().and_then(|x| {
        if x.len() < 3 {
            return None;
        }
        let kernel = attr_ints(node, "kernel_shape").or_else(|| {
            weight_shape?
                .iter()
                .skip(2)
                .map(|d| match d {
                    Dim::Value(v) => Some(*v),
                    _ => None,
                })
                .collect()
        })?;
        let channels = weight_shape
            .and_then(|w| w.first().cloned())
            .unwrap_or(Dim::Unknown);

        let mut shape = vec![x[0].clone(), channels];
        shape.extend(WindowAttrs::read(node, kernel).spatial_dims(&x[2..])?);
        Some(shape)
    });

    Some(TensorInfo::new(input.elem_type, shape))
}

fn conv_transpose_output(
    node: &NodeProto,
    input: Option<&TensorInfo>,
    weight: Option<&TensorInfo>,
) -> Option<TensorInfo> {
    let input = input?;
    let weight_shape = weight.and_then(|w| w.shape.as_ref());
    let group = attr_int(node, "group").unwrap_or(1);

    let shape = input.shape.as_ref().and_then(|x| {
        if x.len() < 3 {
            return None;
        }
        let spatial = x.len() - 2;
        let channels = match weight_shape.and_then(|w| w.get(1)) {
            Some(Dim::Value(c)) => Dim::Value(c * group),
            _ => Dim::Unknown,
        };
        let mut shape = vec![x[0].clone(), channels];

        if let Some(output_shape) = attr_ints(node, "output_shape") {
            shape.extend(output_shape.into_iter().map(Dim::Value));
            return Some(shape);
        }

        let kernel = attr_ints(node, "kernel_shape").or_else(|| {
            weight_shape?
                .iter()
                .skip(2)
                .map(|d| match d {
                    Dim::Value(v) => Some(*v),
                    _ => None,
                })
                .collect()
        })?;
        let window = WindowAttrs::read(node, kernel);
        let output_padding =
            attr_ints(node, "output_padding").unwrap_or_else(|| vec![0; spatial]);
        if !window.fits(spatial) || output_padding.len() != spatial {
            return None;
        }

        for i in 0..spatial {
            let dim = match &x[i + 2] {
                Dim::Value(v) => {
                    let effective = (window.kernel[i] - 1) * window.dilations[i] + 1;
                    match window.auto_pad.as_str() {
                        "SAME_UPPER" | "SAME_LOWER" => Dim::Value(v * window.strides[i]),
                        _ => Dim::Value(
                            window.strides[i] * (v - 1) + output_padding[i] + effective
                                - window.pads[i]
                                - window.pads[i + spatial],
                        ),
                    }
                }
                _ => Dim::Unknown,
            };
            shape.push(dim);
        }
        Some(shape)
    });

    Some(TensorInfo::new(input.elem_type, shape))
}

fn pool_output(node: &NodeProto, input: Option<&TensorInfo>) -> Option<TensorInfo> {
    let input = input?;
    let shape = input.shape.as_ref().and_then(|x| {
        if x.len() < 3 {
            return None;
        }
        let kernel = attr_ints(node, "kernel_shape")?;
        let mut shape = x[..2].to_vec();
        shape.extend(WindowAttrs::read(node, kernel).spatial_dims(&x[2..])?);
        Some(shape)
    });
    Some(TensorInfo::new(input.elem_type, shape))
}

fn global_pool_output(input: Option<&TensorInfo>) -> Option<TensorInfo> {
    let input = input?;
    let shape = input.shape.as_ref().and_then(|x| {
        if x.len() < 2 {
            return None;
        }
        let mut shape = x[..2].to_vec();
        shape.extend(std::iter::repeat_n(Dim::Value(1), x.len() - 2));
        Some(shape)
    });
    Some(TensorInfo::new(input.elem_type, shape))
}

fn flatten_output(node: &NodeProto, input: Option<&TensorInfo>) -> Option<TensorInfo> {
    let input = input?;
    let shape = input.shape.as_ref().and_then(|x| {
        let axis = attr_int(node, "axis").unwrap_or(1);
        let rank = x.len() as i64;
        let axis = if axis < 0 { axis + rank } else { axis };
        if !(0..=rank).contains(&axis) {
            return None;
        }
        let (outer, inner) = x.split_at(axis as usize);
        Some(vec![product(outer), product(inner)])
    });
    Some(TensorInfo::new(input.elem_type, shape))
}

fn gemm_output(
    node: &NodeProto,
    a: Option<&TensorInfo>,
    b: Option<&TensorInfo>,
) -> Option<TensorInfo> {
    let a = a?;
    let trans_a = attr_int(node, "transA").unwrap_or(0) != 0;
    let trans_b = attr_int(node, "transB").unwrap_or(0) != 0;

    let shape = a
        .shape
        .as_ref()
        .zip(b.and_then(|b| b.shape.as_ref()))
        .and_then(|(a, b)| {
            if a.len() != 2 || b.len() != 2 {
                return None;
            }
            let m = if trans_a { &a[1] } else { &a[0] };
            let n = if trans_b { &b[0] } else { &b[1] };
            Some(vec![m.clone(), n.clone()])
        });
    Some(TensorInfo::new(a.elem_type, shape))
}

fn matmul_output(a: Option<&TensorInfo>, b: Option<&TensorInfo>) -> Option<TensorInfo> {
    let a = a?;
    let shape = a
        .shape
        .as_ref()
        .zip(b.and_then(|b| b.shape.as_ref()))
        .and_then(|(a, b)| {
            if a.is_empty() || b.is_empty() {
                return None;
            }
            // 1-D operands are promoted to matrices, and the added axis is removed again.
            let a_matrix = if a.len() == 1 {
                vec![Dim::Value(1), a[0].clone()]
            } else {
                a.clone()
            };
            let b_matrix = if b.len() == 1 {
                vec![b[0].clone(), Dim::Value(1)]
            } else {
                b.clone()
            };

            let a_batch = a_matrix[..a_matrix.len() - 2].to_vec();
            let b_batch = b_matrix[..b_matrix.len() - 2].to_vec();
            let mut shape = broadcast(&[&a_batch, &b_batch]);
            if a.len() > 1 {
                shape.push(a_matrix[a_matrix.len() - 2].clone());
            }
            if b.len() > 1 {
                shape.push(b_matrix[b_matrix.len() - 1].clone());
            }
            Some(shape)
        });
    Some(TensorInfo::new(a.elem_type, shape))
}

fn reshape_output(
    node: &NodeProto,
    input: Option<&TensorInfo>,
    shape_input: Option<&Option<TensorInfo>>,
    env: &InferenceEnv,
) -> Option<TensorInfo> {
    let input = input?;
    let allow_zero = attr_int(node, "allowzero").unwrap_or(0) != 0;

    let Some(target) = env.constant(node.input.get(1)) else {
        // Only the rank is known when the shape operand is a 1-D tensor of static length.
        let rank = shape_input
            .and_then(Option::as_ref)
            .and_then(|s| s.shape.as_ref())
            .and_then(|s| match s.as_slice() {
                [Dim::Value(r)] => usize::try_from(*r).ok(),
                _ => None,
            });
        let shape = rank.map(|r| vec![Dim::Unknown; r]);
        return Some(TensorInfo::new(input.elem_type, shape));
    };

    let mut shape: Vec<Dim> = target
        .iter()
        .enumerate()
        .map(|(i, &d)| match d {
            0 if !allow_zero => input
                .shape
                .as_ref()
                .and_then(|s| s.get(i).cloned())
                .unwrap_or(Dim::Unknown),
            -1 => Dim::Unknown,
            d if d >= 0 => Dim::Value(d),
            _ => Dim::Unknown,
        })
        .collect();

    if let Some(inferred_axis) = target.iter().position(|&d| d == -1) {
        let total = input.shape.as_deref().map(product);
        let known: Option<i64> = shape
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != inferred_axis)
            .try_fold(1i64, |acc, (_, d)| match d {
                Dim::Value(v) => acc.checked_mul(*v),
                _ => None,
            });
        if let (Some(Dim::Value(total)), Some(known)) = (total, known)
            && known > 0
            && total % known == 0
        {
            shape[inferred_axis] = Dim::Value(total / known);
        }
    }

    Some(TensorInfo::new(input.elem_type, Some(shape)))
}

fn transpose_output(node: &NodeProto, input: Option<&TensorInfo>) -> Option<TensorInfo> {
    let input = input?;
    let shape = input.shape.as_ref().and_then(|x| {
        let perm = attr_ints(node, "perm")
            .unwrap_or_else(|| (0..x.len() as i64).rev().collect::<Vec<_>>());
        if perm.len() != x.len() {
            return None;
        }
        perm.iter()
            .map(|&p| normalize_axis(p, x.len()).map(|p| x[p].clone()))
            .collect()
    });
    Some(TensorInfo::new(input.elem_type, shape))
}

fn concat_output(node: &NodeProto, inputs: &[Option<TensorInfo>]) -> Option<TensorInfo> {
    let first = inputs.first()?.as_ref()?;
    let shapes: Option<Vec<&Vec<Dim>>> = inputs
        .iter()
        .map(|i| i.as_ref().and_then(|i| i.shape.as_ref()))
        .collect();

    let shape = shapes.and_then(|shapes| {
        let rank = shapes.first()?.len();
        if shapes.iter().any(|s| s.len() != rank) {
            return None;
        }
        let axis = normalize_axis(attr_int(node, "axis")?, rank)?;
        let mut shape = shapes[0].clone();
        let axis_dims: Vec<Dim> = shapes.iter().map(|s| s[axis].clone()).collect();
        shape[axis] = match product_sum(&axis_dims) {
            Some(sum) => Dim::Value(sum),
            None => Dim::Unknown,
        };
        Some(shape)
    });

    Some(TensorInfo::new(first.elem_type, shape))
}

fn product_sum(dims: &[Dim]) -> Option<i64> {
    dims.iter().try_fold(0i64, |acc, d| match d {
        Dim::Value(v) => acc.checked_add(*v),
        _ => None,
    })
}

fn cast_output(node: &NodeProto, input: Option<&TensorInfo>) -> Option<TensorInfo> {
    let to = attr_int(node, "to")? as i32;
    let shape = input.and_then(|i| i.shape.clone());
    Some(TensorInfo::new(to, shape))
}

fn shape_output(node: &NodeProto, input: Option<&TensorInfo>) -> Option<TensorInfo> {
    let elem = ElementType::Int64.to_proto();
    let Some(rank) = input.and_then(TensorInfo::rank) else {
        return Some(TensorInfo::new(elem, Some(vec![Dim::Unknown])));
    };

    let clamp = |v: i64| -> i64 {
        let v = if v < 0 { v + rank as i64 } else { v };
        v.clamp(0, rank as i64)
    };
    let start = clamp(attr_int(node, "start").unwrap_or(0));
    let end = clamp(attr_int(node, "end").unwrap_or(rank as i64));
    let len = (end - start).max(0);

    Some(TensorInfo::new(elem, Some(vec![Dim::Value(len)])))
}

/// Axes given either as an attribute (older opsets) or as a constant second input.
fn axes_operand(node: &NodeProto, env: &InferenceEnv) -> Option<Vec<i64>> {
    attr_ints(node, "axes").or_else(|| env.constant(node.input.get(1)).cloned())
}

fn squeeze_output(
    node: &NodeProto,
    input: Option<&TensorInfo>,
    env: &InferenceEnv,
) -> Option<TensorInfo> {
    let input = input?;
    let has_axes_operand = node.input.get(1).is_some_and(|n| !n.is_empty());

    let shape = input.shape.as_ref().and_then(|x| {
        let axes = match axes_operand(node, env) {
            Some(axes) => axes
                .iter()
                .map(|&a| normalize_axis(a, x.len()))
                .collect::<Option<HashSet<usize>>>()?,
            // Axes come from a runtime tensor.
            None if has_axes_operand => return None,
            None => {
                if x.iter().any(|d| !matches!(d, Dim::Value(_))) {
                    return None;
                }
                (0..x.len()).filter(|&i| x[i] == Dim::Value(1)).collect()
            }
        };
        Some(
            x.iter()
                .enumerate()
                .filter(|(i, _)| !axes.contains(i))
                .map(|(_, d)| d.clone())
                .collect(),
        )
    });

    Some(TensorInfo::new(input.elem_type, shape))
}

fn unsqueeze_output(
    node: &NodeProto,
    input: Option<&TensorInfo>,
    env: &InferenceEnv,
) -> Option<TensorInfo> {
    let input = input?;
    let shape = input.shape.as_ref().and_then(|x| {
        let axes = axes_operand(node, env)?;
        let rank = x.len() + axes.len();
        let axes: HashSet<usize> = axes
            .iter()
            .map(|&a| normalize_axis(a, rank))
            .collect::<Option<_>>()?;

        let mut remaining = x.iter();
        (0..rank)
            .map(|i| {
                if axes.contains(&i) {
                    Some(Dim::Value(1))
                } else {
                    remaining.next().cloned()
                }
            })
            .collect()
    });
    Some(TensorInfo::new(input.elem_type, shape))
}

fn gather_output(
    node: &NodeProto,
    data: Option<&TensorInfo>,
    indices: Option<&TensorInfo>,
) -> Option<TensorInfo> {
    let data = data?;
    let shape = data
        .shape
        .as_ref()
        .zip(indices.and_then(|i| i.shape.as_ref()))
        .and_then(|(x, idx)| {
            let axis = normalize_axis(attr_int(node, "axis").unwrap_or(0), x.len())?;
            let mut shape = x[..axis].to_vec();
            shape.extend(idx.iter().cloned());
            shape.extend(x[axis + 1..].iter().cloned());
            Some(shape)
        });
    Some(TensorInfo::new(data.elem_type, shape))
}

fn reduced_shape(x: &[Dim], axes: &HashSet<usize>, keep_dims: bool) -> Vec<Dim> {
    x.iter()
        .enumerate()
        .filter_map(|(i, d)| match (axes.contains(&i), keep_dims) {
            (false, _) => Some(d.clone()),
            (true, true) => Some(Dim::Value(1)),
            (true, false) => None,
        })
        .collect()
}

fn reduce_output(
    node: &NodeProto,
    input: Option<&TensorInfo>,
    env: &InferenceEnv,
) -> Option<TensorInfo> {
    let input = input?;
    let keep_dims = attr_int(node, "keepdims").unwrap_or(1) != 0;
    let noop_with_empty_axes = attr_int(node, "noop_with_empty_axes").unwrap_or(0) != 0;
    let has_axes_operand = node.input.get(1).is_some_and(|n| !n.is_empty());

    let shape = input.shape.as_ref().and_then(|x| {
        let axes = match axes_operand(node, env) {
            Some(axes) if !axes.is_empty() => axes,
            None if has_axes_operand => {
                // Runtime axes: only the rank survives when dimensions are kept.
                return keep_dims.then(|| vec![Dim::Unknown; x.len()]);
            }
            _ if noop_with_empty_axes => return Some(x.clone()),
            _ => (0..x.len() as i64).collect(),
        };
        let axes = axes
            .iter()
            .map(|&a| normalize_axis(a, x.len()))
            .collect::<Option<HashSet<usize>>>()?;
        Some(reduced_shape(x, &axes, keep_dims))
    });
    Some(TensorInfo::new(input.elem_type, shape))
}

fn arg_reduce_output(node: &NodeProto, input: Option<&TensorInfo>) -> Option<TensorInfo> {
    let input = input?;
    let keep_dims = attr_int(node, "keepdims").unwrap_or(1) != 0;
    let shape = input.shape.as_ref().and_then(|x| {
        let axis = normalize_axis(attr_int(node, "axis").unwrap_or(0), x.len())?;
        Some(reduced_shape(x, &HashSet::from([axis]), keep_dims))
    });
    Some(TensorInfo::new(ElementType::Int64.to_proto(), shape))
}

fn constant_output(node: &NodeProto) -> Option<TensorInfo> {
    let value = node.attribute.first()?;
    let kind = value.type_.enum_value().ok()?;
    let scalar = |elem: ElementType| TensorInfo::new(elem.to_proto(), Some(vec![]));
    let vector =
        |elem: ElementType, len: usize| TensorInfo::new(elem.to_proto(), Some(vec![Dim::Value(len as i64)]));

    match (value.name.as_str(), kind) {
        ("value", AttributeType::TENSOR) => value.t.as_ref().map(TensorInfo::from_tensor),
        ("value_float", AttributeType::FLOAT) => Some(scalar(ElementType::Float32)),
        ("value_floats", AttributeType::FLOATS) => {
            Some(vector(ElementType::Float32, value.floats.len()))
        }
        ("value_int", AttributeType::INT) => Some(scalar(ElementType::Int64)),
        ("value_ints", AttributeType::INTS) => Some(vector(ElementType::Int64, value.ints.len())),
        ("value_string", AttributeType::STRING) => Some(scalar(ElementType::String)),
        ("value_strings", AttributeType::STRINGS) => {
            Some(vector(ElementType::String, value.strings.len()))
        }
        _ => None,
    }
}
