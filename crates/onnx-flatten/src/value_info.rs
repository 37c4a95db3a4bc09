use std::collections::HashMap;

use onnx_graph::{
    ElementType,
    protos::{GraphProto, ValueInfoProto},
    shape_inference::{self, TensorInfo},
    tensor_shape,
};

use crate::descriptor::{Dim, Shape, ValueRef};

/// Resolved element type and shape of a named value.
#[derive(new, Debug, Clone, PartialEq)]
pub struct ValueInfo {
    /// `None` when the element type is undefined.
    pub data_type: Option<ElementType>,
    /// Dimensions, [`Shape::Unknown`] when not recorded.
    pub shape: Shape,
}

impl ValueInfo {
    /// Read a declared value, `None` when it is not a tensor.
    pub fn from_proto(value: &ValueInfoProto) -> Option<Self> {
        TensorInfo::from_value_info(value).map(Self::from)
    }
}

impl From<TensorInfo> for ValueInfo {
    fn from(info: TensorInfo) -> Self {
        let shape = match info.shape {
            Some(dims) => Shape::Dims(
                dims.into_iter()
                    .map(|dim| match dim {
                        shape_inference::Dim::Value(v) => Dim::Fixed(v as u64),
                        shape_inference::Dim::Param(p) => Dim::Symbolic(p),
                        shape_inference::Dim::Unknown => Dim::Unknown,
                    })
                    .collect(),
            ),
            None => Shape::Unknown,
        };
        Self::new(ElementType::from_proto(info.elem_type), shape)
    }
}

/// Read-only lookup from value name to its resolved type and shape.
///
/// A missing entry means the value is unknown, which is never an error.
#[derive(Debug, Default, Clone)]
pub struct ValueInfoMap {
    entries: HashMap<String, ValueInfo>,
}

impl ValueInfoMap {
    /// Look up a value by name.
    pub fn get(&self, name: &str) -> Option<&ValueInfo> {
        self.entries.get(name)
    }

    /// Number of resolved values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no value was resolved.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the descriptor entry of the slot `name`.
    ///
    /// An empty name is an omitted optional slot. A name without an entry gets an unknown type
    /// and shape.
    pub fn value_ref(&self, name: &str) -> ValueRef {
        if name.is_empty() {
            return ValueRef::Absent;
        }
        let (data_type, shape) = match self.get(name) {
            Some(info) => (info.data_type, info.shape.clone()),
            None => (None, Shape::Unknown),
        };
        ValueRef::Value {
            name: name.to_string(),
            data_type,
            shape,
        }
    }

    fn record(&mut self, name: &str, info: ValueInfo) {
        if let Some(previous) = self.entries.insert(name.to_string(), info)
            && Some(&previous) != self.entries.get(name)
        {
            log::debug!("Value info of '{name}' overridden, previously {previous:?}");
        }
    }
}

/// Build the value lookup of a graph.
///
/// Shape inference must have run on the graph beforehand for intermediate values to be known.
/// Initializers are recorded first, then declared inputs, declared outputs and `value_info`.
/// When several entries describe the same name, the last one wins.
pub fn resolve(graph: &GraphProto) -> ValueInfoMap {
    let mut map = ValueInfoMap::default();

    for tensor in graph.initializer.iter() {
        let shape = match tensor_shape(tensor) {
            Ok(dims) => Shape::Dims(dims.into_iter().map(Dim::Fixed).collect()),
            Err(_) => Shape::Unknown,
        };
        let data_type = ElementType::from_proto(tensor.data_type);
        map.record(&tensor.name, ValueInfo::new(data_type, shape));
    }

    let declared = graph
        .input
        .iter()
        .chain(graph.output.iter())
        .chain(graph.value_info.iter());

    for value in declared {
        match ValueInfo::from_proto(value) {
            Some(info) => map.record(&value.name, info),
            None => log::debug!("Value '{}' has no tensor type, left unresolved", value.name),
        }
    }

    log::debug!("Resolved {} values", map.len());
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use onnx_graph::builder::GraphBuilder;
    use onnx_graph::shape_inference::Dim as InferredDim;

    #[test]
    fn declared_inputs_and_outputs_are_resolved() {
        let model = GraphBuilder::new("g")
            .input("x", ElementType::Float32, &[1, 3, 224, 224])
            .output("y", ElementType::Float16, &[1, 1000])
            .build();

        let map = resolve(&model.graph);
        assert_eq!(
            map.get("x"),
            Some(&ValueInfo::new(
                Some(ElementType::Float32),
                Shape::Dims(vec![
                    Dim::Fixed(1),
                    Dim::Fixed(3),
                    Dim::Fixed(224),
                    Dim::Fixed(224)
                ])
            ))
        );
        assert_eq!(map.get("y").unwrap().data_type, Some(ElementType::Float16));
    }

    #[test]
    fn missing_entries_are_unknown() {
        let map = ValueInfoMap::default();
        assert_eq!(
            map.value_ref("hidden"),
            ValueRef::Value {
                name: "hidden".into(),
                data_type: None,
                shape: Shape::Unknown,
            }
        );
        assert_eq!(map.value_ref(""), ValueRef::Absent);
    }

    #[test]
    fn symbolic_and_unset_dims_are_kept() {
        let model = GraphBuilder::new("g")
            .input_dims(
                "x",
                ElementType::Float32,
                vec![InferredDim::Param("N".into()), InferredDim::Unknown],
            )
            .input_unknown_shape("z", ElementType::Int64)
            .build();

        let map = resolve(&model.graph);
        assert_eq!(
            map.get("x").unwrap().shape,
            Shape::Dims(vec![Dim::Symbolic("N".into()), Dim::Unknown])
        );
        assert_eq!(map.get("z").unwrap().shape, Shape::Unknown);
    }

    #[test]
    fn non_tensor_values_are_absent() {
        let model = GraphBuilder::new("g")
            .input_sequence("seq", ElementType::Float32)
            .build();

        assert!(resolve(&model.graph).get("seq").is_none());
    }

    #[test]
    fn declarations_override_initializers() {
        let model = GraphBuilder::new("g")
            .initializer_f32("W", &[2, 2], &[0.0; 4])
            .input_dims(
                "W",
                ElementType::Float32,
                vec![InferredDim::Param("rows".into()), InferredDim::Value(2)],
            )
            .initializer_i64("shape", &[2], &[1, -1])
            .build();

        let map = resolve(&model.graph);
        assert_eq!(
            map.get("W").unwrap().shape,
            Shape::Dims(vec![Dim::Symbolic("rows".into()), Dim::Fixed(2)])
        );
        assert_eq!(
            map.get("shape"),
            Some(&ValueInfo::new(
                Some(ElementType::Int64),
                Shape::Dims(vec![Dim::Fixed(2)])
            ))
        );
    }

    #[test]
    fn last_value_info_wins() {
        let first = TensorInfo {
            elem_type: ElementType::Float32.to_proto(),
            shape: None,
        };
        let second = TensorInfo {
            elem_type: ElementType::Float32.to_proto(),
            shape: Some(vec![InferredDim::Value(4)]),
        };
        let model = GraphBuilder::new("g")
            .value_info(first.to_value_info("h"))
            .value_info(second.to_value_info("h"))
            .build();

        assert_eq!(
            resolve(&model.graph).get("h").unwrap().shape,
            Shape::Dims(vec![Dim::Fixed(4)])
        );
    }
}
