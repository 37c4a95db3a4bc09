use std::io::Write;

use onnx_graph::protos::{ModelProto, NodeProto};

use crate::attribute::extract;
use crate::descriptor::{GraphDescriptor, ModelInfo, NodeDescriptor, OpsetImport};
use crate::error::{ConvertError, Result};
use crate::packer::{InitializerTable, PackWarning, PackingPolicy, WeightBlob, WeightPacker};
use crate::progress::ProgressObserver;
use crate::value_info::ValueInfoMap;

/// Output of [`assemble`].
#[derive(Debug)]
pub struct Assembly {
    /// The finished descriptor.
    pub descriptor: GraphDescriptor,
    /// Non-fatal packing issues.
    pub warnings: Vec<PackWarning>,
    /// Number of distinct initializers written to the blob.
    pub initializer_count: usize,
}

/// Build the descriptor of `model`, packing weights into `blob` as nodes are visited.
///
/// Nodes are visited once, in graph order, and `observer` is notified after each one. The
/// descriptor and blob only describe each other once this returns `Ok`; after an error the
/// blob contents must be discarded.
pub fn assemble<W: Write>(
    model: &ModelProto,
    value_info: &ValueInfoMap,
    blob: &mut WeightBlob<W>,
    weights_file: &str,
    policy: PackingPolicy,
    observer: &mut dyn ProgressObserver,
) -> Result<Assembly> {
    let graph = &model.graph;
    let info = model_info(model)?;
    log::info!(
        "Assembling graph '{}' (IR {}, opset {})",
        info.name,
        info.ir_version,
        info.opset_version
    );

    let table = InitializerTable::new(graph);
    let mut packer = WeightPacker::new(&table, policy);
    let total = graph.node.len();
    let mut nodes = Vec::with_capacity(total);

    for (index, node) in graph.node.iter().enumerate() {
        log::debug!("Node {}/{total}: '{}' ({})", index + 1, node.name, node.op_type);
        nodes.push(node_descriptor(node, value_info, &mut packer, blob)?);
        observer.on_node(index + 1, total);
    }

    let initializer_count = packer.packed_count();
    let warnings = packer.into_warnings();

    let descriptor = GraphDescriptor {
        model: info,
        inputs: graph.input.iter().map(|v| value_info.value_ref(&v.name)).collect(),
        outputs: graph.output.iter().map(|v| value_info.value_ref(&v.name)).collect(),
        weights_file: weights_file.to_string(),
        nodes,
    };

    log::info!(
        "Assembled {} nodes, {} initializers, {} weight bytes",
        descriptor.nodes.len(),
        initializer_count,
        blob.len()
    );

    Ok(Assembly {
        descriptor,
        warnings,
        initializer_count,
    })
}

fn node_descriptor<W: Write>(
    node: &NodeProto,
    value_info: &ValueInfoMap,
    packer: &mut WeightPacker<'_>,
    blob: &mut WeightBlob<W>,
) -> Result<NodeDescriptor> {
    let attributes = extract(node)?;
    let initializers = packer.pack(node, blob)?;

    Ok(NodeDescriptor {
        name: node.name.clone(),
        op_type: node.op_type.clone(),
        domain: node.domain.clone(),
        inputs: node.input.iter().map(|n| value_info.value_ref(n)).collect(),
        outputs: node.output.iter().map(|n| value_info.value_ref(n)).collect(),
        attributes,
        initializers,
    })
}

fn model_info(model: &ModelProto) -> Result<ModelInfo> {
    let opset_imports: Vec<OpsetImport> = model
        .opset_import
        .iter()
        .map(|o| OpsetImport::new(o.domain.clone(), o.version))
        .collect();

    let opset_version = opset_imports
        .iter()
        .find(|o| o.domain.is_empty() || o.domain == "ai.onnx")
        .or_else(|| opset_imports.first())
        .map(|o| o.version)
        .ok_or(ConvertError::MissingOpset)?;

    Ok(ModelInfo {
        name: model.graph.name.clone(),
        ir_version: model.ir_version,
        opset_version,
        opset_imports,
        producer_name: model.producer_name.clone(),
        producer_version: model.producer_version.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{AttributeValue, Dim, Shape, ValueRef};
    use crate::progress::NoProgress;
    use crate::value_info::resolve;
    use onnx_graph::ElementType;
    use onnx_graph::builder::{GraphBuilder, NodeBuilder};

    fn assemble_model(model: &ModelProto) -> (Assembly, Vec<u8>) {
        let value_info = resolve(&model.graph);
        let mut blob = WeightBlob::new(Vec::new());
        let assembly = assemble(
            model,
            &value_info,
            &mut blob,
            "model_weights.bin",
            PackingPolicy::Duplicate,
            &mut NoProgress,
        )
        .unwrap();
        (assembly, blob.into_inner())
    }

    #[test]
    fn model_metadata_is_captured() {
        let model = GraphBuilder::new("lenet")
            .opset("", 13)
            .opset("com.microsoft", 1)
            .input("x", ElementType::Float32, &[1, 1, 28, 28])
            .build();

        let (assembly, _) = assemble_model(&model);
        let info = &assembly.descriptor.model;
        assert_eq!(info.name, "lenet");
        assert_eq!(info.ir_version, 8);
        assert_eq!(info.opset_version, 13);
        assert_eq!(info.opset_imports.len(), 2);
        assert_eq!(assembly.descriptor.weights_file, "model_weights.bin");
        assert_eq!(
            assembly.descriptor.inputs[0],
            ValueRef::Value {
                name: "x".into(),
                data_type: Some(ElementType::Float32),
                shape: Shape::Dims(vec![Dim::Fixed(1), Dim::Fixed(1), Dim::Fixed(28), Dim::Fixed(28)]),
            }
        );
    }

    #[test]
    fn opset_falls_back_to_first_import() {
        let model = GraphBuilder::new("custom")
            .without_opsets()
            .opset("com.example", 3)
            .build();

        let (assembly, _) = assemble_model(&model);
        assert_eq!(assembly.descriptor.model.opset_version, 3);
    }

    #[test]
    fn missing_opset_is_an_error() {
        let model = GraphBuilder::new("bare").without_opsets().build();
        let value_info = resolve(&model.graph);
        let mut blob = WeightBlob::new(Vec::new());

        let result = assemble(
            &model,
            &value_info,
            &mut blob,
            "w.bin",
            PackingPolicy::Duplicate,
            &mut NoProgress,
        );
        assert!(matches!(result, Err(ConvertError::MissingOpset)));
    }

    #[test]
    fn nodes_keep_order_slots_and_domain() {
        let model = GraphBuilder::new("g")
            .input("x", ElementType::Float32, &[4])
            .node(NodeBuilder::new("Relu", "first").inputs(&["x"]).outputs(&["a"]))
            .node(
                NodeBuilder::new("Clip", "second")
                    .inputs(&["a", "", "max"])
                    .outputs(&["b"]),
            )
            .node(
                NodeBuilder::new("FusedGelu", "third")
                    .domain("com.microsoft")
                    .inputs(&["b"])
                    .outputs(&["c", ""])
                    .attr_float("approximation", 1.0),
            )
            .build();

        let (assembly, blob) = assemble_model(&model);
        let nodes = &assembly.descriptor.nodes;

        let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(nodes[1].inputs[1], ValueRef::Absent);
        assert_eq!(nodes[1].inputs[2].name(), Some("max"));
        assert_eq!(nodes[2].outputs[1], ValueRef::Absent);
        assert_eq!(nodes[2].domain, "com.microsoft");
        assert_eq!(nodes[0].domain, "");
        assert_eq!(
            nodes[2].attributes["approximation"],
            AttributeValue::Float(1.0)
        );
        assert!(blob.is_empty());
    }

    #[test]
    fn observer_sees_every_node() {
        let model = GraphBuilder::new("g")
            .node(NodeBuilder::new("Relu", "a").inputs(&["x"]).outputs(&["y"]))
            .node(NodeBuilder::new("Relu", "b").inputs(&["y"]).outputs(&["z"]))
            .build();
        let value_info = resolve(&model.graph);
        let mut blob = WeightBlob::new(Vec::new());
        let mut seen = Vec::new();
        let mut observer = |current: usize, total: usize| seen.push((current, total));

        assemble(
            &model,
            &value_info,
            &mut blob,
            "w.bin",
            PackingPolicy::Duplicate,
            &mut observer,
        )
        .unwrap();

        assert_eq!(seen, vec![(1, 2), (2, 2)]);
    }
}
