use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Component, Path, PathBuf},
};

use protobuf::{Enum, Message};

use crate::protos::{ModelProto, TensorProto, tensor_proto::DataLocation};

/// Errors raised while loading an ONNX model.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The path does not reference an ONNX model file.
    #[error("invalid input path {}: {reason}", path.display())]
    InvalidInputPath { path: PathBuf, reason: String },

    /// The model file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The bytes are not a valid `ModelProto`.
    #[error("unable to parse ONNX model: {0}")]
    Decode(#[from] protobuf::Error),

    /// A tensor references external data that cannot be loaded.
    #[error("external data of tensor '{tensor}': {reason}")]
    ExternalData { tensor: String, reason: String },
}

/// Check that `path` points at an existing file with the `.onnx` extension.
///
/// The extension check is case-insensitive.
pub fn check_model_path(path: &Path) -> Result<(), LoadError> {
    let invalid = |reason: &str| LoadError::InvalidInputPath {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let is_onnx = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));

    if !is_onnx {
        return Err(invalid("expected a file with the .onnx extension"));
    }
    if !path.is_file() {
        return Err(invalid("no such file"));
    }

    Ok(())
}

/// Open an ONNX file and decode it into a `ModelProto`.
///
/// Tensors stored as external data are read from their side files (relative to the model's
/// directory) and inlined into `raw_data`, so callers never see `DataLocation::EXTERNAL`.
pub fn load_model(path: &Path) -> Result<ModelProto, LoadError> {
    log::info!("Parsing ONNX file: {}", path.display());
    check_model_path(path)?;

    let mut file = File::open(path)?;
    let mut model = ModelProto::parse_from_reader(&mut file)?;

    let graph = &model.graph;
    log::debug!("Number of nodes: {:?}", graph.node.len());
    log::debug!("Number of inputs: {:?}", graph.input.len());
    log::debug!("Number of initializers: {:?}", graph.initializer.len());
    log::debug!("Number of outputs: {:?}", graph.output.len());

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let inlined = inline_external_data(&mut model, base_dir)?;
    if inlined > 0 {
        log::debug!("Inlined external data for {inlined} tensors");
    }

    Ok(model)
}

/// Decode a `ModelProto` from an in-memory buffer.
///
/// External data is left untouched since there is no directory to resolve it against.
pub fn decode_model(bytes: &[u8]) -> Result<ModelProto, LoadError> {
    Ok(ModelProto::parse_from_bytes(bytes)?)
}

/// Replace every external tensor of the graph (initializers and node attribute tensors) by
/// its inlined bytes. Returns the number of tensors that were loaded.
pub fn inline_external_data(model: &mut ModelProto, base_dir: &Path) -> Result<usize, LoadError> {
    let graph = model.graph.mut_or_insert_default();
    let mut count = 0;

    for tensor in graph.initializer.iter_mut() {
        count += inline_tensor(tensor, base_dir)? as usize;
    }

    for node in graph.node.iter_mut() {
        for attr in node.attribute.iter_mut() {
            if let Some(tensor) = attr.t.as_mut() {
                count += inline_tensor(tensor, base_dir)? as usize;
            }
            for tensor in attr.tensors.iter_mut() {
                count += inline_tensor(tensor, base_dir)? as usize;
            }
        }
    }

    Ok(count)
}

fn inline_tensor(tensor: &mut TensorProto, base_dir: &Path) -> Result<bool, LoadError> {
    if tensor.data_location.value() != DataLocation::EXTERNAL.value() {
        return Ok(false);
    }

    let error = |reason: String| LoadError::ExternalData {
        tensor: tensor.name.clone(),
        reason,
    };

    let mut location = None;
    let mut offset = 0u64;
    let mut length = None;

    for entry in tensor.external_data.iter() {
        match entry.key.as_str() {
            "location" => location = Some(entry.value.clone()),
            "offset" => {
                offset = entry
                    .value
                    .parse()
                    .map_err(|_| error(format!("invalid offset '{}'", entry.value)))?
            }
            "length" => {
                length = Some(
                    entry
                        .value
                        .parse::<u64>()
                        .map_err(|_| error(format!("invalid length '{}'", entry.value)))?,
                )
            }
            _ => {}
        }
    }

    let location = location.ok_or_else(|| error("missing location".to_string()))?;
    let relative = Path::new(&location);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(error(format!(
            "location '{location}' must be relative to the model directory"
        )));
    }

    let data_path = base_dir.join(relative);
    let mut file =
        File::open(&data_path).map_err(|e| error(format!("{}: {e}", data_path.display())))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| error(e.to_string()))?;

    let mut bytes = Vec::new();
    match length {
        Some(length) => {
            bytes.resize(length as usize, 0);
            file.read_exact(&mut bytes)
                .map_err(|e| error(format!("reading {length} bytes at offset {offset}: {e}")))?;
        }
        None => {
            file.read_to_end(&mut bytes)
                .map_err(|e| error(e.to_string()))?;
        }
    }

    log::debug!(
        "Loaded {} bytes of external data for '{}' from {}",
        bytes.len(),
        tensor.name,
        data_path.display()
    );

    tensor.raw_data = bytes;
    tensor.external_data.clear();
    tensor.data_location = DataLocation::DEFAULT.into();

    Ok(true)
}
