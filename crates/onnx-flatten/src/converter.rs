use std::{
    fs::{create_dir_all, remove_file},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use onnx_graph::{LoadError, infer_shapes, load_model};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tempfile::NamedTempFile;

use crate::assembler::assemble;
use crate::descriptor::GraphDescriptor;
use crate::error::{ConvertError, Result};
use crate::packer::{PackWarning, PackingPolicy, WeightBlob};
use crate::progress::{NoProgress, ProgressObserver};
use crate::value_info::resolve;

const DEFAULT_DESCRIPTOR_FILE: &str = "model.json";
const DEFAULT_WEIGHTS_FILE: &str = "model_weights.bin";

/// Summary of a finished conversion.
#[derive(Debug, Clone)]
pub struct ConversionReport {
    /// Where the descriptor was published.
    pub descriptor_path: PathBuf,
    /// Where the weight blob was published.
    pub weights_path: PathBuf,
    /// Number of nodes in the descriptor.
    pub node_count: usize,
    /// Number of distinct initializers packed.
    pub initializer_count: usize,
    /// Size of the weight blob in bytes.
    pub blob_size: u64,
    /// Non-fatal issues, also logged as warnings.
    pub warnings: Vec<PackWarning>,
}

/// Convert an `.onnx` file into a graph descriptor and a weight blob.
///
/// Both artifacts are first written to temporary files in the output directory and only renamed
/// to their final names once complete, the blob before the descriptor. A descriptor left by an
/// earlier run is removed before the new blob is published, and the new blob is removed again if
/// the descriptor cannot be published, so a failed run never leaves a descriptor next to a blob
/// it does not describe.
pub struct ModelConverter {
    input: Option<PathBuf>,
    out_dir: PathBuf,
    descriptor_file: String,
    weights_file: String,
    policy: PackingPolicy,
    observer: Box<dyn ProgressObserver>,
}

impl Default for ModelConverter {
    fn default() -> Self {
        Self {
            input: None,
            out_dir: PathBuf::from("."),
            descriptor_file: DEFAULT_DESCRIPTOR_FILE.to_string(),
            weights_file: DEFAULT_WEIGHTS_FILE.to_string(),
            policy: PackingPolicy::default(),
            observer: Box::new(NoProgress),
        }
    }
}

impl std::fmt::Debug for ModelConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConverter")
            .field("input", &self.input)
            .field("out_dir", &self.out_dir)
            .field("descriptor_file", &self.descriptor_file)
            .field("weights_file", &self.weights_file)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ModelConverter {
    /// Create a converter writing `model.json` and `model_weights.bin` to the current directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `.onnx` file to convert.
    pub fn input(&mut self, input: impl AsRef<Path>) -> &mut Self {
        self.input = Some(input.as_ref().to_path_buf());
        self
    }

    /// Set output directory. It is created if missing.
    pub fn out_dir(&mut self, out_dir: impl AsRef<Path>) -> &mut Self {
        self.out_dir = out_dir.as_ref().to_path_buf();
        self
    }

    /// Set the file name of the descriptor.
    pub fn descriptor_file(&mut self, name: &str) -> &mut Self {
        self.descriptor_file = name.to_string();
        self
    }

    /// Set the file name of the weight blob, as recorded in the descriptor.
    pub fn weights_file(&mut self, name: &str) -> &mut Self {
        self.weights_file = name.to_string();
        self
    }

    /// Set how initializers read by several nodes are packed.
    pub fn policy(&mut self, policy: PackingPolicy) -> &mut Self {
        self.policy = policy;
        self
    }

    /// Set the observer notified after each node.
    pub fn observer(&mut self, observer: Box<dyn ProgressObserver>) -> &mut Self {
        self.observer = observer;
        self
    }

    /// Run the conversion.
    pub fn run(&mut self) -> Result<ConversionReport> {
        let input = self.input.clone().ok_or_else(|| LoadError::InvalidInputPath {
            path: PathBuf::new(),
            reason: "no input model given".to_string(),
        })?;
        log::info!("Converting {}", input.display());

        let mut model = load_model(&input)?;
        infer_shapes(&mut model);
        let value_info = resolve(&model.graph);

        let out_dir = &self.out_dir;
        log::debug!("Output directory: {}", out_dir.display());
        create_dir_all(out_dir)?;

        let mut blob_file = staging_file(out_dir, &self.weights_file)?;
        let (assembly, blob_size) = {
            let mut blob = WeightBlob::new(BufWriter::new(blob_file.as_file_mut()));
            let assembly = assemble(
                &model,
                &value_info,
                &mut blob,
                &self.weights_file,
                self.policy,
                self.observer.as_mut(),
            )?;
            blob.flush()?;
            (assembly, blob.len())
        };
        blob_file.as_file().sync_all()?;

        let mut descriptor_file = staging_file(out_dir, &self.descriptor_file)?;
        write_descriptor(&assembly.descriptor, descriptor_file.as_file_mut())?;
        descriptor_file.as_file().sync_all()?;

        let weights_path = out_dir.join(&self.weights_file);
        let descriptor_path = out_dir.join(&self.descriptor_file);
        remove_stale(&descriptor_path)?;
        publish(blob_file, &weights_path)?;
        if let Err(err) = publish(descriptor_file, &descriptor_path) {
            if let Err(cleanup) = remove_file(&weights_path) {
                log::warn!("Unable to remove {}: {cleanup}", weights_path.display());
            }
            return Err(err);
        }

        log::info!(
            "Wrote {} and {} ({} bytes)",
            descriptor_path.display(),
            weights_path.display(),
            blob_size
        );

        Ok(ConversionReport {
            descriptor_path,
            weights_path,
            node_count: assembly.descriptor.nodes.len(),
            initializer_count: assembly.initializer_count,
            blob_size,
            warnings: assembly.warnings,
        })
    }
}

/// A hidden temporary file next to the final artifact.
fn staging_file(out_dir: &Path, name: &str) -> Result<NamedTempFile> {
    Ok(tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".tmp")
        .tempfile_in(out_dir)?)
}

fn write_descriptor<W: Write>(descriptor: &GraphDescriptor, writer: W) -> Result<()> {
    let mut writer = BufWriter::new(writer);
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
    descriptor.serialize(&mut serializer)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn remove_stale(path: &Path) -> Result<()> {
    match remove_file(path) {
        Ok(()) => {
            log::debug!("Removed previous {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ConvertError::Persist {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

fn publish(file: NamedTempFile, path: &Path) -> Result<()> {
    file.persist(path).map_err(|e| ConvertError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// The operator kinds of a model's nodes, in graph order.
pub fn list_op_types(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let model = load_model(path.as_ref())?;
    Ok(model.graph.node.iter().map(|n| n.op_type.clone()).collect())
}
