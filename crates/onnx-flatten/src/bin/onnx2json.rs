//! Convert an ONNX model into `model.json` and `model_weights.bin`.
//!
//! ```bash
//! onnx2json lenet.onnx
//! onnx2json lenet.onnx --out-dir build/lenet --dedup -v
//! onnx2json lenet.onnx --list-ops
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;
use onnx_flatten::{ConsoleProgress, ModelConverter, PackingPolicy, init_log, list_op_types};

#[derive(Parser, Debug)]
#[command(
    name = "onnx2json",
    about = "Flatten an ONNX model into a JSON graph descriptor and a packed weight blob",
    version
)]
struct Cli {
    /// Path to the `.onnx` model.
    model: PathBuf,

    /// Directory receiving the descriptor and the weight blob.
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Write each initializer once, even when several nodes read it.
    #[arg(long)]
    dedup: bool,

    /// Only print the operator kinds of the model, in node order.
    #[arg(long)]
    list_ops: bool,

    /// Enable verbose logging (repeat for more: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(err) = init_log(level) {
        eprintln!("Unable to initialize logging: {err}");
    }

    if cli.list_ops {
        return match list_op_types(&cli.model) {
            Ok(op_types) => {
                for op_type in op_types {
                    println!("{op_type}");
                }
                ExitCode::SUCCESS
            }
            Err(err) => {
                log::error!("{err}");
                ExitCode::FAILURE
            }
        };
    }

    let policy = if cli.dedup {
        PackingPolicy::Deduplicate
    } else {
        PackingPolicy::Duplicate
    };

    let result = ModelConverter::new()
        .input(&cli.model)
        .out_dir(&cli.out_dir)
        .policy(policy)
        .observer(Box::new(ConsoleProgress))
        .run();

    match result {
        Ok(report) => {
            if !report.warnings.is_empty() {
                log::warn!("{} conversion warnings, see above", report.warnings.len());
            }
            log::info!(
                "Converted {} nodes and {} initializers into {} and {}",
                report.node_count,
                report.initializer_count,
                report.descriptor_path.display(),
                report.weights_path.display()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("Conversion failed: {err}");
            ExitCode::FAILURE
        }
    }
}
