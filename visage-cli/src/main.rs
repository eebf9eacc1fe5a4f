//! visage CLI entrypoint.
//!
//! ```bash
//! visage restore face1.png face2.png --model gfpgan.engine --output restored/
//! visage restore face.png --model unused --backend identity --json
//! visage inspect --model gfpgan.engine --json
//! visage probe --json
//! ```

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::info;

use visage_core::backend::{IdentityBackend, RestoreBackend};
use visage_core::error::EngineError;
use visage_core::restorer::FaceRestorer;
use visage_core::types::{ChannelOrder, ImageBatch};
use visage_core::RestorerConfig;
use visage_trt::TrtEngine;

const JSON_SCHEMA_VERSION: u32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "visage",
    version,
    about = "GPU face restoration over a compiled inference plan",
    arg_required_else_help = true,
    after_help = "Examples:\n  visage probe --json\n  visage inspect --model gfpgan.engine\n  visage restore face1.png face2.png --model gfpgan.engine --output restored/\n  visage restore face.png --backend identity --width 512 --height 512"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Restore a batch of face images through the loaded plan.
    Restore(RestoreArgs),
    /// Load a plan and print its validated binding table.
    Inspect(InspectArgs),
    /// Report which execution backend this build carries.
    Probe(ProbeArgs),
}

#[derive(Args, Debug, Clone)]
struct RestoreArgs {
    /// Input image files (PNG or JPEG).  Their count must equal the plan's
    /// compiled batch size.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for restored images (`<stem>_restored.png`).
    #[arg(short = 'o', long = "output", default_value = ".")]
    output: PathBuf,

    /// Serialized engine path.  Ignored by the identity backend.
    #[arg(short = 'm', long = "model", default_value = "model.engine")]
    model: PathBuf,

    /// Execution backend.
    #[arg(long = "backend", value_enum, default_value_t = BackendArg::Trt)]
    backend: BackendArg,

    /// Interleaved channel order the batch is marshalled in.
    #[arg(long = "order", value_enum, default_value_t = OrderArg::Rgb)]
    order: OrderArg,

    /// CUDA device ordinal.
    #[arg(short = 'd', long = "device", default_value_t = 0)]
    device: u32,

    /// Plan input/output width for the identity backend.
    #[arg(long = "width", default_value_t = 512)]
    width: usize,

    /// Plan input/output height for the identity backend.
    #[arg(long = "height", default_value_t = 512)]
    height: usize,

    /// Emit a structured JSON summary to stdout.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct InspectArgs {
    /// Serialized engine path.
    #[arg(short = 'm', long = "model")]
    model: PathBuf,

    /// CUDA device ordinal.
    #[arg(short = 'd', long = "device", default_value_t = 0)]
    device: u32,

    /// Emit JSON binding info.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct ProbeArgs {
    /// Emit JSON probe output.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    /// TensorRT plan execution on the GPU.
    Trt,
    /// In-process pass-through for exercising the marshalling path.
    Identity,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrderArg {
    Rgb,
    Bgr,
}

impl From<OrderArg> for ChannelOrder {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::Rgb => ChannelOrder::Rgb,
            OrderArg::Bgr => ChannelOrder::Bgr,
        }
    }
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let json_error_command = match &cli.command {
        Commands::Restore(args) if args.json => Some("restore"),
        Commands::Inspect(args) if args.json => Some("inspect"),
        Commands::Probe(args) if args.json => Some("probe"),
        _ => None,
    };

    let result = match cli.command {
        Commands::Restore(args) => run_restore(args),
        Commands::Inspect(args) => run_inspect(args),
        Commands::Probe(args) => run_probe(args),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            let code = err
                .downcast_ref::<EngineError>()
                .map(|e| e.error_code())
                .unwrap_or(1);
            if let Some(command) = json_error_command {
                println!(
                    "{}",
                    json!({
                        "schema_version": JSON_SCHEMA_VERSION,
                        "command": command,
                        "ok": false,
                        "error": err.to_string(),
                        "code": code,
                    })
                );
            } else {
                tracing::error!(error = %err, code, "command failed");
            }
            std::process::exit(exit_status(code));
        }
    }
}

/// Exit status for a failed command.
///
/// Unix keeps only the low eight bits of an exit status, so the stable
/// telemetry codes (100..=400) cannot be used directly; they collapse to
/// their category digit instead: 1 engine load, 2 batch validation,
/// 3 device/runtime, 4 availability.  The full code stays in the error
/// output.
fn exit_status(code: u32) -> i32 {
    match code {
        100..=499 => (code / 100) as i32,
        _ => 1,
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

/// Collect the restore flags into the engine configuration.  The configured
/// channel order is the single source of truth for marshalling direction.
fn restore_config(args: &RestoreArgs) -> RestorerConfig {
    let mut config = RestorerConfig::new(&args.model);
    config.device_id = args.device;
    config.channel_order = ChannelOrder::from(args.order);
    config
}

fn run_restore(args: RestoreArgs) -> anyhow::Result<()> {
    let config = restore_config(&args);
    let order = config.channel_order;
    let started = Instant::now();

    let batch = load_batch(&args.inputs, order)?;

    let backend: Box<dyn RestoreBackend> = match args.backend {
        BackendArg::Identity => Box::new(IdentityBackend::new(
            batch.batch_size(),
            args.height,
            args.width,
        )?),
        BackendArg::Trt => Box::new(TrtEngine::load(&config)?),
    };

    let mut restorer = FaceRestorer::new(backend, config.channel_order);
    let restored = restorer.restore(&batch)?;

    std::fs::create_dir_all(&args.output)?;
    let mut outputs = Vec::with_capacity(args.inputs.len());
    for (index, input) in args.inputs.iter().enumerate() {
        let path = restored_path(&args.output, input);
        save_image(&restored, index, order, &path)?;
        outputs.push(path);
    }

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(
        batch = restored.batch_size(),
        elapsed_ms = format!("{elapsed_ms:.1}"),
        "restore complete"
    );

    if args.json {
        println!(
            "{}",
            json!({
                "schema_version": JSON_SCHEMA_VERSION,
                "command": "restore",
                "ok": true,
                "batch": restored.batch_size(),
                "width": restored.width(),
                "height": restored.height(),
                "order": order.as_str(),
                "elapsed_ms": elapsed_ms,
                "outputs": outputs.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            })
        );
    } else {
        for path in &outputs {
            println!("restored: {}", path.display());
        }
        println!(
            "restore: ok batch={} resolution={}x{} elapsed_ms={elapsed_ms:.1}",
            restored.batch_size(),
            restored.width(),
            restored.height()
        );
    }

    Ok(())
}

fn run_inspect(args: InspectArgs) -> anyhow::Result<()> {
    let mut config = RestorerConfig::new(&args.model);
    config.device_id = args.device;
    let engine = TrtEngine::load(&config)?;
    let bindings = engine.bindings();

    if args.json {
        let (ih, iw) = bindings.input_hw();
        let (oh, ow) = bindings.output_hw();
        println!(
            "{}",
            json!({
                "schema_version": JSON_SCHEMA_VERSION,
                "command": "inspect",
                "ok": true,
                "model": args.model.display().to_string(),
                "batch": bindings.batch_size(),
                "input": { "name": bindings.input().name, "height": ih, "width": iw },
                "output": { "name": bindings.output().name, "height": oh, "width": ow },
            })
        );
    } else {
        println!("inspect: ok model={}", args.model.display());
        println!("batch={}", bindings.batch_size());
        println!(
            "input name={} hw={:?}",
            bindings.input().name,
            bindings.input_hw()
        );
        println!(
            "output name={} hw={:?}",
            bindings.output().name,
            bindings.output_hw()
        );
    }

    Ok(())
}

fn run_probe(args: ProbeArgs) -> anyhow::Result<()> {
    let trt_runtime = cfg!(feature = "trt-runtime");
    let backend = if trt_runtime { "tensorrt" } else { "stub" };

    if args.json {
        println!(
            "{}",
            json!({
                "schema_version": JSON_SCHEMA_VERSION,
                "command": "probe",
                "ok": true,
                "backend": backend,
                "trt_runtime": trt_runtime,
            })
        );
    } else {
        println!("probe: ok");
        println!("backend={backend}");
        println!("trt_runtime={trt_runtime}");
    }

    Ok(())
}

/// Decode the input files into one interleaved batch in `order`.
///
/// Decoders hand back RGB; when the caller asked for BGR marshalling the
/// channels are swapped here so the batch genuinely carries BGR bytes.
fn load_batch(inputs: &[PathBuf], order: ChannelOrder) -> anyhow::Result<ImageBatch> {
    let mut pixels = Vec::new();
    let mut dims: Option<(usize, usize)> = None;

    for path in inputs {
        let image = image::open(path)
            .map_err(|e| EngineError::InvalidBatch(format!("{}: {e}", path.display())))?
            .to_rgb8();
        let (w, h) = (image.width() as usize, image.height() as usize);
        match dims {
            None => dims = Some((h, w)),
            Some(expected) if expected != (h, w) => {
                return Err(EngineError::InvalidBatch(format!(
                    "{}: is {}x{}, batch images must all be {}x{}",
                    path.display(),
                    w,
                    h,
                    expected.1,
                    expected.0
                ))
                .into());
            }
            Some(_) => {}
        }

        let mut raw = image.into_raw();
        if matches!(order, ChannelOrder::Bgr) {
            for px in raw.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
        }
        pixels.extend_from_slice(&raw);
    }

    let (h, w) = dims.ok_or_else(|| EngineError::InvalidBatch("no input images".into()))?;
    Ok(ImageBatch::from_vec(inputs.len(), h, w, pixels)?)
}

fn restored_path(output_dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    output_dir.join(format!("{stem}_restored.png"))
}

/// Write one image of the batch as PNG, converting back to RGB bytes.
fn save_image(
    batch: &ImageBatch,
    index: usize,
    order: ChannelOrder,
    path: &Path,
) -> anyhow::Result<()> {
    let view = batch.pixels().index_axis(ndarray::Axis(0), index);
    let mut raw: Vec<u8> = view.iter().copied().collect();
    if matches!(order, ChannelOrder::Bgr) {
        for px in raw.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
    }
    let image = image::RgbImage::from_raw(batch.width() as u32, batch.height() as u32, raw)
        .ok_or_else(|| EngineError::InvalidBatch("restored batch has inconsistent size".into()))?;
    image.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_fits_in_eight_bits() {
        assert_eq!(exit_status(100), 1);
        assert_eq!(exit_status(202), 2);
        assert_eq!(exit_status(301), 3);
        assert_eq!(exit_status(400), 4);
        assert_eq!(exit_status(1), 1);
        for code in [1u32, 100, 202, 301, 400] {
            let status = exit_status(code);
            assert!((1..=125).contains(&status), "status {status} out of range");
        }
    }

    #[test]
    fn restore_config_carries_the_requested_channel_order() {
        let args = RestoreArgs {
            inputs: vec![PathBuf::from("face.png")],
            output: PathBuf::from("."),
            model: PathBuf::from("plan.engine"),
            backend: BackendArg::Identity,
            order: OrderArg::Bgr,
            device: 2,
            width: 16,
            height: 16,
            json: false,
        };
        let config = restore_config(&args);
        assert!(matches!(config.channel_order, ChannelOrder::Bgr));
        assert_eq!(config.device_id, 2);
        assert_eq!(config.model_path, PathBuf::from("plan.engine"));
    }

    #[test]
    fn restored_path_appends_suffix_in_output_dir() {
        let path = restored_path(Path::new("/tmp/out"), Path::new("faces/portrait.jpg"));
        assert_eq!(path, PathBuf::from("/tmp/out/portrait_restored.png"));
    }

    #[test]
    fn load_batch_rejects_mixed_resolutions() {
        let dir = std::env::temp_dir().join(format!(
            "visage_cli_unit_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let small = dir.join("small.png");
        let large = dir.join("large.png");
        image::RgbImage::new(4, 4).save(&small).expect("save small");
        image::RgbImage::new(8, 8).save(&large).expect("save large");

        let err = load_batch(&[small, large], ChannelOrder::Rgb)
            .expect_err("mixed resolutions must be rejected");
        assert!(err.to_string().contains("batch images must all be"));
    }

    #[test]
    fn load_batch_swaps_channels_for_bgr_order() {
        let dir = std::env::temp_dir().join(format!(
            "visage_cli_bgr_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("red.png");
        let mut image = image::RgbImage::new(2, 2);
        for px in image.pixels_mut() {
            *px = image::Rgb([200, 10, 30]);
        }
        image.save(&path).expect("save red");

        let batch = load_batch(&[path], ChannelOrder::Bgr).expect("load batch");
        assert_eq!(batch.pixels()[[0, 0, 0, 0]], 30);
        assert_eq!(batch.pixels()[[0, 0, 0, 1]], 10);
        assert_eq!(batch.pixels()[[0, 0, 0, 2]], 200);
    }
}
