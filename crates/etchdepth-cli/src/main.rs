//! etchdepth: turn depth maps into DXF point clouds for crystal etching.
//!
//! The depth model itself runs elsewhere; this tool takes its output as
//! a grayscale depth image (8- or 16-bit, brighter is nearer) plus the
//! optional original photo, and runs the full pipeline.
//!
//! # Usage
//!
//! ```text
//! etchdepth export  --depth depth.png [--photo photo.jpg] -o out.dxf
//! etchdepth preview --depth depth.png [--preview-mode] -o preview.png
//! etchdepth regions --photo photo.jpg
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `info`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use etchdepth_pipeline::{
    CrystalDimensions, EstimatorConfig, EstimatorService, ParameterSet, RasterDepthEstimator,
    RawDepthField, SamplingConfig, WebClock, Zone, grayscale,
};
use tracing_subscriber::EnvFilter;

/// Convert depth maps into zone-editable point clouds for laser etching.
#[derive(Parser)]
#[command(name = "etchdepth", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline and write a DXF point cloud.
    Export(ExportArgs),
    /// Render the filtered depth map as a PNG.
    Preview(PreviewArgs),
    /// Print text-like regions of a photo as JSON.
    Regions(RegionsArgs),
}

/// Inputs shared by `export` and `preview`.
#[derive(Args)]
struct SourceArgs {
    /// Depth image (PNG, JPEG, BMP, WebP; 8- or 16-bit grayscale).
    #[arg(long)]
    depth: PathBuf,

    /// Original photo. Drives background classification and sets the
    /// output resolution; the depth image is resized to match.
    #[arg(long)]
    photo: Option<PathBuf>,

    /// Filter parameters as JSON, e.g. `{"blur_amount": 2, "invert_depth": true}`.
    #[arg(long)]
    params_json: Option<String>,

    /// Abort if depth estimation takes longer than this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Args)]
struct ExportArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Zones as a JSON array of `{id, type, depth, visible, path}`.
    #[arg(long)]
    zones_json: Option<String>,

    /// Crystal size in millimetres as `W,H,D`. Overrides the scale and
    /// maximum depth.
    #[arg(long, value_parser = parse_crystal)]
    crystal: Option<CrystalDimensions>,

    /// Sample every Nth row and column.
    #[arg(long, default_value_t = SamplingConfig::DEFAULT_STRIDE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    stride: u32,

    /// Physical depth range in millimetres.
    #[arg(long, default_value_t = SamplingConfig::DEFAULT_MAX_DEPTH_MM)]
    max_depth_mm: f64,

    /// Pixel-to-millimetre scale.
    #[arg(long, default_value_t = SamplingConfig::DEFAULT_MM_PER_PX)]
    mm_per_px: f64,

    /// Full sampling config as a JSON string.
    ///
    /// When provided, `--crystal`, `--stride`, `--max-depth-mm` and
    /// `--mm-per-px` are ignored.
    #[arg(long)]
    config_json: Option<String>,

    /// Print diagnostics as JSON on stdout instead of a report on stderr.
    #[arg(long)]
    json: bool,

    /// Output DXF path.
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args)]
struct PreviewArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Overlay a checker on cells at or below the background threshold.
    #[arg(long)]
    preview_mode: bool,

    /// Output PNG path.
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args)]
struct RegionsArgs {
    /// Photo to scan.
    #[arg(long)]
    photo: PathBuf,
}

fn parse_crystal(s: &str) -> Result<CrystalDimensions, String> {
    let sides: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("{v:?}: {e}")))
        .collect::<Result<_, _>>()?;
    let [w, h, d] = sides[..] else {
        return Err(format!("expected W,H,D, got {} values", sides.len()));
    };
    CrystalDimensions::new(w, h, d).map_err(|e| e.to_string())
}

fn read(path: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))
}

fn params_from(json: Option<&str>) -> Result<ParameterSet, String> {
    json.map_or_else(
        || Ok(ParameterSet::default()),
        |j| serde_json::from_str(j).map_err(|e| format!("Error parsing --params-json: {e}")),
    )
}

fn zones_from(json: Option<&str>) -> Result<Vec<Zone>, String> {
    json.map_or_else(
        || Ok(Vec::new()),
        |j| serde_json::from_str(j).map_err(|e| format!("Error parsing --zones-json: {e}")),
    )
}

fn sampling_from(args: &ExportArgs) -> Result<SamplingConfig, String> {
    if let Some(ref json) = args.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }
    Ok(SamplingConfig {
        max_depth_mm: args.max_depth_mm,
        mm_per_px: args.mm_per_px,
        stride: args.stride,
        crystal: args.crystal,
    })
}

/// Raw depth plus the photo's luma, if a photo was given.
struct Estimated {
    raw: RawDepthField,
    luma: Option<etchdepth_pipeline::types::GrayImage>,
}

fn estimate(source: &SourceArgs) -> Result<Estimated, String> {
    let depth_bytes = read(&source.depth)?;
    let estimator = RasterDepthEstimator::from_bytes(&depth_bytes)
        .map_err(|e| format!("Error decoding {}: {e}", source.depth.display()))?;

    tracing::debug!(path = %source.depth.display(), size = ?estimator.dimensions(), "loaded depth image");

    let Some(ref photo_path) = source.photo else {
        let raw = estimator.depth_field().map_err(|e| e.to_string())?;
        return Ok(Estimated { raw, luma: None });
    };

    let photo = grayscale::decode_rgb(&read(photo_path)?)
        .map_err(|e| format!("Error decoding {}: {e}", photo_path.display()))?;
    let config = EstimatorConfig {
        timeout: source.timeout_ms.map(Duration::from_millis),
    };
    let service = EstimatorService::with_estimator(config, Arc::new(estimator));
    let raw = service.estimate(&photo).map_err(|e| e.to_string())?;
    Ok(Estimated {
        raw,
        luma: Some(grayscale::luma(&photo)),
    })
}

fn run_export(args: &ExportArgs) -> Result<(), String> {
    let params = params_from(args.source.params_json.as_deref())?;
    let zones = zones_from(args.zones_json.as_deref())?;
    let sampling = sampling_from(args)?;
    sampling.validate().map_err(|e| e.to_string())?;

    tracing::info!(zones = zones.len(), ?sampling, "starting export");

    let input = estimate(&args.source)?;
    let (staged, diagnostics) = etchdepth_pipeline::process_staged(
        &input.raw,
        &params,
        &zones,
        input.luma.as_ref(),
        &sampling,
        &WebClock,
    )
    .map_err(|e| format!("Pipeline error: {e}"))?;

    if args.json {
        let json = serde_json::to_string_pretty(&diagnostics)
            .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
        println!("{json}");
    } else {
        eprintln!("{}", diagnostics.report());
    }

    let count = etchdepth_export::write_dxf_file(&args.output, &staged.cloud)
        .map_err(|e| format!("Error writing {}: {e}", args.output.display()))?;
    eprintln!("{count} points written to {}", args.output.display());
    Ok(())
}

fn run_preview(args: &PreviewArgs) -> Result<(), String> {
    let params = params_from(args.source.params_json.as_deref())?;
    let input = estimate(&args.source)?;

    // One render per process, so `PreviewCache` would never hit here.
    let payload = etchdepth_pipeline::render_preview(&input.raw, &params, args.preview_mode)
        .map_err(|e| format!("Preview error: {e}"))?;

    std::fs::write(&args.output, &payload.png)
        .map_err(|e| format!("Error writing {}: {e}", args.output.display()))?;
    eprintln!(
        "Preview {}x{} written to {} ({} bytes)",
        payload.width,
        payload.height,
        args.output.display(),
        payload.png.len(),
    );
    Ok(())
}

fn run_regions(args: &RegionsArgs) -> Result<(), String> {
    let photo = grayscale::decode_rgb(&read(&args.photo)?)
        .map_err(|e| format!("Error decoding {}: {e}", args.photo.display()))?;
    let regions = etchdepth_pipeline::detect_text_regions(&grayscale::luma(&photo));
    let json = serde_json::to_string_pretty(&regions)
        .map_err(|e| format!("Error serializing regions: {e}"))?;
    println!("{json}");
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match &cli.command {
        Command::Export(args) => run_export(args),
        Command::Preview(args) => run_preview(args),
        Command::Regions(args) => run_regions(args),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}
