//! plotline-bench: run one image through the plotline job service.
//!
//! Submits the image with parameters assembled from the command line,
//! runs the job, prints per-stage diagnostics, and writes every exported
//! format next to each other in the output directory. Useful for:
//!
//! - Comparing providers (`--line-extract dog`, `--vectorize contour_trace`)
//! - Tuning edge thresholds and optimize tolerances
//! - Measuring per-stage durations to identify bottlenecks
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin plotline-bench -- --width 210 --height 297 --line-width 0.3 <IMAGE_PATH>
//! ```
//!
//! Logging follows `RUST_LOG` (default `warn`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use plotline_jobs::{JobRecord, JobService, JobStatus, ServiceConfig};
use plotline_pipeline::{ExportFormat, Preset, ProcessingParams};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

type Params = ProcessingParams;

/// Turn a photograph into plotter-ready line art and report how each
/// stage behaved.
#[derive(Parser)]
#[command(name = "plotline-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Canvas width in millimetres.
    #[arg(long)]
    width: f64,

    /// Canvas height in millimetres.
    #[arg(long)]
    height: f64,

    /// Pen stroke width in millimetres.
    #[arg(long)]
    line_width: f64,

    /// Start from a named preset (portrait, animal); knob flags are ignored.
    #[arg(long)]
    preset: Option<Preset>,

    /// Whiten the background connected to the image border.
    #[arg(long)]
    isolate_subject: bool,

    /// Long-axis size of the working raster, in pixels.
    #[arg(long, default_value_t = Params::DEFAULT_MAX_DIMENSION)]
    max_dimension: u32,

    /// Edge detector low threshold.
    #[arg(long, default_value_t = Params::DEFAULT_EDGE_LOW)]
    edge_low: f32,

    /// Edge detector high threshold.
    #[arg(long, default_value_t = Params::DEFAULT_EDGE_HIGH)]
    edge_high: f32,

    /// Minimum traced path length, in pixels.
    #[arg(long, default_value_t = Params::DEFAULT_PATHOMIT)]
    pathomit: u32,

    /// Endpoint distance for joining paths, in millimetres.
    #[arg(long, default_value_t = Params::DEFAULT_MERGE_TOLERANCE_MM)]
    merge_tolerance: f64,

    /// Maximum simplification deviation, in millimetres.
    #[arg(long, default_value_t = Params::DEFAULT_SIMPLIFY_TOLERANCE_MM)]
    simplify_tolerance: f64,

    /// Distance under which two paths count as duplicates, in millimetres.
    #[arg(long, default_value_t = Params::DEFAULT_DEDUPE_TOLERANCE_MM)]
    dedupe_tolerance: f64,

    /// Stretch to fill the canvas instead of keeping the aspect ratio.
    #[arg(long)]
    stretch: bool,

    /// Fill dark regions with hatch lines.
    #[arg(long)]
    hatch: bool,

    /// Hatch spacing as a multiple of the line width.
    #[arg(long, default_value_t = Params::DEFAULT_HATCH_DENSITY)]
    hatch_density: f64,

    /// Hatch angle in degrees, counter-clockwise.
    #[arg(long, default_value_t = Params::DEFAULT_HATCH_ANGLE_DEG)]
    hatch_angle: f64,

    /// Tones below this are hatched.
    #[arg(long, default_value_t = Params::DEFAULT_DARKNESS_THRESHOLD)]
    darkness_threshold: u8,

    /// Tones below this are crosshatched; 0 disables.
    #[arg(long, default_value_t = Params::DEFAULT_CROSSHATCH_THRESHOLD)]
    crosshatch_threshold: u8,

    /// Preferred LineExtract provider (bilateral_canny, dog).
    #[arg(long)]
    line_extract: Option<String>,

    /// Preferred Vectorize provider (skeleton_trace, contour_trace).
    #[arg(long)]
    vectorize: Option<String>,

    /// Formats to write (svg, hpgl, gcode); defaults to all.
    #[arg(long = "format", value_delimiter = ',')]
    formats: Vec<ExportFormat>,

    /// Directory to write outputs into.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Output file stem; defaults to the image file stem.
    #[arg(long)]
    stem: Option<String>,

    /// Print the job record as JSON instead of the report.
    #[arg(long)]
    json: bool,

    /// Full processing parameters as a JSON string.
    ///
    /// When provided, all other parameter flags are ignored.
    #[arg(long)]
    params_json: Option<String>,

    /// Service configuration file (JSON).
    #[arg(long)]
    service_config: Option<PathBuf>,
}

/// Build [`ProcessingParams`] from CLI arguments.
fn params_from_cli(cli: &Cli) -> Result<ProcessingParams, String> {
    if let Some(ref json) = cli.params_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --params-json: {e}"));
    }

    let mut params = if let Some(preset) = cli.preset {
        ProcessingParams::preset(preset, cli.width, cli.height, cli.line_width)
    } else {
        ProcessingParams {
            isolate_subject: cli.isolate_subject,
            max_dimension: cli.max_dimension,
            edge_low: cli.edge_low,
            edge_high: cli.edge_high,
            pathomit: cli.pathomit,
            merge_tolerance_mm: cli.merge_tolerance,
            simplify_tolerance_mm: cli.simplify_tolerance,
            dedupe_tolerance_mm: cli.dedupe_tolerance,
            preserve_aspect: !cli.stretch,
            hatching_enabled: cli.hatch,
            hatch_density: cli.hatch_density,
            hatch_angle_deg: cli.hatch_angle,
            darkness_threshold: cli.darkness_threshold,
            crosshatch_threshold: cli.crosshatch_threshold,
            ..ProcessingParams::new(cli.width, cli.height, cli.line_width)
        }
    };

    if let Some(ref name) = cli.line_extract {
        params.providers.line_extract = vec![name.clone()];
    }
    if let Some(ref name) = cli.vectorize {
        params.providers.vectorize = vec![name.clone()];
    }
    if !cli.formats.is_empty() {
        params.export_formats.clone_from(&cli.formats);
    }
    Ok(params)
}

fn init_tracing() -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .map_err(|e| format!("Failed to create env filter: {e}"))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(env_filter)
        .try_init()
        .map_err(|e| format!("Failed to initialize tracing: {e}"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(msg) = init_tracing() {
        eprintln!("{msg}");
        return ExitCode::FAILURE;
    }

    let params = match params_from_cli(&cli) {
        Ok(p) => p,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let config = match cli.service_config {
        Some(ref path) => match ServiceConfig::from_json_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => ServiceConfig::default(),
    };

    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Image: {} ({} bytes)",
        cli.image_path.display(),
        image_bytes.len(),
    );
    eprintln!("Params: {params:#?}");
    eprintln!();

    let service = JobService::new(config);
    eprintln!("Device: {}", service.device());

    let id = match service.submit(image_bytes, params) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Rejected: {e}");
            return ExitCode::FAILURE;
        }
    };
    let record = match service.run(id).await {
        Ok(record) => record,
        Err(e) => {
            eprintln!("Job error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&record) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing job record: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_report(&record);
    }

    if record.status != JobStatus::Completed {
        return ExitCode::FAILURE;
    }

    let stem = cli.stem.clone().unwrap_or_else(|| {
        cli.image_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("plotline")
            .to_owned()
    });
    let formats = record
        .result
        .as_ref()
        .map(|r| r.formats.clone())
        .unwrap_or_default();
    let mut ok = true;
    for format in formats {
        match service.get_result(id, format) {
            Ok(text) => ok &= write_output(&cli.out_dir, &stem, format, &text),
            Err(e) => {
                eprintln!("Error fetching {format}: {e}");
                ok = false;
            }
        }
    }

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_report(record: &JobRecord) {
    println!("Job {} {}", record.id, record.status);
    if let Some(ref error) = record.error {
        println!("Error: {error}");
        if let Some(stage) = error.stage {
            println!("Stage: {stage}");
        }
        if let Some(ref provider) = error.provider {
            println!("Provider: {provider}");
        }
        return;
    }
    let Some(ref result) = record.result else {
        return;
    };
    println!("{}", result.diagnostics.report());
    println!();
    let stats = &result.stats;
    println!("Result: {}", result.result_ref);
    println!("Paths: {}  Points: {}", stats.path_count, stats.point_count);
    println!(
        "Drawn: {:.1}mm  Travel: {:.1}mm  Size: {:.1}x{:.1}mm",
        stats.total_length_mm, stats.travel_length_mm, stats.width_mm, stats.height_mm,
    );
}

fn write_output(dir: &Path, stem: &str, format: ExportFormat, text: &str) -> bool {
    let path = dir.join(format!("{stem}.{}", format.extension()));
    match std::fs::write(&path, text) {
        Ok(()) => {
            eprintln!("{} written to {} ({} bytes)", format, path.display(), text.len());
            true
        }
        Err(e) => {
            eprintln!("Error writing {}: {e}", path.display());
            false
        }
    }
}
