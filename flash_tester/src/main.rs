use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use flash_guard::parallel_pipeline::DEFAULT_QUEUE_DEPTH;
use flash_guard::{FlashConfig, FlashPipeline, Frame, FrameShape, ParallelPipeline, Report};
use image::imageops::{self, FilterType};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tif"];

/// Replays an image sequence through the flash detector.
#[derive(Debug, Parser)]
#[command(name = "flash_tester", version)]
struct Args {
    /// Directory of frames, analyzed in file-name order.
    input_dir: PathBuf,
    /// Capture rate used to timestamp the frames.
    #[arg(long, default_value_t = 30.0)]
    fps: f64,
    /// TOML file with detector options.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the configured downscale factor.
    #[arg(long)]
    downscale: Option<f64>,
    /// Saves the frame that starts each flashing run as PNG here.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_QUEUE_DEPTH)]
    queue_depth: usize,
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Exit with status 2 when any flashing was detected.
    #[arg(long)]
    fail_on_flash: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    if !(args.fps.is_finite() && args.fps > 0.0) {
        bail!("--fps must be greater than zero");
    }
    let config = load_config(&args)?;
    let frames = list_frames(&args.input_dir)?;
    let first = frames
        .first()
        .with_context(|| format!("no images found in {}", args.input_dir.display()))?;
    let (capture_width, capture_height) = image::image_dimensions(first)
        .with_context(|| format!("unable to read {}", first.display()))?;

    let pipeline = FlashPipeline::for_capture(config, capture_width, capture_height)?;
    let shape = pipeline.shape().context("pipeline has no working shape")?;
    info!(
        frames = frames.len(),
        capture = %FrameShape::new(capture_width as usize, capture_height as usize),
        working = %shape,
        "Starting replay"
    );

    if let Some(dir) = &args.snapshot_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("unable to create snapshot directory {}", dir.display()))?;
    }

    let (mut feeder, mut outcomes) = ParallelPipeline::spawn_with(pipeline, args.queue_depth);
    let fps = args.fps;
    let producer = tokio::task::spawn_blocking(move || -> Result<u64> {
        let mut submitted = 0;
        for (index, path) in frames.iter().enumerate() {
            let frame = load_frame(path, shape)?;
            let timestamp = Duration::from_secs_f64(index as f64 / fps);
            feeder.blocking_submit(frame, timestamp)?;
            submitted += 1;
        }
        Ok(submitted)
    });

    let mut in_flash_run = false;
    let mut snapshots = 0usize;
    while let Some(outcome) = outcomes.next_outcome().await {
        match &outcome.report {
            Ok(Report::Analyzed(verdict)) if verdict.flashing => {
                if !in_flash_run {
                    info!(
                        frame = outcome.sequence,
                        at_seconds = outcome.timestamp.as_secs_f64(),
                        luminance_pixels = verdict.luminance_pixels,
                        red_pixels = verdict.red_pixels,
                        "Flashing run started"
                    );
                    if let Some(dir) = &args.snapshot_dir {
                        save_snapshot(dir, outcome.sequence, &outcome.frame)?;
                        snapshots += 1;
                    }
                }
                in_flash_run = true;
            }
            Ok(Report::Analyzed(_)) => {
                if in_flash_run {
                    info!(frame = outcome.sequence, "Flashing run ended");
                }
                in_flash_run = false;
            }
            Ok(Report::Priming { .. }) => {}
            Err(err) => warn!(frame = outcome.sequence, error = %err, "Frame dropped"),
        }
    }

    let submitted = producer.await.context("frame reader panicked")??;
    let stats = outcomes.finish().await?;
    info!(
        submitted,
        seen = stats.frames_seen,
        rejected = stats.frames_rejected,
        verdicts = stats.verdicts,
        flashing_verdicts = stats.flashing_verdicts,
        snapshots,
        "Replay complete"
    );

    if args.fail_on_flash && stats.flashing_verdicts > 0 {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to create log filter")?;
    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!("tracing init error: {err}"))?;
    Ok(())
}

fn load_config(args: &Args) -> Result<FlashConfig> {
    let mut config = match &args.config {
        Some(path) => FlashConfig::from_file(path)
            .with_context(|| format!("unable to load config {}", path.display()))?,
        None => FlashConfig::default(),
    };
    if let Some(downscale) = args.downscale {
        config.downscale_factor = downscale;
    }
    config.validate()?;
    Ok(config)
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("unable to read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_image {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// Decodes an image and resizes it to the working resolution.
fn load_frame(path: &Path, shape: FrameShape) -> Result<Frame> {
    let rgb = image::open(path)
        .with_context(|| format!("unable to decode {}", path.display()))?
        .to_rgb8();
    let (width, height) = (shape.width as u32, shape.height as u32);
    let rgb = if rgb.dimensions() == (width, height) {
        rgb
    } else {
        imageops::resize(&rgb, width, height, FilterType::Triangle)
    };
    Ok(Frame::try_from(rgb)?)
}

fn save_snapshot(dir: &Path, sequence: u64, frame: &Frame) -> Result<()> {
    let path = dir.join(format!("flash_{sequence:06}.png"));
    frame
        .save(&path)
        .with_context(|| format!("unable to save {}", path.display()))
}
