mod config;
mod esrgan;
mod extract;
mod pipeline;
mod probe;
mod progress;
mod reassemble;
mod upscale;
mod util;
mod weights;

use anyhow::{Context, Result};
use clap::Parser;
use config::{BackendChoice, PipelineConfig};
use indicatif::HumanBytes;
use pipeline::{RunOutcome, RunSummary};
use progress::{ProgressConfig, ProgressMode};
use reassemble::EncodeStatus;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "vidupscale",
    version,
    about = "Upscale a video: extract frames, super-resolve them (Real-ESRGAN, lanczos fallback), reassemble with audio"
)]
struct Cli {
    /// Source video
    input: PathBuf,

    /// Output video. Default: <input stem>_upscaled.mp4 next to the input.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Integer scale factor applied to width and height.
    #[arg(long, default_value_t = config::DEFAULT_SCALE)]
    scale: u32,

    /// Working directory for frames, audio and (by default) model weights. Removed after the run.
    #[arg(long, default_value = config::DEFAULT_WORK_DIR)]
    work_dir: PathBuf,

    /// Upscaling backend: auto (model, lanczos on any failure), esrgan (model only), lanczos.
    #[arg(long, value_enum, default_value_t = BackendChoice::Auto)]
    backend: BackendChoice,

    /// Super-resolution executable.
    #[arg(long, default_value = config::DEFAULT_MODEL_BIN)]
    model_bin: PathBuf,

    /// Directory caching the model weights. Default: <work-dir>/models.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Archive to fetch the model weights from when they are not cached.
    #[arg(long, default_value = config::DEFAULT_MODEL_URL)]
    model_url: String,

    /// Expected sha256 of the weights archive. Unverified when omitted.
    #[arg(long)]
    model_sha256: Option<String>,

    /// Tile size for model inference; bounds memory per frame.
    #[arg(long, default_value_t = 256)]
    tile: u32,

    /// x264 constant rate factor for the output.
    #[arg(long, default_value_t = 18)]
    crf: u32,

    /// x264 preset for the output.
    #[arg(long, default_value = "slow")]
    preset: String,

    /// ffmpeg executable.
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// ffprobe executable.
    #[arg(long, default_value = "ffprobe")]
    ffprobe: PathBuf,

    /// Progress display mode: auto (TTY-aware), rich, plain, quiet.
    #[arg(long, value_enum, default_value_t = ProgressMode::Auto)]
    progress: ProgressMode,
}

impl Cli {
    fn into_config(self) -> PipelineConfig {
        let mut cfg = PipelineConfig::new(self.input);
        if let Some(output) = self.output {
            cfg.output = output;
        }
        cfg.scale = self.scale;
        cfg.work_dir = self.work_dir;
        cfg.backend = self.backend;
        cfg.model.executable = self.model_bin;
        cfg.model.dir = self.model_dir;
        cfg.model.url = self.model_url;
        cfg.model.sha256 = self.model_sha256;
        cfg.model.tile = self.tile;
        cfg.encode.crf = self.crf;
        cfg.encode.preset = self.preset;
        cfg.tools.ffmpeg = self.ffmpeg;
        cfg.tools.ffprobe = self.ffprobe;
        cfg.progress = ProgressConfig::new(self.progress);
        cfg
    }
}

fn main() -> Result<()> {
    let cfg = Cli::parse().into_config();
    cfg.validate().context("invalid arguments")?;

    print_banner(&cfg);
    match pipeline::run(&cfg)? {
        RunOutcome::ExtractionFailed { reason } => {
            println!("Frame extraction failed: {}", reason);
            println!("Aborted; working directory left at {}", cfg.work_dir.display());
        }
        RunOutcome::Completed(summary) => {
            print_run_summary(&summary);
            print_result(&summary);
        }
    }
    Ok(())
}

fn print_banner(cfg: &PipelineConfig) {
    println!("{}", "=".repeat(50));
    println!("  VIDEO UPSCALER ({}x, backend={:?})", cfg.scale, cfg.backend);
    println!("{}", "=".repeat(50));
}

fn print_run_summary(summary: &RunSummary) {
    println!(
        "Upscale summary: input={} output={} frames={} source={} frame_rate={} audio={} backend={} produced={}/{} skipped={} fallback_reason={} encode={} original_mb={:.1} upscaled_mb={} work_dir_peak={} duration={} warnings={}",
        summary.input.display(),
        summary.output.display(),
        summary.frame_count,
        summary
            .source_dims
            .map(|(w, h)| format!("{}x{}", w, h))
            .unwrap_or_else(|| "-".to_string()),
        if summary.frame_rate.is_empty() {
            "-"
        } else {
            summary.frame_rate.as_str()
        },
        summary.audio,
        summary.upscale.backend,
        summary.upscale.produced,
        summary.upscale.total,
        summary.upscale.failed.len(),
        summary.upscale.fallback_reason.as_deref().unwrap_or("-"),
        match &summary.encode {
            EncodeStatus::Ok => "ok",
            EncodeStatus::Failed(_) => "failed",
        },
        summary.input_bytes.map(util::bytes_to_mb).unwrap_or(0.0),
        summary
            .output_bytes
            .map(|b| format!("{:.1}", util::bytes_to_mb(b)))
            .unwrap_or_else(|| "-".to_string()),
        HumanBytes(summary.work_dir_bytes),
        progress::format_duration(summary.elapsed),
        summary.warnings.len(),
    );
    for warning in &summary.warnings {
        println!("  warning: {}", warning);
    }
}

fn print_result(summary: &RunSummary) {
    match summary.output_bytes {
        Some(output_bytes) if summary.succeeded() => {
            let original_mb = summary.input_bytes.map(util::bytes_to_mb).unwrap_or(0.0);
            println!("{}", "=".repeat(50));
            println!("  SUCCESS!");
            println!("{}", "=".repeat(50));
            println!("  Original: {} ({:.1} MB)", summary.input.display(), original_mb);
            println!(
                "  Upscaled: {} ({:.1} MB)",
                summary.output.display(),
                util::bytes_to_mb(output_bytes)
            );
            println!("{}", "=".repeat(50));
        }
        _ => println!("ERROR: output file not created: {}", summary.output.display()),
    }
}
