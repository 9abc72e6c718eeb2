use anyhow::Result;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::esrgan::EsrganUpscaler;
use crate::extract::{self, FrameExtraction};
use crate::probe;
use crate::progress::{self, ProgressHandle, ProgressReporter};
use crate::reassemble::{self, EncodeStatus};
use crate::upscale::{self, LanczosUpscaler, UpscaleReport};
use crate::util;

#[derive(Debug)]
pub enum RunOutcome {
    /// Stage 1 failed: nothing else ran and the work dir was left in place.
    ExtractionFailed { reason: String },
    Completed(Box<RunSummary>),
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub input: PathBuf,
    pub output: PathBuf,
    pub frame_count: usize,
    pub frame_rate: String,
    pub source_dims: Option<(u32, u32)>,
    pub audio: bool,
    pub upscale: UpscaleReport,
    pub encode: EncodeStatus,
    pub work_dir_bytes: u64,
    pub input_bytes: Option<u64>,
    pub output_bytes: Option<u64>,
    pub elapsed: Duration,
    pub warnings: Vec<String>,
}

impl RunSummary {
    /// The output existing on disk is the only success signal.
    pub fn succeeded(&self) -> bool {
        self.output_bytes.is_some()
    }
}

struct StageResults {
    frame_rate: String,
    source_dims: Option<(u32, u32)>,
    audio: bool,
    upscale: UpscaleReport,
    encode: EncodeStatus,
}

/// Runs extract -> probe -> upscale -> reassemble -> cleanup, strictly in order.
pub fn run(cfg: &PipelineConfig) -> Result<RunOutcome> {
    cfg.validate()?;
    let started = Instant::now();
    // Counts frames; the stage text carries the position in the pipeline.
    let reporter = ProgressReporter::new("upscale", "frames", 0, cfg.progress);
    let handle = reporter.handle();

    handle.set_stage("[1/5] extracting frames");
    let frames = match extract::extract_frames(cfg, &handle)? {
        FrameExtraction::Extracted { frames } => frames,
        FrameExtraction::Failed { reason } => {
            handle.warn(format!("frame extraction failed: {}", reason));
            reporter.finish("aborted");
            return Ok(RunOutcome::ExtractionFailed { reason });
        }
    };
    handle.log(format!("Extracted {} frames", frames.len()));

    let staged = run_remaining_stages(cfg, &frames, &handle);

    handle.set_stage("[5/5] cleaning up");
    let work_dir_bytes = util::dir_size_bytes(&cfg.work_dir);
    util::remove_dir_quiet(&cfg.work_dir);

    let staged = staged?;
    let output_bytes = util::file_size(&cfg.output);
    let outcome = reporter.finish(if output_bytes.is_some() {
        "output written"
    } else {
        "output missing"
    });

    Ok(RunOutcome::Completed(Box::new(RunSummary {
        input: cfg.input.clone(),
        output: cfg.output.clone(),
        frame_count: frames.len(),
        frame_rate: staged.frame_rate,
        source_dims: staged.source_dims,
        audio: staged.audio,
        upscale: staged.upscale,
        encode: staged.encode,
        work_dir_bytes,
        input_bytes: util::file_size(&cfg.input),
        output_bytes,
        elapsed: started.elapsed(),
        warnings: outcome.warnings,
    })))
}

fn run_remaining_stages(
    cfg: &PipelineConfig,
    frames: &[PathBuf],
    handle: &ProgressHandle,
) -> Result<StageResults> {
    handle.set_stage("[2/5] reading metadata");
    let meta = probe::probe_video(cfg, handle);
    handle.log(format!(
        "Frame rate: {}",
        if meta.frame_rate.is_empty() {
            "unknown"
        } else {
            meta.frame_rate.as_str()
        }
    ));
    let audio = probe::extract_audio(cfg, handle);
    handle.log(if audio.is_some() {
        "Audio track extracted"
    } else {
        "No audio track"
    });

    handle.set_total(frames.len() as u64);
    handle.set_stage(format!("[3/5] upscaling {} frames ({}x)", frames.len(), cfg.scale));
    let upscale_started = Instant::now();
    let mut primary = EsrganUpscaler::from_config(cfg);
    let mut fallback = LanczosUpscaler::new(&cfg.tools.ffmpeg);
    let report = upscale::upscale_frames(
        frames,
        &cfg.upscaled_dir(),
        cfg.scale,
        cfg.backend,
        &mut primary,
        &mut fallback,
        handle,
    )?;
    handle.log(format!(
        "Upscaled {}/{} frames with {} in {}",
        report.produced,
        report.total,
        report.backend,
        progress::format_duration(upscale_started.elapsed())
    ));

    handle.set_stage("[4/5] reassembling video");
    let encode = reassemble::reassemble(cfg, &meta.frame_rate, audio.as_deref(), handle)?;

    Ok(StageResults {
        source_dims: meta.width.zip(meta.height),
        frame_rate: meta.frame_rate,
        audio: audio.is_some(),
        upscale: report,
        encode,
    })
}
