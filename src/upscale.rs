//! Stage 3: per-frame upscaling with a whole-batch fallback.
//!
//! The primary backend runs first. Any error, whether while preparing or on
//! any single frame, abandons it and the fallback then reprocesses every
//! frame from the first one, overwriting what the primary already wrote.
//! Fallback failures are per frame and never abort the batch.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::BackendChoice;
use crate::progress::ProgressHandle;
use crate::util;

pub trait FrameUpscaler {
    fn name(&self) -> &'static str;

    /// One-time setup before the first frame (weights, tool checks).
    fn prepare(&mut self, _progress: &ProgressHandle) -> Result<()> {
        Ok(())
    }

    /// Writes `src` enlarged by `scale` in both dimensions to `dst`.
    fn upscale(&mut self, src: &Path, dst: &Path, scale: u32) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct UpscaleReport {
    pub backend: &'static str,
    /// Why the primary backend was abandoned, when it was.
    pub fallback_reason: Option<String>,
    pub total: usize,
    pub produced: usize,
    pub failed: Vec<PathBuf>,
}

pub fn upscale_frames(
    frames: &[PathBuf],
    out_dir: &Path,
    scale: u32,
    choice: BackendChoice,
    primary: &mut dyn FrameUpscaler,
    fallback: &mut dyn FrameUpscaler,
    progress: &ProgressHandle,
) -> Result<UpscaleReport> {
    util::remove_dir_quiet(out_dir);
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {:?}", out_dir))?;

    if frames.is_empty() {
        progress.warn("no frames to upscale");
        return Ok(UpscaleReport {
            backend: "none",
            fallback_reason: None,
            total: 0,
            produced: 0,
            failed: vec![],
        });
    }

    let mut fallback_reason = None;
    if choice != BackendChoice::Lanczos {
        progress.set_stage(format!("upscaling with {}", primary.name()));
        match run_primary(frames, out_dir, scale, primary, progress) {
            Ok(()) => {
                return Ok(UpscaleReport {
                    backend: primary.name(),
                    fallback_reason: None,
                    total: frames.len(),
                    produced: count_outputs(frames, out_dir),
                    failed: vec![],
                });
            }
            Err(err) if choice == BackendChoice::Esrgan => return Err(err),
            Err(err) => {
                let reason = util::truncate_chars(&format!("{:#}", err), util::ERROR_SNIPPET_CHARS);
                progress.warn(format!("{} error: {}", primary.name(), reason));
                progress.log(format!(
                    "Falling back to {} upscaling for all {} frames",
                    fallback.name(),
                    frames.len()
                ));
                fallback_reason = Some(reason);
                progress.reset();
            }
        }
    }

    progress.set_stage(format!("upscaling with {}", fallback.name()));
    let failed = run_fallback(frames, out_dir, scale, fallback, progress);

    Ok(UpscaleReport {
        backend: fallback.name(),
        fallback_reason,
        total: frames.len(),
        produced: count_outputs(frames, out_dir),
        failed,
    })
}

fn run_primary(
    frames: &[PathBuf],
    out_dir: &Path,
    scale: u32,
    primary: &mut dyn FrameUpscaler,
    progress: &ProgressHandle,
) -> Result<()> {
    primary.prepare(progress)?;
    for src in frames {
        let dst = output_path(src, out_dir)?;
        primary
            .upscale(src, &dst, scale)
            .with_context(|| format!("frame {:?}", src.file_name().unwrap_or_default()))?;
        progress.inc(1);
    }
    Ok(())
}

fn run_fallback(
    frames: &[PathBuf],
    out_dir: &Path,
    scale: u32,
    fallback: &mut dyn FrameUpscaler,
    progress: &ProgressHandle,
) -> Vec<PathBuf> {
    let mut failed = vec![];
    for src in frames {
        // A frame the primary already wrote must not survive a failed retry.
        let result = output_path(src, out_dir).and_then(|dst| {
            let _ = std::fs::remove_file(&dst);
            fallback.upscale(src, &dst, scale)
        });
        if let Err(err) = result {
            progress.warn(util::truncate_chars(
                &format!("{} skipped {:?}: {:#}", fallback.name(), src, err),
                util::ERROR_SNIPPET_CHARS,
            ));
            failed.push(src.clone());
        }
        progress.inc(1);
    }
    failed
}

/// Upscaled frames keep the extracted file name so reassembly timing holds.
fn output_path(src: &Path, out_dir: &Path) -> Result<PathBuf> {
    match src.file_name() {
        Some(name) => Ok(out_dir.join(name)),
        None => bail!("frame path {:?} has no file name", src),
    }
}

fn count_outputs(frames: &[PathBuf], out_dir: &Path) -> usize {
    frames
        .iter()
        .filter_map(|src| output_path(src, out_dir).ok())
        .filter(|dst| dst.is_file())
        .count()
}

/// Classical fallback: ffmpeg lanczos resize plus a fixed unsharp mask.
pub struct LanczosUpscaler {
    ffmpeg: PathBuf,
}

impl LanczosUpscaler {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    pub fn command(&self, src: &Path, dst: &Path, scale: u32) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(src)
            .arg("-vf")
            .arg(lanczos_filter(scale))
            .arg(dst);
        cmd
    }
}

pub fn lanczos_filter(scale: u32) -> String {
    format!(
        "scale=iw*{s}:ih*{s}:flags=lanczos,unsharp=5:5:1.0:5:5:0.0",
        s = scale
    )
}

impl FrameUpscaler for LanczosUpscaler {
    fn name(&self) -> &'static str {
        "lanczos"
    }

    fn upscale(&mut self, src: &Path, dst: &Path, scale: u32) -> Result<()> {
        let output = util::run_tool(&mut self.command(src, dst, scale))?;
        if !output.status.success() {
            bail!("ffmpeg: {}", util::failure_snippet(&output));
        }
        Ok(())
    }
}
