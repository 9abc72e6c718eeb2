use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Command;

use crate::config::PipelineConfig;
use crate::progress::ProgressHandle;
use crate::util;

#[derive(Debug, Clone)]
pub enum FrameExtraction {
    /// Frames found on disk after ffmpeg returned; the count is not
    /// cross-checked against ffmpeg's own report.
    Extracted { frames: Vec<PathBuf> },
    Failed { reason: String },
}

pub fn extract_frames_command(cfg: &PipelineConfig) -> Command {
    let mut cmd = Command::new(&cfg.tools.ffmpeg);
    cmd.arg("-hide_banner")
        .arg("-y")
        .arg("-i")
        .arg(&cfg.input)
        .arg("-qscale:v")
        .arg(cfg.encode.extract_quality.to_string())
        .arg(cfg.frames_dir().join(util::FRAME_PATTERN));
    cmd
}

/// Decodes every frame of the input into `frames/frame_NNNNNN.png`.
pub fn extract_frames(cfg: &PipelineConfig, progress: &ProgressHandle) -> Result<FrameExtraction> {
    let frames_dir = cfg.frames_dir();
    // Leftovers from an aborted run would inflate the frame count.
    util::remove_dir_quiet(&frames_dir);
    std::fs::create_dir_all(&frames_dir)
        .with_context(|| format!("failed to create {:?}", frames_dir))?;

    let mut cmd = extract_frames_command(cfg);
    progress.set_operation_status("ffmpeg", "extracting frames");
    progress.log(format!("Extracting: {}", util::describe_command(&cmd)));

    let output = match util::run_tool(&mut cmd) {
        Ok(output) => output,
        Err(err) => {
            progress.clear_operation("ffmpeg", None);
            return Ok(FrameExtraction::Failed {
                reason: util::truncate_chars(&format!("{:#}", err), util::ERROR_SNIPPET_CHARS),
            });
        }
    };
    progress.clear_operation("ffmpeg", None);

    if !output.status.success() {
        return Ok(FrameExtraction::Failed {
            reason: util::failure_snippet(&output),
        });
    }

    let frames = util::list_frames(&frames_dir)?;
    Ok(FrameExtraction::Extracted { frames })
}
