//! Stage 2: source frame rate and audio track.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::PipelineConfig;
use crate::progress::ProgressHandle;
use crate::util;

/// `ffprobe -of json -show_entries stream=...` output.
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    /// e.g. "30/1" or "30000/1001"
    r_frame_rate: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoMetadata {
    /// Raw ffprobe value, passed to the encoder verbatim. Empty when unknown.
    pub frame_rate: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

pub fn probe_command(cfg: &PipelineConfig) -> Command {
    let mut cmd = Command::new(&cfg.tools.ffprobe);
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=r_frame_rate,width,height",
        "-of",
        "json",
    ])
    .arg(&cfg.input);
    cmd
}

pub fn parse_probe_json(json: &str) -> Result<VideoMetadata> {
    let parsed: ProbeOutput =
        serde_json::from_str(json).context("failed to parse ffprobe output")?;
    let Some(stream) = parsed.streams.into_iter().next() else {
        bail!("ffprobe reported no video stream");
    };
    Ok(VideoMetadata {
        frame_rate: stream.r_frame_rate.unwrap_or_default().trim().to_string(),
        width: stream.width,
        height: stream.height,
    })
}

/// Queries the first video stream. The frame rate is neither parsed nor
/// validated; a failed probe yields empty metadata and a warning.
pub fn probe_video(cfg: &PipelineConfig, progress: &ProgressHandle) -> VideoMetadata {
    let mut cmd = probe_command(cfg);
    let metadata = util::run_tool(&mut cmd).and_then(|output| {
        if !output.status.success() {
            bail!("ffprobe failed: {}", util::failure_snippet(&output));
        }
        parse_probe_json(&String::from_utf8_lossy(&output.stdout))
    });

    match metadata {
        Ok(meta) => meta,
        Err(err) => {
            progress.warn(util::truncate_chars(
                &format!("frame rate unavailable: {:#}", err),
                util::ERROR_SNIPPET_CHARS,
            ));
            VideoMetadata::default()
        }
    }
}

pub fn extract_audio_command(cfg: &PipelineConfig) -> Command {
    let mut cmd = Command::new(&cfg.tools.ffmpeg);
    cmd.arg("-hide_banner")
        .arg("-y")
        .arg("-i")
        .arg(&cfg.input)
        .arg("-vn")
        .arg("-acodec")
        .arg("copy")
        .arg(cfg.audio_path());
    cmd
}

/// Stream-copies the audio track. Failure is tolerated; whether audio exists
/// is decided only by the size of the file left behind.
pub fn extract_audio(cfg: &PipelineConfig, progress: &ProgressHandle) -> Option<PathBuf> {
    let audio_path = cfg.audio_path();
    let _ = std::fs::remove_file(&audio_path);

    let mut cmd = extract_audio_command(cfg);
    progress.set_operation_status("ffmpeg", "extracting audio");
    match util::run_tool(&mut cmd) {
        Ok(output) if !output.status.success() => {
            progress.log(format!("no audio extracted: {}", util::failure_snippet(&output)));
        }
        Err(err) => progress.warn(format!("audio extraction skipped: {:#}", err)),
        Ok(_) => {}
    }
    progress.clear_operation("ffmpeg", None);
    detect_audio(&audio_path)
}

pub fn detect_audio(path: &Path) -> Option<PathBuf> {
    match util::file_size(path) {
        Some(len) if len > 0 => Some(path.to_path_buf()),
        _ => None,
    }
}
