use anyhow::Result;
use std::path::Path;
use std::process::Command;

use crate::config::PipelineConfig;
use crate::progress::ProgressHandle;
use crate::util;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeStatus {
    Ok,
    /// Encoder exited nonzero; tolerated, the output check decides success.
    Failed(String),
}

/// Builds the encode command; audio is muxed (cut to the shorter stream)
/// exactly when `audio` is given.
pub fn reassemble_command(cfg: &PipelineConfig, frame_rate: &str, audio: Option<&Path>) -> Command {
    let mut cmd = Command::new(&cfg.tools.ffmpeg);
    cmd.arg("-hide_banner").arg("-y");
    if !frame_rate.is_empty() {
        cmd.arg("-framerate").arg(frame_rate);
    }
    cmd.arg("-i").arg(cfg.upscaled_dir().join(util::FRAME_PATTERN));
    if let Some(audio) = audio {
        cmd.arg("-i").arg(audio);
    }
    cmd.arg("-c:v")
        .arg("libx264")
        .arg("-preset")
        .arg(&cfg.encode.preset)
        .arg("-crf")
        .arg(cfg.encode.crf.to_string())
        .arg("-pix_fmt")
        .arg("yuv420p");
    if audio.is_some() {
        cmd.arg("-c:a").arg("aac").arg("-shortest");
    }
    cmd.arg(&cfg.output);
    cmd
}

pub fn reassemble(
    cfg: &PipelineConfig,
    frame_rate: &str,
    audio: Option<&Path>,
    progress: &ProgressHandle,
) -> Result<EncodeStatus> {
    if let Some(parent) = cfg.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut cmd = reassemble_command(cfg, frame_rate, audio);
    let desc = if audio.is_some() {
        "encoding with audio"
    } else {
        "encoding video"
    };
    progress.set_operation_status("ffmpeg", desc);
    progress.log(format!("Reassembling: {}", util::describe_command(&cmd)));
    let output = util::run_tool(&mut cmd);
    progress.clear_operation("ffmpeg", None);

    let status = match output {
        Ok(output) if output.status.success() => EncodeStatus::Ok,
        Ok(output) => EncodeStatus::Failed(util::failure_snippet(&output)),
        Err(err) => EncodeStatus::Failed(util::truncate_chars(
            &format!("{:#}", err),
            util::ERROR_SNIPPET_CHARS,
        )),
    };
    if let EncodeStatus::Failed(reason) = &status {
        progress.warn(format!("encoder error: {}", reason));
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    fn cfg() -> PipelineConfig {
        let mut cfg = PipelineConfig::new("in.mp4");
        cfg.work_dir = PathBuf::from("w");
        cfg.output = PathBuf::from("out put.mp4");
        cfg
    }

    #[test]
    fn video_only_command_has_no_audio_input() {
        let args = args_of(&reassemble_command(&cfg(), "30000/1001", None));
        assert_eq!(
            args,
            vec![
                "-hide_banner",
                "-y",
                "-framerate",
                "30000/1001",
                "-i",
                "w/upscaled/frame_%06d.png",
                "-c:v",
                "libx264",
                "-preset",
                "slow",
                "-crf",
                "18",
                "-pix_fmt",
                "yuv420p",
                "out put.mp4",
            ]
        );
    }

    #[test]
    fn audio_command_muxes_and_truncates_to_shortest() {
        let audio = PathBuf::from("w/audio.aac");
        let args = args_of(&reassemble_command(&cfg(), "25/1", Some(&audio)));
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "w/audio.aac"));
        assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "aac"));
        assert!(args.contains(&"-shortest".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out put.mp4"));
    }

    #[test]
    fn empty_frame_rate_leaves_encoder_default() {
        let args = args_of(&reassemble_command(&cfg(), "", None));
        assert!(!args.contains(&"-framerate".to_string()));
    }

    #[test]
    fn encoder_settings_follow_config() {
        let mut c = cfg();
        c.encode.preset = "veryfast".to_string();
        c.encode.crf = 23;
        let args = args_of(&reassemble_command(&c, "24/1", None));
        assert!(args.windows(2).any(|w| w[0] == "-preset" && w[1] == "veryfast"));
        assert!(args.windows(2).any(|w| w[0] == "-crf" && w[1] == "23"));
    }
}
