use assert_cmd::Command;
use std::path::Path;
use tempfile::TempDir;

fn ffmpeg_available() -> bool {
    ["ffmpeg", "ffprobe"].iter().all(|tool| {
        std::process::Command::new(tool)
            .arg("-version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

fn combined_output(output: &std::process::Output) -> String {
    format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

/// One second of 64x48 test pattern at 10 fps, optionally with a sine track.
fn write_test_video(path: &Path, with_audio: bool) {
    let mut cmd = std::process::Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-loglevel", "error", "-y"])
        .args(["-f", "lavfi", "-i", "testsrc=size=64x48:rate=10"]);
    if with_audio {
        cmd.args(["-f", "lavfi", "-i", "sine=frequency=440:sample_rate=44100"]);
    }
    cmd.args(["-t", "1", "-c:v", "libx264", "-pix_fmt", "yuv420p"]);
    if with_audio {
        cmd.args(["-c:a", "aac"]);
    }
    let status = cmd.arg(path).status().expect("ffmpeg runs");
    assert!(status.success(), "failed to generate test video");
}

fn probe_dims(path: &Path) -> (u32, u32) {
    let output = std::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(path)
        .output()
        .expect("ffprobe runs");
    let text = String::from_utf8_lossy(&output.stdout);
    let (w, h) = text.trim().split_once('x').expect("WxH");
    (w.parse().expect("width"), h.parse().expect("height"))
}

fn has_audio_stream(path: &Path) -> bool {
    let output = std::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "a",
            "-show_entries",
            "stream=codec_type",
            "-of",
            "csv=p=0",
        ])
        .arg(path)
        .output()
        .expect("ffprobe runs");
    String::from_utf8_lossy(&output.stdout).contains("audio")
}

#[test]
fn help_lists_pipeline_flags() {
    let output = Command::new(assert_cmd::cargo::cargo_bin!("vidupscale"))
        .arg("--help")
        .output()
        .expect("--help runs");

    assert!(output.status.success());
    let text = combined_output(&output);
    for flag in [
        "--output",
        "--scale",
        "--work-dir",
        "--backend",
        "--model-bin",
        "--model-sha256",
        "--tile",
        "--crf",
        "--progress",
    ] {
        assert!(text.contains(flag), "help text missing {flag}: {text}");
    }
}

#[test]
fn scale_out_of_range_is_rejected() {
    let tmp = TempDir::new().expect("tempdir");
    let output = Command::new(assert_cmd::cargo::cargo_bin!("vidupscale"))
        .arg(tmp.path().join("in.mp4"))
        .args(["--scale", "0", "--progress", "quiet"])
        .output()
        .expect("run");
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(text.contains("scale"), "unexpected error text: {text}");
}

#[test]
fn lanczos_backend_upscales_and_keeps_audio() {
    if !ffmpeg_available() {
        eprintln!("skipping: ffmpeg/ffprobe not available");
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let input = tmp.path().join("clip in.mp4");
    let out = tmp.path().join("clip out.mp4");
    let work = tmp.path().join("work");
    write_test_video(&input, true);

    let output = Command::new(assert_cmd::cargo::cargo_bin!("vidupscale"))
        .arg(&input)
        .arg("--output")
        .arg(&out)
        .arg("--work-dir")
        .arg(&work)
        .args(["--backend", "lanczos", "--scale", "2", "--preset", "ultrafast"])
        .args(["--progress", "plain"])
        .output()
        .expect("run upscale");

    let text = combined_output(&output);
    assert!(output.status.success(), "upscale failed: {text}");
    assert!(text.contains("Upscale summary:"), "missing summary: {text}");
    assert!(!text.contains("frames=0 "), "no frames extracted: {text}");
    assert!(text.contains("skipped=0"), "frames skipped: {text}");
    assert!(text.contains("backend=lanczos"), "unexpected backend: {text}");
    assert!(text.contains("audio=true"), "audio not detected: {text}");
    assert!(text.contains("SUCCESS"), "missing success banner: {text}");
    assert!(text.contains("[PROGRESS] upscale"), "missing frame progress: {text}");

    assert!(std::fs::metadata(&out).expect("output exists").len() > 0);
    assert_eq!(probe_dims(&out), (128, 96));
    assert!(has_audio_stream(&out));
    assert!(!work.exists(), "work dir should be removed");
}

#[test]
fn video_without_audio_encodes_video_only() {
    if !ffmpeg_available() {
        eprintln!("skipping: ffmpeg/ffprobe not available");
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let input = tmp.path().join("silent.mp4");
    let work = tmp.path().join("work");
    write_test_video(&input, false);

    let output = Command::new(assert_cmd::cargo::cargo_bin!("vidupscale"))
        .arg(&input)
        .arg("--work-dir")
        .arg(&work)
        .args(["--backend", "lanczos", "--scale", "3", "--preset", "ultrafast"])
        .args(["--progress", "quiet"])
        .output()
        .expect("run upscale");

    let text = combined_output(&output);
    assert!(output.status.success(), "upscale failed: {text}");
    assert!(text.contains("audio=false"), "unexpected audio: {text}");

    let out = tmp.path().join("silent_upscaled.mp4");
    assert_eq!(probe_dims(&out), (192, 144));
    assert!(!has_audio_stream(&out));
    assert!(!work.exists());
}

#[test]
fn missing_model_tool_falls_back_to_lanczos() {
    if !ffmpeg_available() {
        eprintln!("skipping: ffmpeg/ffprobe not available");
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let input = tmp.path().join("in.mp4");
    let out = tmp.path().join("out.mp4");
    let work = tmp.path().join("work");
    write_test_video(&input, false);

    let output = Command::new(assert_cmd::cargo::cargo_bin!("vidupscale"))
        .arg(&input)
        .arg("--output")
        .arg(&out)
        .arg("--work-dir")
        .arg(&work)
        .arg("--model-bin")
        .arg(tmp.path().join("no-such-realesrgan"))
        .args(["--preset", "ultrafast", "--progress", "plain"])
        .output()
        .expect("run upscale");

    let text = combined_output(&output);
    assert!(output.status.success(), "upscale failed: {text}");
    assert!(text.contains("backend=lanczos"), "fallback not used: {text}");
    assert!(text.contains("not available"), "fallback reason missing: {text}");
    assert_eq!(probe_dims(&out), (128, 96));
    assert!(!work.exists());
}

#[test]
fn strict_model_backend_errors_but_still_cleans_up() {
    if !ffmpeg_available() {
        eprintln!("skipping: ffmpeg/ffprobe not available");
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let input = tmp.path().join("in.mp4");
    let work = tmp.path().join("work");
    write_test_video(&input, false);

    let output = Command::new(assert_cmd::cargo::cargo_bin!("vidupscale"))
        .arg(&input)
        .arg("--work-dir")
        .arg(&work)
        .arg("--model-bin")
        .arg(tmp.path().join("no-such-realesrgan"))
        .args(["--backend", "esrgan", "--progress", "quiet"])
        .output()
        .expect("run upscale");

    assert!(!output.status.success());
    assert!(!work.exists(), "work dir should be removed after a staged error");
    assert!(!tmp.path().join("in_upscaled.mp4").exists());
}

#[test]
fn unreadable_input_aborts_before_cleanup() {
    if !ffmpeg_available() {
        eprintln!("skipping: ffmpeg/ffprobe not available");
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let input = tmp.path().join("not-a-video.mp4");
    std::fs::write(&input, b"definitely not a video").expect("write input");
    let work = tmp.path().join("work");

    let output = Command::new(assert_cmd::cargo::cargo_bin!("vidupscale"))
        .arg(&input)
        .arg("--work-dir")
        .arg(&work)
        .args(["--backend", "lanczos", "--progress", "quiet"])
        .output()
        .expect("run upscale");

    let text = combined_output(&output);
    assert!(output.status.success(), "abort should exit 0: {text}");
    assert!(text.contains("Frame extraction failed"), "missing abort line: {text}");
    assert!(!text.contains("Upscale summary:"));
    assert!(work.join("frames").is_dir(), "work dir is left in place");
    assert!(!tmp.path().join("not-a-video_upscaled.mp4").exists());
}
