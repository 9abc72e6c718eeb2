use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use walkdir::WalkDir;

/// Character budget for tool output echoed in messages.
pub const ERROR_SNIPPET_CHARS: usize = 200;

pub const FRAME_PREFIX: &str = "frame_";
pub const FRAME_EXT: &str = "png";
/// printf-style pattern understood by ffmpeg's image2 muxer/demuxer.
pub const FRAME_PATTERN: &str = "frame_%06d.png";

/// Runs an external tool to completion, capturing stdout and stderr.
/// Only a failure to spawn is an `Err`; a nonzero exit is for the caller to judge.
pub fn run_tool(cmd: &mut Command) -> Result<Output> {
    let program = cmd.get_program().to_string_lossy().to_string();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("failed to run {}", program))
}

/// Last meaningful stderr text of a finished tool, cut to the snippet budget.
pub fn failure_snippet(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return format!("exit status {}", output.status);
    }
    tail_chars(trimmed, ERROR_SNIPPET_CHARS)
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// ffmpeg puts the actual error at the end of stderr, after the banner.
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

/// Renders a command line for log output.
pub fn describe_command(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().to_string()];
    parts.extend(cmd.get_args().map(|a| quote_arg(a)));
    parts.join(" ")
}

fn quote_arg(arg: &OsStr) -> String {
    let s = arg.to_string_lossy();
    if s.is_empty() || s.contains(char::is_whitespace) {
        format!("\"{}\"", s)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
pub fn frame_file_name(index: u64) -> String {
    format!("{}{:06}.{}", FRAME_PREFIX, index, FRAME_EXT)
}

pub fn frame_index(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix(FRAME_PREFIX)?.parse().ok()
}

/// Frame images in decode order. Ordering is by parsed index so sequences
/// that outgrow the zero padding still sort correctly.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = vec![];
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let e = entry.with_context(|| format!("failed to read frame directory {:?}", dir))?;
        let p = e.path();
        if !e.file_type().is_file() {
            continue;
        }
        let is_png = p
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(FRAME_EXT))
            .unwrap_or(false);
        if is_png {
            frames.push(p.to_path_buf());
        }
    }
    frames.sort_by(|a, b| {
        frame_index(a)
            .cmp(&frame_index(b))
            .then_with(|| a.file_name().cmp(&b.file_name()))
    });
    Ok(frames)
}

pub fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

pub fn dir_size_bytes(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Removes a directory tree, ignoring every error (including "not found").
pub fn remove_dir_quiet(path: &Path) {
    let _ = std::fs::remove_dir_all(path);
}

/// Shell stand-in for ffmpeg so pipeline stages run without the real tool.
///
/// Every invocation is appended to `ffmpeg.log` next to the script. Frame
/// extraction writes `frames` numbered files, or fails like a corrupt input
/// when `frames` is `None`; audio extraction always fails; any other call
/// writes a placeholder to its last argument.
#[cfg(all(test, unix))]
pub mod fake_ffmpeg {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    const SCRIPT: &str = r#"#!/bin/sh
echo "$*" >> "__LOG__"
for last; do :; done
case "$last" in
  *frame_%06d.png)
    __EXTRACT__
    ;;
  *.aac)
    echo "Output file #0 does not contain any stream" >&2
    exit 1
    ;;
  *)
    printf 'fake' > "$last"
    ;;
esac
"#;

    const WRITE_FRAMES: &str = r#"dir=$(dirname "$last")
    i=1
    while [ "$i" -le __FRAMES__ ]; do
      printf 'png' > "$dir/$(printf 'frame_%06d.png' "$i")"
      i=$((i + 1))
    done"#;

    const CORRUPT_INPUT: &str = r#"echo "in.mp4: Invalid data found when processing input" >&2
    exit 1"#;

    pub fn install(dir: &Path, frames: Option<u32>) -> PathBuf {
        let extract = match frames {
            Some(n) => WRITE_FRAMES.replace("__FRAMES__", &n.to_string()),
            None => CORRUPT_INPUT.to_string(),
        };
        let script = SCRIPT
            .replace("__LOG__", &log_path(dir).to_string_lossy())
            .replace("__EXTRACT__", &extract);
        let source = dir.join("ffmpeg.sh");
        fs::write(&source, script).expect("write fake ffmpeg");
        fs::set_permissions(&source, fs::Permissions::from_mode(0o755)).expect("chmod fake ffmpeg");
        // Copied by a child process: a writable fd held by this test binary can
        // leak into a concurrent test's fork and make exec fail with ETXTBSY.
        let path = dir.join("ffmpeg");
        let status = std::process::Command::new("cp")
            .arg(&source)
            .arg(&path)
            .status()
            .expect("run cp");
        assert!(status.success(), "copy fake ffmpeg");
        path
    }

    pub fn log_path(dir: &Path) -> PathBuf {
        dir.join("ffmpeg.log")
    }

    pub fn calls(dir: &Path) -> Vec<String> {
        fs::read_to_string(log_path(dir))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn frame_names_are_zero_padded_and_parse_back() {
        assert_eq!(frame_file_name(7), "frame_000007.png");
        assert_eq!(frame_index(Path::new("x/frame_000007.png")), Some(7));
        assert_eq!(frame_index(Path::new("x/frame_1234567.png")), Some(1_234_567));
        assert_eq!(frame_index(Path::new("x/thumb_0001.png")), None);
    }

    #[test]
    fn list_frames_orders_by_index_and_skips_other_files() {
        let tmp = TempDir::new().expect("tempdir");
        for name in ["frame_000010.png", "frame_000002.png", "frame_1000000.png", "notes.txt"] {
            fs::write(tmp.path().join(name), b"x").expect("write");
        }
        fs::create_dir(tmp.path().join("frame_000001.png")).expect("mkdir decoy");

        let names = list_frames(tmp.path())
            .expect("list")
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["frame_000002.png", "frame_000010.png", "frame_1000000.png"]
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(tail_chars("abcdef", 2), "ef");
        assert_eq!(tail_chars(&"x".repeat(500), ERROR_SNIPPET_CHARS).len(), ERROR_SNIPPET_CHARS);
    }

    #[test]
    fn describe_command_quotes_paths_with_spaces() {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-i").arg("VIDEO 2 LOGO_1.mp4");
        assert_eq!(describe_command(&cmd), "ffmpeg -i \"VIDEO 2 LOGO_1.mp4\"");
    }

    #[test]
    fn remove_dir_quiet_is_idempotent() {
        let tmp = TempDir::new().expect("tempdir");
        let work = tmp.path().join("work");
        fs::create_dir_all(work.join("frames")).expect("mkdir");
        fs::write(work.join("frames/frame_000001.png"), b"png").expect("write");
        assert_eq!(dir_size_bytes(&work), 3);

        remove_dir_quiet(&work);
        assert!(!work.exists());
        remove_dir_quiet(&work);
        assert!(!work.exists());
    }

    #[test]
    fn file_size_ignores_directories_and_missing_paths() {
        let tmp = TempDir::new().expect("tempdir");
        assert_eq!(file_size(tmp.path()), None);
        assert_eq!(file_size(&tmp.path().join("missing")), None);
        let f = tmp.path().join("a.bin");
        fs::write(&f, vec![0u8; 2 * 1024 * 1024]).expect("write");
        assert_eq!(file_size(&f), Some(2 * 1024 * 1024));
        assert!((bytes_to_mb(2 * 1024 * 1024) - 2.0).abs() < f64::EPSILON);
    }
}
