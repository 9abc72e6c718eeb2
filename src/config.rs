use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::path::{Component, Path, PathBuf};

use crate::progress::ProgressConfig;

pub const DEFAULT_WORK_DIR: &str = "upscale_temp";
pub const DEFAULT_SCALE: u32 = 2;
pub const MAX_SCALE: u32 = 8;

/// Entries a previous run may leave in the work dir; anything else there
/// belongs to someone else and would be lost at cleanup.
const WORK_DIR_ENTRIES: &[&str] = &["frames", "upscaled", "native", "models", "audio.aac"];

/// Release archive that ships the ncnn Real-ESRGAN weights under `models/`.
pub const DEFAULT_MODEL_URL: &str = "https://github.com/xinntao/Real-ESRGAN/releases/download/v0.2.5.0/realesrgan-ncnn-vulkan-20220424-ubuntu.zip";
pub const DEFAULT_MODEL_NAME: &str = "realesrgan-x4plus";
pub const DEFAULT_MODEL_BIN: &str = "realesrgan-ncnn-vulkan";
/// Native upscaling factor of the x4plus network.
pub const MODEL_NATIVE_SCALE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum BackendChoice {
    /// Super-resolution model, falling back to lanczos on any failure.
    Auto,
    /// Super-resolution model only; failures abort the run.
    Esrgan,
    /// Lanczos resize with sharpening only.
    Lanczos,
}

#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub executable: PathBuf,
    /// Where the `.param`/`.bin` pair lives. `None` keeps it inside the work dir.
    pub dir: Option<PathBuf>,
    pub name: String,
    pub url: String,
    pub sha256: Option<String>,
    pub tile: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(DEFAULT_MODEL_BIN),
            dir: None,
            name: DEFAULT_MODEL_NAME.to_string(),
            url: DEFAULT_MODEL_URL.to_string(),
            sha256: None,
            tile: 256,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncodeConfig {
    pub preset: String,
    pub crf: u32,
    /// `-qscale:v` used when decoding frames.
    pub extract_quality: u32,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            preset: "slow".to_string(),
            crf: 18,
            extract_quality: 2,
        }
    }
}

/// Everything one pipeline run needs. Built from the CLI; nothing in the
/// pipeline reads process-wide state.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub work_dir: PathBuf,
    pub scale: u32,
    pub backend: BackendChoice,
    pub model: ModelConfig,
    pub encode: EncodeConfig,
    pub tools: ToolConfig,
    pub progress: ProgressConfig,
}

impl PipelineConfig {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        let input = input.into();
        Self {
            output: default_output_path(&input),
            input,
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            scale: DEFAULT_SCALE,
            backend: BackendChoice::Auto,
            model: ModelConfig::default(),
            encode: EncodeConfig::default(),
            tools: ToolConfig::default(),
            progress: ProgressConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            bail!("input path must not be empty");
        }
        if self.scale == 0 || self.scale > MAX_SCALE {
            bail!("scale must be between 1 and {}", MAX_SCALE);
        }
        if self.encode.crf > 51 {
            bail!("crf must be between 0 and 51");
        }
        if self.model.tile == 0 {
            bail!("tile must be greater than zero");
        }
        if self.output == self.input {
            bail!("output must differ from input");
        }
        self.check_work_dir()
    }

    /// The whole work dir is deleted at cleanup, so it may only ever hold
    /// this tool's own files.
    fn check_work_dir(&self) -> Result<()> {
        let work = absolute(&self.work_dir)?;
        let guarded = [
            ("input", Some(&self.input)),
            ("output", Some(&self.output)),
            ("model dir", self.model.dir.as_ref()),
        ];
        for (what, path) in guarded {
            let Some(path) = path else {
                continue;
            };
            if absolute(path)?.starts_with(&work) {
                bail!(
                    "work dir {:?} contains the {} {:?}; it is deleted after the run",
                    self.work_dir,
                    what,
                    path
                );
            }
        }

        if !self.work_dir.exists() {
            return Ok(());
        }
        if !self.work_dir.is_dir() {
            bail!("work dir {:?} is not a directory", self.work_dir);
        }
        let entries = std::fs::read_dir(&self.work_dir)
            .with_context(|| format!("failed to read work dir {:?}", self.work_dir))?;
        for entry in entries {
            let name = entry?.file_name();
            if !WORK_DIR_ENTRIES.iter().any(|known| name.as_os_str() == *known) {
                bail!(
                    "work dir {:?} already holds {:?}; use an empty or new directory",
                    self.work_dir,
                    name
                );
            }
        }
        Ok(())
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.work_dir.join("frames")
    }

    pub fn upscaled_dir(&self) -> PathBuf {
        self.work_dir.join("upscaled")
    }

    pub fn audio_path(&self) -> PathBuf {
        self.work_dir.join("audio.aac")
    }

    pub fn model_dir(&self) -> PathBuf {
        self.model
            .dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join("models"))
    }
}

/// Absolute, lexically normalized form of `path` (no symlink resolution).
fn absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("failed to read current directory")?
            .join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

/// `clip.mov` -> `clip_upscaled.mp4`, next to the input.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{}_upscaled.mp4", stem))
}
