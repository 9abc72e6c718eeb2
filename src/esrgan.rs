use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::{PipelineConfig, MODEL_NATIVE_SCALE};
use crate::progress::ProgressHandle;
use crate::upscale::FrameUpscaler;
use crate::util;
use crate::weights;

/// Real-ESRGAN x4plus through `realesrgan-ncnn-vulkan`, one frame per call.
///
/// The network always enlarges by its native factor; the result is then
/// resampled to exactly `scale` times the source so the requested factor is
/// independent of the model.
pub struct EsrganUpscaler {
    executable: PathBuf,
    model_dir: PathBuf,
    model_name: String,
    model_url: String,
    model_sha256: Option<String>,
    tile: u32,
    scratch_dir: PathBuf,
}

impl EsrganUpscaler {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            executable: cfg.model.executable.clone(),
            model_dir: cfg.model_dir(),
            model_name: cfg.model.name.clone(),
            model_url: cfg.model.url.clone(),
            model_sha256: cfg.model.sha256.clone(),
            tile: cfg.model.tile,
            scratch_dir: cfg.work_dir.join("native"),
        }
    }

    pub fn command(&self, src: &Path, dst: &Path) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-i")
            .arg(src)
            .arg("-o")
            .arg(dst)
            .arg("-m")
            .arg(&self.model_dir)
            .arg("-n")
            .arg(&self.model_name)
            .arg("-s")
            .arg(MODEL_NATIVE_SCALE.to_string())
            .arg("-t")
            .arg(self.tile.to_string())
            .arg("-f")
            .arg("png");
        cmd
    }

    fn ensure_executable(&self) -> Result<()> {
        // The usage screen exits nonzero on some builds; spawning is the check.
        Command::new(&self.executable)
            .arg("-h")
            .output()
            .with_context(|| format!("super-resolution tool {:?} is not available", self.executable))?;
        Ok(())
    }
}

impl FrameUpscaler for EsrganUpscaler {
    fn name(&self) -> &'static str {
        "real-esrgan"
    }

    fn prepare(&mut self, progress: &ProgressHandle) -> Result<()> {
        self.ensure_executable()?;
        weights::ensure_weights(
            &self.model_dir,
            &self.model_name,
            &self.model_url,
            self.model_sha256.as_deref(),
            progress,
        )?;
        std::fs::create_dir_all(&self.scratch_dir)
            .with_context(|| format!("failed to create {:?}", self.scratch_dir))?;
        Ok(())
    }

    fn upscale(&mut self, src: &Path, dst: &Path, scale: u32) -> Result<()> {
        let (w, h) = image::image_dimensions(src)
            .with_context(|| format!("failed to read dimensions of {:?}", src))?;
        let file_name = src.file_name().unwrap_or_default();
        let native = self.scratch_dir.join(file_name);

        let output = util::run_tool(&mut self.command(src, &native))?;
        if !output.status.success() {
            bail!("{}", util::failure_snippet(&output));
        }

        let resized = resize_to_scale(&native, (w, h), scale, dst);
        let _ = std::fs::remove_file(&native);
        resized
    }
}

/// Resamples `native` to `(w * scale, h * scale)` with lanczos and writes `dst`.
pub fn resize_to_scale(native: &Path, source_dims: (u32, u32), scale: u32, dst: &Path) -> Result<()> {
    let img = image::open(native).with_context(|| format!("failed to load {:?}", native))?;
    let (tw, th) = (source_dims.0 * scale, source_dims.1 * scale);
    let img = if img.width() == tw && img.height() == th {
        img
    } else {
        img.resize_exact(tw, th, FilterType::Lanczos3)
    };
    img.save(dst).with_context(|| format!("failed to write {:?}", dst))?;
    Ok(())
}
