//! Model weight cache: the ncnn `.param`/`.bin` pair, fetched once from a
//! release archive and reused while present.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::progress::ProgressHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub param: PathBuf,
    pub bin: PathBuf,
}

impl ModelFiles {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            param: dir.join(format!("{}.param", name)),
            bin: dir.join(format!("{}.bin", name)),
        }
    }

    pub fn present(&self) -> bool {
        self.param.is_file() && self.bin.is_file()
    }
}

pub fn ensure_weights(
    dir: &Path,
    name: &str,
    url: &str,
    expected_sha256: Option<&str>,
    progress: &ProgressHandle,
) -> Result<ModelFiles> {
    let files = ModelFiles::new(dir, name);
    if files.present() {
        return Ok(files);
    }

    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {:?}", dir))?;
    let archive = dir.join(format!("{}.download.zip", name));

    progress.set_operation_status("download", "fetching model weights");
    progress.log(format!("Downloading model weights from {}", url));
    let fetched = download(url, &archive);
    progress.clear_operation("download", None);
    if let Err(err) = fetched {
        let _ = std::fs::remove_file(&archive);
        return Err(err);
    }

    let result = verify_and_extract(&archive, name, dir, expected_sha256, progress);
    let _ = std::fs::remove_file(&archive);
    result?;

    if !files.present() {
        bail!("model files for {} missing after extraction", name);
    }
    Ok(files)
}

fn verify_and_extract(
    archive: &Path,
    name: &str,
    dir: &Path,
    expected_sha256: Option<&str>,
    progress: &ProgressHandle,
) -> Result<()> {
    match expected_sha256 {
        Some(expected) => verify_sha256(archive, expected)?,
        None => progress.warn("model archive has no pinned sha256; integrity not verified"),
    }
    extract_model_files(archive, name, dir)
}

fn download(url: &str, dest: &Path) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(30 * 60))
        .build()
        .context("failed to build http client")?;
    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("failed to request {}", url))?
        .error_for_status()
        .with_context(|| format!("download of {} failed", url))?;

    let mut file = File::create(dest).with_context(|| format!("failed to create {:?}", dest))?;
    response
        .copy_to(&mut file)
        .with_context(|| format!("failed to write {:?}", dest))?;
    Ok(())
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        bail!(
            "sha256 mismatch for {:?}: expected {}, got {}",
            path,
            expected.trim(),
            actual
        );
    }
    Ok(())
}

/// Copies `<name>.param` and `<name>.bin` out of the archive, wherever they
/// sit inside it, flattening them into `dir`.
pub fn extract_model_files(archive: &Path, name: &str, dir: &Path) -> Result<()> {
    let file = File::open(archive).with_context(|| format!("failed to open {:?}", archive))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("{:?} is not a zip archive", archive))?;

    let wanted = [format!("{}.param", name), format!("{}.bin", name)];
    let mut found = 0usize;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let entry_name = entry.name().to_string();
        let Some(file_name) = Path::new(&entry_name).file_name() else {
            continue;
        };
        let file_name = file_name.to_string_lossy().to_string();
        if !wanted.contains(&file_name) {
            continue;
        }

        let dest = dir.join(&file_name);
        let part = dir.join(format!("{}.part", file_name));
        let copied = File::create(&part)
            .with_context(|| format!("failed to create {:?}", part))
            .and_then(|mut out| {
                io::copy(&mut entry, &mut out)
                    .with_context(|| format!("failed to extract {}", entry_name))
            });
        if let Err(err) = copied {
            let _ = std::fs::remove_file(&part);
            return Err(err);
        }
        // Only complete files ever carry the final name.
        std::fs::rename(&part, &dest)
            .with_context(|| format!("failed to move {:?} into place", dest))?;
        found += 1;
    }

    if found < wanted.len() {
        bail!("archive {:?} does not contain {} weights", archive, name);
    }
    Ok(())
}
