use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::{Result, StorageError};

/// Packs a staged payload (file or directory) into a single artifact.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Writes the archive to `output` and returns its size in bytes.
    async fn archive(&self, input: &Path, output: &Path) -> Result<u64>;

    fn extension(&self) -> &'static str;
}

/// `{stem}_{unix seconds}.{ext}` inside `dir`.
pub fn artifact_path(dir: &Path, filename: &str, extension: &str) -> PathBuf {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("payload");
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    dir.join(format!("{}_{}.{}", stem, secs, extension))
}

/// Runs the external `7z` tool at maximum compression.
#[derive(Debug, Clone)]
pub struct SevenZip {
    program: PathBuf,
}

impl Default for SevenZip {
    fn default() -> Self {
        Self::new("7z")
    }
}

impl SevenZip {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Archiver for SevenZip {
    async fn archive(&self, input: &Path, output: &Path) -> Result<u64> {
        debug!(program = %self.program.display(), input = %input.display(), "running archiver");
        let result = Command::new(&self.program)
            .arg("a")
            .arg("-t7z")
            .arg("-mx=9")
            .arg(output)
            .arg(input)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                StorageError::CompressionFailed(format!(
                    "could not start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!(status = %result.status, "archiver exited with failure");
            return Err(StorageError::CompressionFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                stderr.trim()
            )));
        }

        Ok(tokio::fs::metadata(output).await?.len())
    }

    fn extension(&self) -> &'static str {
        "7z"
    }
}

/// In-process deflate archive, for hosts without the `7z` tool.
#[derive(Debug, Clone, Default)]
pub struct ZipArchiver;

impl ZipArchiver {
    fn write_archive(input: &Path, output: &Path) -> io::Result<u64> {
        let file = File::create(output)?;
        let mut writer = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let base = input.parent().unwrap_or_else(|| Path::new(""));
        let mut pending = vec![input.to_path_buf()];
        while let Some(path) = pending.pop() {
            let name = path
                .strip_prefix(base)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");

            if path.is_dir() {
                writer.add_directory(format!("{}/", name), options).map_err(io::Error::other)?;
                let mut children = std::fs::read_dir(&path)?
                    .map(|entry| entry.map(|e| e.path()))
                    .collect::<io::Result<Vec<_>>>()?;
                // popped in reverse, so entries are written in name order
                children.sort_by(|a, b| b.cmp(a));
                pending.extend(children);
            } else {
                writer.start_file(name, options).map_err(io::Error::other)?;
                let mut source = File::open(&path)?;
                io::copy(&mut source, &mut writer)?;
            }
        }

        writer.finish().map_err(io::Error::other)?;
        Ok(std::fs::metadata(output)?.len())
    }
}

#[async_trait]
impl Archiver for ZipArchiver {
    async fn archive(&self, input: &Path, output: &Path) -> Result<u64> {
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || Self::write_archive(&input, &output))
            .await
            .map_err(|e| StorageError::CompressionFailed(e.to_string()))?
            .map_err(|e| StorageError::CompressionFailed(e.to_string()))
    }

    fn extension(&self) -> &'static str {
        "zip"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_artifact_path_uses_stem() {
        let path = artifact_path(Path::new("/store"), "movie.mkv", "7z");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("movie_"));
        assert!(name.ends_with(".7z"));
    }

    #[tokio::test]
    async fn test_zip_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let payload = temp_dir.path().join("album");
        std::fs::create_dir_all(payload.join("cd1")).unwrap();
        std::fs::write(payload.join("cd1").join("a.txt"), vec![0u8; 4096]).unwrap();
        std::fs::write(payload.join("b.txt"), b"hello").unwrap();

        let output = temp_dir.path().join("album.zip");
        let size = ZipArchiver.archive(&payload, &output).await.unwrap();

        assert_eq!(size, std::fs::metadata(&output).unwrap().len());
        let archive = zip::ZipArchive::new(File::open(&output).unwrap()).unwrap();
        let names: Vec<_> = archive.file_names().map(str::to_string).collect();
        assert!(names.contains(&"album/cd1/a.txt".to_string()));
        assert!(names.contains(&"album/b.txt".to_string()));
    }

    #[tokio::test]
    async fn test_missing_tool_is_compression_failure() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let input = temp_dir.path().join("in.bin");
        std::fs::write(&input, b"data").unwrap();

        let archiver = SevenZip::new(temp_dir.path().join("no-such-7z"));
        let err = archiver
            .archive(&input, &temp_dir.path().join("out.7z"))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::CompressionFailed(_)));
    }
}
