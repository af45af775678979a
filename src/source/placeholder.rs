use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{RemoteSource, SourceDescriptor};
use crate::storage::progress::ProgressReporter;
use crate::{Result, StorageError};

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Stand-in transfer that fills the payload with zero bytes.
///
/// No peer traffic happens. Each chunk is followed by `chunk_delay` to give
/// the job a realistic progress curve.
#[derive(Debug, Clone)]
pub struct PlaceholderSource {
    chunk_size: usize,
    chunk_delay: Duration,
}

impl Default for PlaceholderSource {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: Duration::from_millis(100),
        }
    }
}

impl PlaceholderSource {
    pub fn new(chunk_size: usize, chunk_delay: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_delay,
        }
    }

    async fn write_zeros(
        &self,
        path: &Path,
        length: u64,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(path).await?;
        let buffer = vec![0u8; self.chunk_size];
        let mut written = 0u64;

        while written < length {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }

            let chunk = (length - written).min(self.chunk_size as u64) as usize;
            file.write_all(&buffer[..chunk]).await?;
            written += chunk as u64;
            progress.advance(chunk as u64).await;

            if !self.chunk_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                    _ = tokio::time::sleep(self.chunk_delay) => {}
                }
            }
        }

        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteSource for PlaceholderSource {
    async fn fetch(
        &self,
        descriptor: &SourceDescriptor,
        staging: &Path,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        match descriptor {
            SourceDescriptor::Ed2k(link) => {
                let target = staging.join(&link.filename);
                debug!(job = %progress.job(), hash = %link.hash_hex(), "placeholder ed2k transfer");
                self.write_zeros(&target, link.size, progress, cancel).await?;
                Ok(target)
            }
            SourceDescriptor::Torrent(meta) => {
                let root = staging.join(&meta.name);
                let single = meta.files.len() == 1 && meta.files[0].path == Path::new(&meta.name);
                for file in &meta.files {
                    let target = if single { root.clone() } else { root.join(&file.path) };
                    self.write_zeros(&target, file.length, progress, cancel).await?;
                }
                if !single {
                    fs::create_dir_all(&root).await?;
                }
                Ok(root)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Ed2kLink, TorrentFile, TorrentMeta};
    use crate::storage::progress::JobTracker;
    use crate::{AccountId, JobKind};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ed2k_payload_is_zero_filled() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tracker = JobTracker::new();
        let id = tracker.register(JobKind::RemoteFetch, "a.bin", AccountId(1)).await;
        let descriptor = SourceDescriptor::Ed2k(Ed2kLink {
            filename: "a.bin".to_string(),
            size: 2500,
            hash: [7; 16],
        });
        let reporter = ProgressReporter::new(tracker.clone(), id, descriptor.total_size());

        let source = PlaceholderSource::new(1000, Duration::ZERO);
        let path = source
            .fetch(&descriptor, temp_dir.path(), &reporter, &CancellationToken::new())
            .await
            .unwrap();

        let data = fs::read(&path).await.unwrap();
        assert_eq!(data.len(), 2500);
        assert!(data.iter().all(|b| *b == 0));
        assert_eq!(tracker.get(&id).await.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn test_multi_file_torrent_layout() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tracker = JobTracker::new();
        let id = tracker.register(JobKind::RemoteFetch, "album", AccountId(1)).await;
        let descriptor = SourceDescriptor::Torrent(TorrentMeta {
            name: "album".to_string(),
            files: vec![
                TorrentFile { path: PathBuf::from("cd1/a.flac"), length: 10 },
                TorrentFile { path: PathBuf::from("b.flac"), length: 20 },
            ],
        });
        let reporter = ProgressReporter::new(tracker, id, descriptor.total_size());

        let source = PlaceholderSource::new(8, Duration::ZERO);
        let root = source
            .fetch(&descriptor, temp_dir.path(), &reporter, &CancellationToken::new())
            .await
            .unwrap();

        assert!(root.join("cd1").join("a.flac").is_file());
        assert_eq!(fs::metadata(root.join("b.flac")).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_stops() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tracker = JobTracker::new();
        let id = tracker.register(JobKind::RemoteFetch, "big", AccountId(1)).await;
        let descriptor = SourceDescriptor::Ed2k(Ed2kLink {
            filename: "big".to_string(),
            size: 10_000,
            hash: [0; 16],
        });
        let reporter = ProgressReporter::new(tracker, id, descriptor.total_size());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = PlaceholderSource::new(100, Duration::ZERO)
            .fetch(&descriptor, temp_dir.path(), &reporter, &cancel)
            .await;

        assert!(matches!(result, Err(StorageError::Cancelled)));
    }
}
