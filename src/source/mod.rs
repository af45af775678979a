//! Descriptors for remote payloads and the sources that fetch them.

mod ed2k;
mod placeholder;
mod torrent;

pub use ed2k::Ed2kLink;
pub use placeholder::{PlaceholderSource, DEFAULT_CHUNK_SIZE};
pub use torrent::{TorrentFile, TorrentMeta};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::storage::progress::ProgressReporter;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceDescriptor {
    Ed2k(Ed2kLink),
    Torrent(TorrentMeta),
}

impl SourceDescriptor {
    pub fn display_name(&self) -> &str {
        match self {
            SourceDescriptor::Ed2k(link) => &link.filename,
            SourceDescriptor::Torrent(meta) => &meta.name,
        }
    }

    /// Declared payload size, used for admission and progress.
    pub fn total_size(&self) -> u64 {
        match self {
            SourceDescriptor::Ed2k(link) => link.size,
            SourceDescriptor::Torrent(meta) => meta.total_size(),
        }
    }
}

impl From<Ed2kLink> for SourceDescriptor {
    fn from(link: Ed2kLink) -> Self {
        SourceDescriptor::Ed2k(link)
    }
}

impl From<TorrentMeta> for SourceDescriptor {
    fn from(meta: TorrentMeta) -> Self {
        SourceDescriptor::Torrent(meta)
    }
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Materializes the payload under `staging` and returns its path.
    ///
    /// Implementations report transferred bytes through `progress` and stop
    /// with [`StorageError::Cancelled`](crate::StorageError::Cancelled) once
    /// `cancel` fires.
    async fn fetch(
        &self,
        descriptor: &SourceDescriptor,
        staging: &Path,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}
