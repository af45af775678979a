//! Torrent metainfo reading.
//!
//! Only the parts of the `info` dictionary needed to lay out the payload are
//! decoded: the name, and either a single `length` or the `files` list.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Result, StorageError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFile {
    pub path: PathBuf,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentMeta {
    pub name: String,
    pub files: Vec<TorrentFile>,
}

#[derive(Debug, Deserialize)]
struct Metainfo {
    info: Info,
}

#[derive(Debug, Deserialize)]
struct Info {
    name: String,
    #[serde(default)]
    length: Option<u64>,
    #[serde(default)]
    files: Option<Vec<FileEntry>>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    length: u64,
    path: Vec<String>,
}

impl TorrentMeta {
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read(path).await?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let metainfo: Metainfo =
            serde_bencode::from_bytes(data).map_err(|e| invalid(&e.to_string()))?;
        let info = metainfo.info;

        if !is_safe_component(&info.name) {
            return Err(invalid("unsafe name"));
        }

        let files = match (info.files, info.length) {
            (Some(entries), _) => entries
                .into_iter()
                .map(file_from_entry)
                .collect::<Result<Vec<_>>>()?,
            (None, Some(length)) => vec![TorrentFile {
                path: PathBuf::from(&info.name),
                length,
            }],
            (None, None) => return Err(invalid("missing length")),
        };

        files
            .iter()
            .try_fold(0u64, |total, file| total.checked_add(file.length))
            .ok_or_else(|| invalid("total size overflows"))?;

        Ok(Self {
            name: info.name,
            files,
        })
    }

    /// Sum of all file lengths, saturating at `u64::MAX`.
    pub fn total_size(&self) -> u64 {
        self.files
            .iter()
            .fold(0u64, |total, file| total.saturating_add(file.length))
    }
}

fn file_from_entry(entry: FileEntry) -> Result<TorrentFile> {
    if entry.path.is_empty() {
        return Err(invalid("file entry without path"));
    }

    let mut path = PathBuf::new();
    for segment in &entry.path {
        if !is_safe_component(segment) {
            return Err(invalid("unsafe path segment"));
        }
        path.push(segment);
    }

    Ok(TorrentFile {
        path,
        length: entry.length,
    })
}

fn is_safe_component(segment: &str) -> bool {
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn invalid(reason: &str) -> StorageError {
    StorageError::InvalidLink(format!("torrent: {}", reason))
}
