use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::source::DEFAULT_CHUNK_SIZE;
use crate::storage::quota::DEFAULT_LIMIT_BYTES;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiverKind {
    #[serde(rename = "7z")]
    SevenZip,
    Zip,
}

/// Runtime settings. Every field has a default so a partial JSON file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for account data, staging areas and archived files
    pub storage_root: PathBuf,
    /// Capacity given to newly created accounts
    pub default_limit_bytes: u64,
    pub archiver: ArchiverKind,
    /// Program invoked for the 7z archiver
    pub seven_zip_program: PathBuf,
    /// Placeholder transfer chunk size
    pub chunk_size: usize,
    /// Pause after each placeholder chunk
    pub chunk_delay_ms: u64,
    /// How long finished jobs stay visible before the sweep drops them
    pub job_retention_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let storage_root = dirs::data_dir()
            .map(|dir| dir.join("netdisk"))
            .unwrap_or_else(|| PathBuf::from("./storage"));

        Self {
            storage_root,
            default_limit_bytes: DEFAULT_LIMIT_BYTES,
            archiver: ArchiverKind::SevenZip,
            seven_zip_program: PathBuf::from("7z"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay_ms: 100,
            job_retention_secs: 24 * 60 * 60,
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn with_storage_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.storage_root = root.into();
        self
    }

    pub fn with_archiver(mut self, archiver: ArchiverKind) -> Self {
        self.archiver = archiver;
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_default_limit(mut self, limit_bytes: u64) -> Self {
        self.default_limit_bytes = limit_bytes;
        self
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn job_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.job_retention_secs.min(i64::MAX as u64) as i64)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.storage_root.join("staging")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.storage_root.join("files")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"archiver": "zip", "chunk_delay_ms": 0}"#).unwrap();

        assert_eq!(config.archiver, ArchiverKind::Zip);
        assert_eq!(config.chunk_delay(), Duration::ZERO);
        assert_eq!(config.default_limit_bytes, DEFAULT_LIMIT_BYTES);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_seven_zip_name() {
        let config: Config = serde_json::from_str(r#"{"archiver": "7z"}"#).unwrap();
        assert_eq!(config.archiver, ArchiverKind::SevenZip);
    }
}
