use tokio::fs;

use super::disk::calculate_checksum;
use crate::{FileRecord, Result, StorageError};

pub struct ValidationManager;

impl ValidationManager {
    /// Checks that the record's artifact is present and unchanged.
    pub async fn verify(record: &FileRecord) -> Result<()> {
        if !fs::try_exists(&record.stored_path).await? {
            return Err(StorageError::NotFound(format!(
                "artifact {} is missing",
                record.stored_path.display()
            )));
        }

        let size = fs::metadata(&record.stored_path).await?.len();
        if size != record.stored_size {
            return Err(StorageError::Storage(format!(
                "File size mismatch. Expected: {}, Got: {}",
                record.stored_size, size
            )));
        }

        let checksum = calculate_checksum(&record.stored_path).await?;
        if checksum != record.checksum {
            return Err(StorageError::Storage(format!(
                "checksum mismatch for {}",
                record.stored_path.display()
            )));
        }

        Ok(())
    }
}
