use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AccountId;

/// A finalized, archived file owned by an account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub id: Uuid,
    pub owner: AccountId,
    pub filename: String,
    pub stored_path: PathBuf,
    pub stored_size: u64,
    pub original_size: u64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}
