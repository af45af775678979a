use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::{Account, AccountId, FileRecord, Result, StorageError};

/// Durable record of accounts and finished files.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn load_accounts(&self) -> Result<Vec<Account>>;
    async fn save_account(&self, account: &Account) -> Result<()>;
    async fn delete_account(&self, id: AccountId) -> Result<()>;
    /// Atomically adds `bytes` to the account's committed usage.
    async fn add_usage(&self, id: AccountId, bytes: u64) -> Result<()>;
    /// Atomically subtracts `bytes` from the committed usage, stopping at zero.
    async fn reclaim_usage(&self, id: AccountId, bytes: u64) -> Result<()>;
    /// Changes the capacity without touching the recorded usage.
    async fn set_limit(&self, id: AccountId, limit_bytes: u64) -> Result<()>;
    async fn insert_file(&self, record: &FileRecord) -> Result<()>;
    async fn list_files(&self, owner: AccountId) -> Result<Vec<FileRecord>>;
    async fn remove_file(&self, id: &Uuid) -> Result<FileRecord>;
}

/// JSON files on local disk: `accounts.json` plus one metadata file per record.
#[derive(Debug, Clone)]
pub struct DiskStore {
    accounts_path: PathBuf,
    metadata_path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl DiskStore {
    pub async fn new<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let base_path = base_path.as_ref().to_owned();
        let metadata_path = base_path.join("metadata");

        fs::create_dir_all(&metadata_path).await?;

        Ok(Self {
            accounts_path: base_path.join("accounts.json"),
            metadata_path,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn get_metadata_path(&self, id: &Uuid) -> PathBuf {
        self.metadata_path.join(format!("{}.json", id))
    }

    async fn read_accounts(&self) -> Result<BTreeMap<AccountId, Account>> {
        if !fs::try_exists(&self.accounts_path).await? {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.accounts_path).await?;
        let accounts: Vec<Account> = serde_json::from_str(&content)?;
        Ok(accounts.into_iter().map(|a| (a.id, a)).collect())
    }

    async fn write_accounts(&self, accounts: &BTreeMap<AccountId, Account>) -> Result<()> {
        let list: Vec<&Account> = accounts.values().collect();
        let json = serde_json::to_string_pretty(&list)?;
        let tmp = self.accounts_path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.accounts_path).await?;
        Ok(())
    }

    async fn read_record(path: &Path) -> Result<FileRecord> {
        let content = fs::read_to_string(path).await?;
        serde_json::from_str(&content)
            .map_err(|e| StorageError::Storage(format!("Failed to parse metadata: {}", e)))
    }
}

#[async_trait]
impl AccountStore for DiskStore {
    async fn load_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.read_accounts().await?.into_values().collect())
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut accounts = self.read_accounts().await?;
        accounts.insert(account.id, account.clone());
        self.write_accounts(&accounts).await
    }

    async fn delete_account(&self, id: AccountId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut accounts = self.read_accounts().await?;
        if accounts.remove(&id).is_none() {
            return Err(StorageError::NotFound(format!("account {}", id)));
        }
        self.write_accounts(&accounts).await
    }

    async fn add_usage(&self, id: AccountId, bytes: u64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut accounts = self.read_accounts().await?;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("account {}", id)))?;
        account.used_bytes += bytes;
        self.write_accounts(&accounts).await
    }

    async fn reclaim_usage(&self, id: AccountId, bytes: u64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut accounts = self.read_accounts().await?;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("account {}", id)))?;
        account.used_bytes = account.used_bytes.saturating_sub(bytes);
        self.write_accounts(&accounts).await
    }

    async fn set_limit(&self, id: AccountId, limit_bytes: u64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut accounts = self.read_accounts().await?;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("account {}", id)))?;
        account.limit_bytes = limit_bytes;
        self.write_accounts(&accounts).await
    }

    async fn insert_file(&self, record: &FileRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        fs::write(self.get_metadata_path(&record.id), json).await?;
        Ok(())
    }

    async fn list_files(&self, owner: AccountId) -> Result<Vec<FileRecord>> {
        let mut files = Vec::new();

        let mut entries = fs::read_dir(&self.metadata_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match Self::read_record(&path).await {
                    Ok(record) if record.owner == owner => files.push(record),
                    Ok(_) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
                }
            }
        }

        files.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(files)
    }

    async fn remove_file(&self, id: &Uuid) -> Result<FileRecord> {
        let path = self.get_metadata_path(id);
        if !fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(id.to_string()));
        }
        let record = Self::read_record(&path).await?;
        fs::remove_file(&path).await?;
        Ok(record)
    }
}

/// Hex SHA-256 of a file's contents.
pub async fn calculate_checksum(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
