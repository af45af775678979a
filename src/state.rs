//! Process-wide state: created once at startup, handed to every command, and
//! shut down before exit.

use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tracing::info;

use crate::config::{ArchiverKind, Config};
use crate::source::{PlaceholderSource, SourceDescriptor};
use crate::storage::acquisition::JobRunner;
use crate::storage::compression::{Archiver, SevenZip, ZipArchiver};
use crate::storage::disk::{AccountStore, DiskStore};
use crate::storage::progress::JobTracker;
use crate::storage::quota::QuotaLedger;
use crate::{Account, AccountId, FileRecord, Job, JobId, QuotaSummary, Result, StorageError};

pub struct AppState {
    config: Config,
    ledger: QuotaLedger,
    tracker: JobTracker,
    store: Arc<dyn AccountStore>,
    runner: JobRunner,
}

impl AppState {
    pub async fn open(config: Config) -> Result<Self> {
        let store: Arc<dyn AccountStore> = Arc::new(DiskStore::new(&config.storage_root).await?);
        let archiver: Arc<dyn Archiver> = match config.archiver {
            ArchiverKind::SevenZip => Arc::new(SevenZip::new(config.seven_zip_program.clone())),
            ArchiverKind::Zip => Arc::new(ZipArchiver),
        };
        let source = Arc::new(PlaceholderSource::new(config.chunk_size, config.chunk_delay()));
        Self::with_parts(config, store, archiver, source).await
    }

    /// Builds the state around caller-supplied collaborators.
    pub async fn with_parts(
        config: Config,
        store: Arc<dyn AccountStore>,
        archiver: Arc<dyn Archiver>,
        source: Arc<dyn crate::source::RemoteSource>,
    ) -> Result<Self> {
        fs::create_dir_all(config.staging_dir()).await?;
        fs::create_dir_all(config.files_dir()).await?;

        let ledger = QuotaLedger::new();
        let accounts = store.load_accounts().await?;
        for account in &accounts {
            ledger.open(account.id, account.used_bytes, account.limit_bytes).await;
        }
        info!(accounts = accounts.len(), root = %config.storage_root.display(), "storage opened");

        let tracker = JobTracker::new();
        let runner = JobRunner::new(
            ledger.clone(),
            tracker.clone(),
            Arc::clone(&store),
            archiver,
            source,
            config.staging_dir(),
            config.files_dir(),
        );

        Ok(Self {
            config,
            ledger,
            tracker,
            store,
            runner,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Starts the periodic sweep of finished jobs.
    pub fn start_retention(&self, period: Duration) {
        self.runner.spawn_sweeper(period, self.config.job_retention());
    }

    pub async fn create_account(&self, id: AccountId, limit_bytes: Option<u64>) -> Result<QuotaSummary> {
        if self.ledger.account(id).await.is_some() {
            return Err(StorageError::Storage(format!("account {} already exists", id)));
        }
        let account = Account::new(id, limit_bytes.unwrap_or(self.config.default_limit_bytes));
        self.store.save_account(&account).await?;
        self.ledger.open(id, 0, account.limit_bytes).await;
        info!(account = %id, limit = account.limit_bytes, "account created");
        Ok(QuotaSummary::from(&account))
    }

    pub async fn set_limit(&self, id: AccountId, limit_bytes: u64) -> Result<QuotaSummary> {
        self.ledger.set_limit(id, limit_bytes).await?;
        self.store.set_limit(id, limit_bytes).await?;
        info!(account = %id, limit = limit_bytes, "limit changed");
        self.quota(id).await
    }

    pub async fn delete_account(&self, id: AccountId) -> Result<()> {
        for record in self.store.list_files(id).await? {
            self.delete_file(&record).await?;
        }
        self.store.delete_account(id).await?;
        self.ledger.close(id).await;
        info!(account = %id, "account deleted");
        Ok(())
    }

    pub async fn quota(&self, id: AccountId) -> Result<QuotaSummary> {
        self.ledger
            .summary(id)
            .await
            .ok_or_else(|| StorageError::NotFound(format!("account {}", id)))
    }

    pub async fn files(&self, owner: AccountId) -> Result<Vec<FileRecord>> {
        self.store.list_files(owner).await
    }

    /// Removes a stored file and returns its space to the owner.
    pub async fn delete_file(&self, record: &FileRecord) -> Result<()> {
        self.store.remove_file(&record.id).await?;
        match fs::remove_file(&record.stored_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(dir) = record.stored_path.parent() {
            // per-job directory; ignore if something else still lives there
            let _ = fs::remove_dir(dir).await;
        }
        self.ledger.reclaim(record.owner, record.stored_size).await;
        self.store.reclaim_usage(record.owner, record.stored_size).await
    }

    pub async fn create_upload_job(&self, owner: AccountId, path: &std::path::Path) -> Result<JobId> {
        self.runner.submit_upload(owner, path).await
    }

    pub async fn create_fetch_job(&self, owner: AccountId, descriptor: SourceDescriptor) -> Result<JobId> {
        self.runner.submit_fetch(owner, descriptor).await
    }

    /// Snapshot of a job, visible only to its owner.
    pub async fn job_status(&self, owner: AccountId, id: &JobId) -> Option<Job> {
        self.tracker.get(id).await.filter(|job| job.owner == owner)
    }

    pub async fn list_jobs(&self, owner: AccountId) -> Vec<Job> {
        self.tracker.list_by_owner(owner).await
    }

    pub async fn cancel_job(&self, owner: AccountId, id: &JobId) -> bool {
        if self.job_status(owner, id).await.is_none() {
            return false;
        }
        self.runner.cancel(id).await
    }

    pub async fn shutdown(&self) {
        self.runner.shutdown().await;
        info!("storage closed");
    }
}
