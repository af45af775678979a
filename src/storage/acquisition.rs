//! Background acquisition jobs.
//!
//! A job is admitted against the quota ledger before anything is spawned.
//! The spawned task owns the job's tracker entry until it reaches a terminal
//! state. Errors and panics inside the task end up in the job as `failed`;
//! they never reach the caller that submitted it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::compression::{artifact_path, Archiver};
use super::disk::{calculate_checksum, AccountStore};
use super::progress::{JobTracker, ProgressReporter};
use super::quota::QuotaLedger;
use crate::source::{RemoteSource, SourceDescriptor};
use crate::{AccountId, FileRecord, JobId, JobKind, ProgressUpdate, Result, StorageError};

#[derive(Debug, Clone)]
enum Payload {
    Local(PathBuf),
    Remote(SourceDescriptor),
}

#[derive(Debug, Clone)]
struct Plan {
    job: JobId,
    owner: AccountId,
    filename: String,
    reserved: u64,
    payload: Payload,
}

#[derive(Clone)]
pub struct JobRunner {
    ledger: QuotaLedger,
    tracker: JobTracker,
    store: Arc<dyn AccountStore>,
    archiver: Arc<dyn Archiver>,
    source: Arc<dyn RemoteSource>,
    staging_dir: PathBuf,
    files_dir: PathBuf,
    tasks: TaskTracker,
    background: TaskTracker,
    shutdown: CancellationToken,
    cancels: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl JobRunner {
    pub fn new(
        ledger: QuotaLedger,
        tracker: JobTracker,
        store: Arc<dyn AccountStore>,
        archiver: Arc<dyn Archiver>,
        source: Arc<dyn RemoteSource>,
        staging_dir: PathBuf,
        files_dir: PathBuf,
    ) -> Self {
        Self {
            ledger,
            tracker,
            store,
            archiver,
            source,
            staging_dir,
            files_dir,
            tasks: TaskTracker::new(),
            background: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            cancels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Archives a local file into the owner's storage.
    pub async fn submit_upload<P: AsRef<Path>>(&self, owner: AccountId, path: P) -> Result<JobId> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(path.display().to_string()));
        }
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::Storage(format!("invalid filename: {}", path.display())))?
            .to_string();

        let size = metadata.len();
        self.ledger.try_admit(owner, size).await?;

        let job = self.tracker.register(JobKind::DirectUpload, &filename, owner).await;
        info!(job = %job, owner = %owner, file = %filename, size, "upload accepted");

        self.spawn(Plan {
            job,
            owner,
            filename,
            reserved: size,
            payload: Payload::Local(path.to_path_buf()),
        })
        .await;
        Ok(job)
    }

    /// Fetches a remote payload described by `descriptor`.
    pub async fn submit_fetch(&self, owner: AccountId, descriptor: SourceDescriptor) -> Result<JobId> {
        let size = descriptor.total_size();
        self.ledger.try_admit(owner, size).await?;

        let filename = descriptor.display_name().to_string();
        let job = self.tracker.register(JobKind::RemoteFetch, &filename, owner).await;
        info!(job = %job, owner = %owner, file = %filename, size, "fetch accepted");

        self.spawn(Plan {
            job,
            owner,
            filename,
            reserved: size,
            payload: Payload::Remote(descriptor),
        })
        .await;
        Ok(job)
    }

    /// Stops tracking `job` and signals its task to stop.
    ///
    /// Returns false if the job was not tracked.
    pub async fn cancel(&self, job: &JobId) -> bool {
        let removed = self.tracker.remove(job).await.is_some();
        if let Some(token) = self.cancels.lock().await.remove(job) {
            token.cancel();
            info!(job = %job, "cancellation requested");
        }
        removed
    }

    /// Number of acquisition tasks still running.
    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    /// Waits until every task spawned so far has finished.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Cancels outstanding work and joins every task.
    pub async fn shutdown(&self) {
        info!(active = self.tasks.len(), "stopping acquisition tasks");
        self.shutdown.cancel();
        self.tasks.close();
        self.background.close();
        self.tasks.wait().await;
        self.background.wait().await;
    }

    /// Periodically drops finished jobs older than `retention`.
    pub fn spawn_sweeper(&self, period: Duration, retention: chrono::Duration) {
        let tracker = self.tracker.clone();
        let cancel = self.shutdown.clone();
        self.background.spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = tracker.sweep(retention).await;
                        if removed > 0 {
                            debug!(removed, "swept finished jobs");
                        }
                    }
                }
            }
        });
    }

    async fn spawn(&self, plan: Plan) {
        let cancel = self.shutdown.child_token();
        self.cancels.lock().await.insert(plan.job, cancel.clone());

        let runner = self.clone();
        self.tasks.spawn(async move { runner.supervise(plan, cancel).await });
    }

    async fn supervise(self, plan: Plan, cancel: CancellationToken) {
        let job = plan.job;
        let owner = plan.owner;
        let reserved = plan.reserved;
        let staging = self.staging_dir.join(job.to_string());
        let output_dir = self.files_dir.join(job.to_string());
        let settled = Arc::new(AtomicBool::new(false));

        let worker = {
            let runner = self.clone();
            let staging = staging.clone();
            let output_dir = output_dir.clone();
            let settled = Arc::clone(&settled);
            tokio::spawn(async move {
                runner
                    .execute(&plan, &staging, &output_dir, &cancel, &settled)
                    .await
            })
        };

        let outcome = match worker.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(StorageError::Unknown("acquisition task panicked".to_string())),
            Err(e) => Err(StorageError::Unknown(e.to_string())),
        };

        remove_path(&staging).await;
        self.cancels.lock().await.remove(&job);

        match outcome {
            Ok(location) => {
                info!(job = %job, owner = %owner, location = %location.display(), "job completed");
                self.tracker
                    .report_progress(&job, ProgressUpdate::completed(location))
                    .await;
            }
            Err(e) => {
                if !settled.load(Ordering::SeqCst) {
                    self.ledger.release(owner, reserved).await;
                }
                remove_path(&output_dir).await;

                match &e {
                    StorageError::Cancelled => info!(job = %job, "job cancelled"),
                    _ => error!(job = %job, owner = %owner, error = %e, "job failed"),
                }

                let progress = self.tracker.get(&job).await.map(|j| j.progress).unwrap_or(0);
                self.tracker
                    .report_progress(&job, ProgressUpdate::failed(progress, e.to_string()))
                    .await;
            }
        }
    }

    async fn execute(
        &self,
        plan: &Plan,
        staging: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
        settled: &AtomicBool,
    ) -> Result<PathBuf> {
        if self.is_stopped(&plan.job, cancel).await {
            return Err(StorageError::Cancelled);
        }
        self.tracker
            .report_progress(&plan.job, ProgressUpdate::running(0))
            .await;

        let input = match &plan.payload {
            Payload::Local(path) => path.clone(),
            Payload::Remote(descriptor) => {
                fs::create_dir_all(staging).await?;
                let reporter = ProgressReporter::new(self.tracker.clone(), plan.job, descriptor.total_size());
                self.source.fetch(descriptor, staging, &reporter, cancel).await?
            }
        };

        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        fs::create_dir_all(output_dir).await?;
        let artifact = artifact_path(output_dir, &plan.filename, self.archiver.extension());
        let stored_size = self.archiver.archive(&input, &artifact).await?;
        let checksum = calculate_checksum(&artifact).await?;

        if self.is_stopped(&plan.job, cancel).await {
            return Err(StorageError::Cancelled);
        }

        // the reservation is consumed by commit whether or not it succeeds
        settled.store(true, Ordering::SeqCst);
        self.ledger.commit(plan.owner, plan.reserved, stored_size).await?;

        let record = FileRecord {
            id: Uuid::new_v4(),
            owner: plan.owner,
            filename: plan.filename.clone(),
            stored_path: artifact.clone(),
            stored_size,
            original_size: plan.reserved,
            checksum,
            created_at: Utc::now(),
        };

        if let Err(e) = self.persist(&record).await {
            self.ledger.reclaim(plan.owner, stored_size).await;
            return Err(e);
        }

        debug!(job = %plan.job, original = plan.reserved, stored = stored_size, "payload archived");
        Ok(artifact)
    }

    /// A job is stopped once its token fires or it is no longer tracked.
    async fn is_stopped(&self, job: &JobId, cancel: &CancellationToken) -> bool {
        cancel.is_cancelled() || self.tracker.get(job).await.is_none()
    }

    async fn persist(&self, record: &FileRecord) -> Result<()> {
        self.store.insert_file(record).await?;
        if let Err(e) = self.store.add_usage(record.owner, record.stored_size).await {
            if let Err(undo) = self.store.remove_file(&record.id).await {
                warn!(file = %record.id, error = %undo, "could not roll back file record");
            }
            return Err(e);
        }
        Ok(())
    }
}

async fn remove_path(path: &Path) {
    let result = match fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await,
        Ok(_) => fs::remove_file(path).await,
        Err(_) => return,
    };
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "cleanup failed");
    }
}
