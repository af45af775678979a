use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{AccountId, Job, JobId, JobKind, JobState, ProgressUpdate};

/// Shared registry of acquisition jobs.
///
/// Each job is written only by the task executing it; any number of callers
/// may read snapshots. A single lock guards the whole map.
#[derive(Debug, Clone, Default)]
pub struct JobTracker {
    jobs: Arc<Mutex<HashMap<JobId, Job>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, kind: JobKind, filename: &str, owner: AccountId) -> JobId {
        let job = Job::new(kind, filename, owner);
        let id = job.id;

        let mut jobs = self.jobs.lock().await;
        jobs.insert(id, job);
        id
    }

    /// Merges `update` into the job. Unknown ids and terminal jobs are left alone.
    pub async fn report_progress(&self, id: &JobId, update: ProgressUpdate) -> Option<Job> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(id)?;

        if job.state.is_terminal() {
            debug!(job = %id, state = %job.state, "ignoring update for finished job");
            return Some(job.clone());
        }

        let next_state = match update.state {
            Some(next) if job.state.can_transition_to(next) => next,
            _ => job.state,
        };

        let percent = update.percent.min(100);
        job.progress = match next_state {
            JobState::Failed => percent,
            JobState::Completed => percent.max(job.progress),
            JobState::Starting | JobState::Running => job.progress.max(percent),
        };

        match next_state {
            JobState::Completed => {
                if let Some(location) = update.result_location {
                    job.result_location = Some(location);
                }
            }
            JobState::Failed => {
                if let Some(detail) = update.error_detail {
                    job.error_detail = Some(detail);
                }
            }
            _ => {}
        }

        job.state = next_state;
        Some(job.clone())
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        let jobs = self.jobs.lock().await;
        jobs.get(id).cloned()
    }

    pub async fn list_by_owner(&self, owner: AccountId) -> Vec<Job> {
        let jobs = self.jobs.lock().await;
        let mut owned: Vec<Job> = jobs.values().filter(|j| j.owner == owner).cloned().collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        owned
    }

    pub async fn remove(&self, id: &JobId) -> Option<Job> {
        let mut jobs = self.jobs.lock().await;
        jobs.remove(id)
    }

    /// Drops finished jobs created more than `retention` ago.
    pub async fn sweep(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.state.is_terminal() && job.created_at < cutoff));
        before - jobs.len()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

/// Integer percentage of `done` over `total`, rounded down.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = done.min(total) as u128;
    (done * 100 / total as u128) as u8
}

/// Byte-count progress for a single job, handed to the code moving the data.
#[derive(Debug)]
pub struct ProgressReporter {
    tracker: JobTracker,
    job: JobId,
    total_bytes: u64,
    processed_bytes: AtomicU64,
}

impl ProgressReporter {
    pub fn new(tracker: JobTracker, job: JobId, total_bytes: u64) -> Self {
        Self {
            tracker,
            job,
            total_bytes,
            processed_bytes: AtomicU64::new(0),
        }
    }

    pub fn job(&self) -> JobId {
        self.job
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes.load(Ordering::Relaxed)
    }

    /// Records `bytes` more transferred and publishes the new percentage.
    pub async fn advance(&self, bytes: u64) -> u8 {
        let processed = self.processed_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let percent = percent_of(processed, self.total_bytes);
        self.tracker
            .report_progress(&self.job, ProgressUpdate::running(percent))
            .await;
        percent
    }
}

pub trait ProgressFormatter {
    fn format_progress(&self) -> String;
}

impl ProgressFormatter for Job {
    fn format_progress(&self) -> String {
        let mut line = format!("[{}] {} {:>3}% {}", self.id, self.filename, self.progress, self.state);
        if let Some(location) = &self.result_location {
            let _ = write!(line, " -> {}", location.display());
        }
        if let Some(detail) = &self.error_detail {
            let _ = write!(line, ": {}", detail);
        }
        line
    }
}

/// Human readable byte size, e.g. `1.50 GB`.
pub fn format_bytes(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes >= 1_073_741_824.0 {
        format!("{:.2} GB", bytes / 1_073_741_824.0)
    } else if bytes >= 1_048_576.0 {
        format!("{:.2} MB", bytes / 1_048_576.0)
    } else if bytes >= 1_024.0 {
        format!("{:.2} KB", bytes / 1_024.0)
    } else {
        format!("{:.0} B", bytes)
    }
}
