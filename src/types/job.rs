use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AccountId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    DirectUpload,
    RemoteFetch,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Starting,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Completed | JobState::Failed, _) => false,
            (JobState::Running, JobState::Starting) => false,
            _ => true,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Starting => "starting",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub owner: AccountId,
    pub kind: JobKind,
    pub filename: String,
    pub progress: u8,
    pub state: JobState,
    pub result_location: Option<PathBuf>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: JobKind, filename: &str, owner: AccountId) -> Self {
        Self {
            id: JobId::new(),
            owner,
            kind,
            filename: filename.to_string(),
            progress: 0,
            state: JobState::Starting,
            result_location: None,
            error_detail: None,
            created_at: Utc::now(),
        }
    }
}

/// Fields to merge into a tracked job. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub state: Option<JobState>,
    pub result_location: Option<PathBuf>,
    pub error_detail: Option<String>,
}

impl ProgressUpdate {
    pub fn percent(percent: u8) -> Self {
        Self {
            percent,
            ..Self::default()
        }
    }

    pub fn running(percent: u8) -> Self {
        Self::percent(percent).with_state(JobState::Running)
    }

    pub fn completed(location: PathBuf) -> Self {
        Self::percent(100)
            .with_state(JobState::Completed)
            .with_result_location(location)
    }

    pub fn failed(percent: u8, detail: impl Into<String>) -> Self {
        Self::percent(percent)
            .with_state(JobState::Failed)
            .with_error_detail(detail)
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_result_location(mut self, location: PathBuf) -> Self {
        self.result_location = Some(location);
        self
    }

    pub fn with_error_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }
}
