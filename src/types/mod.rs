mod account;
mod job;
mod record;

pub use account::{Account, AccountId, QuotaSummary};
pub use job::{Job, JobId, JobKind, JobState, ProgressUpdate};
pub use record::FileRecord;
