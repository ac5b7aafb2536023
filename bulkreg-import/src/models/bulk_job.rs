//! Bulk execution job, a projection over a confirmed import session
//!
//! `job_id == import_id`: one confirmed session produces exactly one job.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ImportSession, SessionStatus};

/// Job-level status reported to polling clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Confirmed but the executor has not picked it up yet
    Pending,
    Processing,
    /// Finished running. Not "all succeeded": failed rows are counted
    Completed,
    /// The executor itself failed before finishing
    Error,
}

/// Monotonic row-outcome counters.
///
/// `success + failed <= total` at all times;
/// `success + failed + skipped == total` once the job completes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JobCounts {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub skipped: i64,
}

/// Snapshot of a running or finished job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub counts: JobCounts,
    pub progress_text: String,
    /// Percentage of eligible rows attempted, 0-100
    pub progress_percent: i64,
}

impl BulkJob {
    /// Project a job snapshot from a session header.
    ///
    /// Returns None while the session is still PREVIEWING: no job exists
    /// until the session is confirmed.
    pub fn from_session(session: &ImportSession) -> Option<Self> {
        let status = match session.status {
            SessionStatus::Previewing => return None,
            SessionStatus::Confirmed => JobStatus::Pending,
            SessionStatus::Processing => JobStatus::Processing,
            SessionStatus::Completed => JobStatus::Completed,
            SessionStatus::Failed => JobStatus::Error,
        };

        let eligible = session.total_rows - session.skipped_count;
        let progress_percent = if eligible > 0 {
            (session.processed_count * 100) / eligible
        } else {
            0
        };

        Some(Self {
            job_id: session.import_id,
            status,
            counts: JobCounts {
                total: session.total_rows,
                success: session.success_count,
                failed: session.failed_count,
                skipped: session.skipped_count,
            },
            progress_text: session.progress_text.clone(),
            progress_percent,
        })
    }
}
