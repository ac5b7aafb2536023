//! Job executor: turns a confirmed import session into registrations
//!
//! Runs as a detached background task per confirmed job. Each row is
//! attempted in isolation; its outcome is persisted before the next row
//! starts, which is what makes a crashed-and-restarted job resumable
//! without re-attempting finished rows.

use bulkreg_common::{Error, Result};
use sqlx::SqlitePool;
use std::time::Duration;
use uuid::Uuid;

use crate::db::{registrations, rows, sessions};
use crate::models::{ImportRow, RowOutcome, SessionStatus};
use crate::services::row_validator::parse_window_datetime;

/// Progress text is refreshed every N rows, not on every row
const PROGRESS_EVERY: i64 = 10;

#[derive(Clone)]
pub struct JobExecutor {
    db: SqlitePool,
    /// Pause between row creations (0 = none)
    row_delay: Duration,
}

impl JobExecutor {
    pub fn new(db: SqlitePool, row_delay_ms: u64) -> Self {
        Self {
            db,
            row_delay: Duration::from_millis(row_delay_ms),
        }
    }

    /// Detach the job from the confirming request. Failures inside the
    /// task mark the job ERROR; they never reach the HTTP caller.
    pub fn spawn(self, import_id: Uuid, owner_id: i64) {
        tokio::spawn(async move {
            tracing::info!(import_id = %import_id, "Background import job started");

            match self.run(import_id, owner_id).await {
                Ok(()) => {
                    tracing::info!(import_id = %import_id, "Background import job finished");
                }
                Err(e) => {
                    tracing::error!(import_id = %import_id, error = %e, "Import job failed");

                    // Best effort: make sure the job is observably ERROR
                    // even when the failure path itself is broken
                    if let Err(mark_err) = sessions::set_status(
                        &self.db,
                        import_id,
                        SessionStatus::Failed,
                        Some(&format!("Import failed: {}", e)),
                    )
                    .await
                    {
                        tracing::error!(
                            import_id = %import_id,
                            error = %mark_err,
                            "Failed to mark import job as failed"
                        );
                    }
                }
            }
        });
    }

    /// Execute (or resume) one job to completion
    pub async fn run(&self, import_id: Uuid, owner_id: i64) -> Result<()> {
        let session = sessions::load_session(&self.db, import_id, owner_id)
            .await?
            .ok_or_else(|| {
                Error::Internal(format!("Session {} vanished before execution", import_id))
            })?;

        if session.is_terminal() {
            tracing::warn!(import_id = %import_id, "Job already terminal, nothing to execute");
            return Ok(());
        }

        sessions::set_status(
            &self.db,
            import_id,
            SessionStatus::Processing,
            Some("Starting import"),
        )
        .await?;

        // Only rows never attempted: a resumed job skips recorded outcomes
        let pending = rows::pending_rows(&self.db, import_id).await?;
        let total = session.total_rows;

        tracing::info!(
            import_id = %import_id,
            pending = pending.len(),
            total,
            "Executing import rows"
        );

        let mut since_progress = 0;
        for row in &pending {
            let outcome = self.attempt_row(owner_id, row).await;

            let (status, error) = match &outcome {
                Ok(()) => (RowOutcome::Success, None),
                Err(reason) => (RowOutcome::Failed, Some(reason.as_str())),
            };

            let recorded =
                rows::record_outcome(&self.db, import_id, row.row_index, status, error).await?;
            if !recorded {
                // Another executor (restart race) got here first
                tracing::warn!(
                    import_id = %import_id,
                    row_index = row.row_index,
                    "Row outcome already recorded, skipping"
                );
                continue;
            }

            since_progress += 1;
            if since_progress >= PROGRESS_EVERY {
                since_progress = 0;
                sessions::set_progress_text(
                    &self.db,
                    import_id,
                    &format!("Processing row {} of {}", row.row_index, total),
                )
                .await?;
            }

            if !self.row_delay.is_zero() {
                tokio::time::sleep(self.row_delay).await;
            }
        }

        let session = sessions::load_session(&self.db, import_id, owner_id)
            .await?
            .ok_or_else(|| {
                Error::Internal(format!("Session {} vanished during execution", import_id))
            })?;

        let summary = format!(
            "Completed: {} succeeded, {} failed, {} skipped",
            session.success_count, session.failed_count, session.skipped_count
        );
        sessions::set_status(&self.db, import_id, SessionStatus::Completed, Some(&summary)).await?;

        tracing::info!(
            import_id = %import_id,
            success = session.success_count,
            failed = session.failed_count,
            skipped = session.skipped_count,
            "Import job completed"
        );

        Ok(())
    }

    /// Attempt creation for one row. Every failure becomes a recorded
    /// reason; nothing propagates to sibling rows.
    async fn attempt_row(&self, owner_id: i64, row: &ImportRow) -> std::result::Result<(), String> {
        let candidate = row
            .parsed
            .as_ref()
            .ok_or_else(|| "Row has no parsed data".to_string())?;

        let group_id = row
            .effective_group_id()
            .ok_or_else(|| "Row has no resolved group".to_string())?;
        let program_id = row
            .program_id
            .ok_or_else(|| "Row has no resolved program".to_string())?;

        let registration = registrations::NewRegistration {
            owner_id,
            full_name: candidate.full_name.clone().unwrap_or_default(),
            email: candidate.email.clone().unwrap_or_default(),
            country_code: candidate.country_code.clone().unwrap_or_default(),
            mobile: candidate.mobile.clone().unwrap_or_default(),
            program_id,
            group_id,
            window_start: normalize_window(candidate.window_start.as_deref()),
            window_end: normalize_window(candidate.window_end.as_deref()),
        };

        match registrations::create_registration(&self.db, &registration).await {
            Ok(_) => Ok(()),
            Err(Error::Conflict(reason)) => Err(reason),
            Err(other) => Err(format!("Creation failed: {}", other)),
        }
    }
}

/// Re-home the confirmed-but-unfinished jobs left behind by a previous
/// process. Terminal rows keep their outcomes; only PENDING rows are
/// re-attempted.
pub async fn resume_unfinished(db: &SqlitePool, row_delay_ms: u64) -> Result<usize> {
    let unfinished = sessions::unfinished_sessions(db).await?;
    let count = unfinished.len();

    for session in unfinished {
        tracing::info!(
            import_id = %session.import_id,
            status = session.status.as_str(),
            "Resuming import job from previous run"
        );
        JobExecutor::new(db.clone(), row_delay_ms).spawn(session.import_id, session.owner_id);
    }

    Ok(count)
}

/// Store window timestamps in one canonical shape
fn normalize_window(value: Option<&str>) -> Option<String> {
    value
        .and_then(parse_window_datetime)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}
