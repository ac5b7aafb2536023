//! Import session persistence and lifecycle transitions
//!
//! The session store is the single source of truth. `confirm_session`
//! serializes confirmation per import via a conditional state-transition
//! write, which is what guarantees at-most-one job under concurrent
//! duplicate confirms.

use bulkreg_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::rows;
use crate::models::{BulkJob, ImportRow, ImportSession, SessionStatus};

/// Outcome of a confirm call
#[derive(Debug)]
pub enum ConfirmOutcome {
    /// This caller won the transition; it must spawn the executor
    Started(BulkJob),
    /// Another caller already confirmed; observe its job
    AlreadyConfirmed(BulkJob),
}

impl ConfirmOutcome {
    pub fn job(&self) -> &BulkJob {
        match self {
            ConfirmOutcome::Started(job) => job,
            ConfirmOutcome::AlreadyConfirmed(job) => job,
        }
    }
}

/// Persist a new session header and its rows
pub async fn create_session(
    pool: &SqlitePool,
    session: &ImportSession,
    rows: &[ImportRow],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO import_sessions (
            import_id, owner_id, status, filename,
            total_rows, success_count, failed_count, skipped_count, processed_count,
            progress_text, created_at, expires_at, completed_at
        ) VALUES (?, ?, ?, ?, ?, 0, 0, 0, 0, ?, ?, ?, NULL)
        "#,
    )
    .bind(session.import_id.to_string())
    .bind(session.owner_id)
    .bind(session.status.as_str())
    .bind(&session.filename)
    .bind(session.total_rows)
    .bind(&session.progress_text)
    .bind(session.created_at.to_rfc3339())
    .bind(session.expires_at.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    for row in rows {
        rows::insert_row(&mut tx, session.import_id, row).await?;
    }

    tx.commit().await?;

    tracing::info!(
        import_id = %session.import_id,
        owner_id = session.owner_id,
        total_rows = session.total_rows,
        "Import session created"
    );

    Ok(())
}

/// Tenant-isolated session lookup. A session belonging to another owner
/// is indistinguishable from a missing one.
pub async fn load_session(
    pool: &SqlitePool,
    import_id: Uuid,
    owner_id: i64,
) -> Result<Option<ImportSession>> {
    let row = sqlx::query(
        r#"
        SELECT import_id, owner_id, status, filename,
               total_rows, success_count, failed_count, skipped_count, processed_count,
               progress_text, created_at, expires_at, completed_at
        FROM import_sessions
        WHERE import_id = ? AND owner_id = ?
        "#,
    )
    .bind(import_id.to_string())
    .bind(owner_id)
    .fetch_optional(pool)
    .await?;

    row.map(session_from_row).transpose()
}

/// Apply user overrides to rows of a reviewable session.
///
/// Each override resolves one row's group; only rows that are not INVALID
/// accept an override. Confirmation freezes eligibility: a session still
/// accepts overrides while CONFIRMED, but rows already skipped at confirm
/// can no longer be rescued - only re-applying to rows that were eligible
/// remains possible.
pub async fn apply_overrides(
    pool: &SqlitePool,
    import_id: Uuid,
    owner_id: i64,
    overrides: &[(i64, i64)],
) -> Result<ImportSession> {
    let session = load_session(pool, import_id, owner_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Import session not found: {}", import_id)))?;

    if !matches!(
        session.status,
        SessionStatus::Previewing | SessionStatus::Confirmed
    ) {
        return Err(Error::Conflict(format!(
            "Session is {}, overrides are no longer accepted",
            session.status.as_str()
        )));
    }

    for &(row_index, group_id) in overrides {
        // Override must point at a group this owner can actually see
        let group = crate::db::catalog::get_group(pool, owner_id, group_id)
            .await?
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Override for row {} references unknown group {}",
                    row_index, group_id
                ))
            })?;

        let applied = rows::set_override(pool, import_id, row_index, group.group_id).await?;
        if !applied {
            return Err(Error::InvalidInput(format!(
                "Row {} cannot be overridden: it does not exist, is INVALID, \
                 or its eligibility was frozen at confirmation",
                row_index
            )));
        }
    }

    tracing::info!(
        import_id = %import_id,
        overrides = overrides.len(),
        "Overrides applied"
    );

    load_session(pool, import_id, owner_id)
        .await?
        .ok_or_else(|| Error::Internal("Session vanished while applying overrides".to_string()))
}

/// Confirm a session, transitioning PREVIEWING → CONFIRMED exactly once.
///
/// Safe under concurrent duplicate confirms: the conditional UPDATE admits
/// one winner; every other caller observes the already-created job.
pub async fn confirm_session(
    pool: &SqlitePool,
    import_id: Uuid,
    owner_id: i64,
) -> Result<ConfirmOutcome> {
    let session = load_session(pool, import_id, owner_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Import session not found: {}", import_id)))?;

    if session.is_expired(Utc::now()) {
        return Err(Error::InvalidInput(format!(
            "Import session {} expired at {}; upload the file again",
            import_id, session.expires_at
        )));
    }

    if session.status == SessionStatus::Previewing {
        let eligible = rows::count_eligible(pool, import_id).await?;
        if eligible == 0 {
            return Err(Error::InvalidInput(
                "No rows are eligible for import; fix the file or apply overrides first"
                    .to_string(),
            ));
        }
    }

    let result = sqlx::query(
        r#"
        UPDATE import_sessions
        SET status = 'CONFIRMED', progress_text = 'Queued'
        WHERE import_id = ? AND status = 'PREVIEWING'
        "#,
    )
    .bind(import_id.to_string())
    .execute(pool)
    .await?;

    let won = result.rows_affected() == 1;

    if won {
        // Freeze eligibility: ineligible rows will never be attempted
        let skipped = rows::mark_ineligible_skipped(pool, import_id).await?;
        sqlx::query("UPDATE import_sessions SET skipped_count = ? WHERE import_id = ?")
            .bind(skipped as i64)
            .bind(import_id.to_string())
            .execute(pool)
            .await?;

        tracing::info!(
            import_id = %import_id,
            skipped,
            "Import session confirmed, job created"
        );
    }

    let session = load_session(pool, import_id, owner_id)
        .await?
        .ok_or_else(|| Error::Internal("Session vanished during confirm".to_string()))?;
    let job = BulkJob::from_session(&session)
        .ok_or_else(|| Error::Internal("Confirmed session has no job projection".to_string()))?;

    if won {
        Ok(ConfirmOutcome::Started(job))
    } else {
        Ok(ConfirmOutcome::AlreadyConfirmed(job))
    }
}

/// Transition the session's status, with an optional progress message
pub async fn set_status(
    pool: &SqlitePool,
    import_id: Uuid,
    status: SessionStatus,
    progress_text: Option<&str>,
) -> Result<()> {
    let completed_at = if status.is_terminal() {
        Some(Utc::now().to_rfc3339())
    } else {
        None
    };

    match progress_text {
        Some(text) => {
            sqlx::query(
                r#"
                UPDATE import_sessions
                SET status = ?, progress_text = ?, completed_at = COALESCE(?, completed_at)
                WHERE import_id = ?
                "#,
            )
            .bind(status.as_str())
            .bind(text)
            .bind(completed_at)
            .bind(import_id.to_string())
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                UPDATE import_sessions
                SET status = ?, completed_at = COALESCE(?, completed_at)
                WHERE import_id = ?
                "#,
            )
            .bind(status.as_str())
            .bind(completed_at)
            .bind(import_id.to_string())
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

/// Update the free-form progress text (bounded cadence, executor-driven)
pub async fn set_progress_text(pool: &SqlitePool, import_id: Uuid, text: &str) -> Result<()> {
    sqlx::query("UPDATE import_sessions SET progress_text = ? WHERE import_id = ?")
        .bind(text)
        .bind(import_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete unconfirmed sessions past their expiry, with their rows.
/// Confirmed and running sessions are never swept.
pub async fn sweep_expired(pool: &SqlitePool) -> Result<u64> {
    let now = Utc::now().to_rfc3339();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        DELETE FROM import_rows
        WHERE import_id IN (
            SELECT import_id FROM import_sessions
            WHERE status = 'PREVIEWING' AND expires_at < ?
        )
        "#,
    )
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM import_sessions WHERE status = 'PREVIEWING' AND expires_at < ?")
        .bind(&now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let swept = result.rows_affected();
    if swept > 0 {
        tracing::info!(swept, "Expired import sessions reclaimed");
    }

    Ok(swept)
}

/// Sessions confirmed but not finished when the service last stopped.
/// Their executors died with the process; they must be resumed.
pub async fn unfinished_sessions(pool: &SqlitePool) -> Result<Vec<ImportSession>> {
    let rows = sqlx::query(
        r#"
        SELECT import_id, owner_id, status, filename,
               total_rows, success_count, failed_count, skipped_count, processed_count,
               progress_text, created_at, expires_at, completed_at
        FROM import_sessions
        WHERE status IN ('CONFIRMED', 'PROCESSING')
        ORDER BY created_at
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(session_from_row).collect()
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

fn session_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ImportSession> {
    let import_id: String = row.get("import_id");
    let import_id = Uuid::parse_str(&import_id)
        .map_err(|e| Error::Internal(format!("Failed to parse import_id: {}", e)))?;

    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let expires_at: String = row.get("expires_at");
    let completed_at: Option<String> = row.get("completed_at");

    Ok(ImportSession {
        import_id,
        owner_id: row.get("owner_id"),
        status: SessionStatus::parse(&status)?,
        filename: row.get("filename"),
        total_rows: row.get("total_rows"),
        success_count: row.get("success_count"),
        failed_count: row.get("failed_count"),
        skipped_count: row.get("skipped_count"),
        processed_count: row.get("processed_count"),
        progress_text: row.get("progress_text"),
        created_at: parse_timestamp(&created_at)?,
        expires_at: parse_timestamp(&expires_at)?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}
