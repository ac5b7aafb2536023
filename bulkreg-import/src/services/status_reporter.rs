//! Job status reporting: the read path used by polling clients
//!
//! Every read reflects the latest durably-committed state; there is no
//! cache between the tables and the caller.

use bulkreg_common::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{rows, sessions};
use crate::models::{BulkJob, ImportRow, RowOutcome, RowValidation};

/// Snapshot of a running or finished job. A session still in review has
/// no job, and another owner's job is indistinguishable from a missing one.
pub async fn job_status(pool: &SqlitePool, job_id: Uuid, owner_id: i64) -> Result<BulkJob> {
    let session = sessions::load_session(pool, job_id, owner_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Job not found: {}", job_id)))?;

    BulkJob::from_session(&session)
        .ok_or_else(|| Error::NotFound(format!("No job exists yet for import {}", job_id)))
}

/// Full row list with outcomes, always in original file order
pub async fn session_rows(
    pool: &SqlitePool,
    import_id: Uuid,
    owner_id: i64,
) -> Result<Vec<ImportRow>> {
    // Tenant-isolated existence check before touching rows
    sessions::load_session(pool, import_id, owner_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Import session not found: {}", import_id)))?;

    rows::load_rows(pool, import_id).await
}

/// Downloadable error report: one line per row that did not produce a
/// registration - FAILED, INVALID, or skipped over an unresolved review
/// verdict - in original file order, built from actual execution outcomes
/// rather than preview-time validation alone.
///
/// Columns: Row No, Name, Email, Mobile, Error Message - quoted, stable
/// order.
pub async fn error_report_csv(
    pool: &SqlitePool,
    import_id: Uuid,
    owner_id: i64,
) -> Result<String> {
    let rows = session_rows(pool, import_id, owner_id).await?;

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());

    writer
        .write_record(["Row No", "Name", "Email", "Mobile", "Error Message"])
        .map_err(|e| Error::Internal(format!("Failed to write report header: {}", e)))?;

    for row in &rows {
        let reason = match (row.outcome, row.validation_status) {
            (RowOutcome::Failed, _) => row
                .outcome_error
                .clone()
                .unwrap_or_else(|| "Creation failed".to_string()),
            (_, RowValidation::Invalid) => row
                .validation_message
                .clone()
                .unwrap_or_else(|| "Invalid row".to_string()),
            // Unresolved NEEDS_REVIEW rows frozen out at confirmation
            (RowOutcome::Skipped, RowValidation::NeedsReview) => row
                .validation_message
                .clone()
                .unwrap_or_else(|| "Skipped: unresolved review".to_string()),
            _ => continue,
        };

        let candidate = row.parsed.clone().unwrap_or_default();
        writer
            .write_record([
                row.row_index.to_string(),
                candidate.full_name.unwrap_or_default(),
                candidate.email.unwrap_or_default(),
                candidate.mobile.unwrap_or_default(),
                reason,
            ])
            .map_err(|e| Error::Internal(format!("Failed to write report row: {}", e)))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Internal(format!("Failed to finish report: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| Error::Internal(format!("Report is not UTF-8: {}", e)))
}
