//! Per-row persistence for import sessions
//!
//! Rows are keyed by (import_id, row_index) and always read back in
//! original file order. Outcome writes are guarded so a row is attempted
//! at most once even across executor restarts.

use bulkreg_common::{Error, Result};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::db::retry::retry_on_lock;
use crate::models::{GroupCandidate, ImportRow, ParsedCandidate, RowOutcome, RowValidation};

const OUTCOME_WRITE_MAX_WAIT_MS: u64 = 5000;

/// Insert one row inside the session-creation transaction
pub async fn insert_row(
    tx: &mut Transaction<'_, Sqlite>,
    import_id: Uuid,
    row: &ImportRow,
) -> Result<()> {
    let raw_data = serde_json::to_string(&row.raw_data)
        .map_err(|e| Error::Internal(format!("Failed to serialize raw row data: {}", e)))?;
    let parsed = row
        .parsed
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize parsed row: {}", e)))?;
    let candidates = serde_json::to_string(&row.group_candidates)
        .map_err(|e| Error::Internal(format!("Failed to serialize group candidates: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO import_rows (
            import_id, row_index, raw_data, parsed,
            validation_status, validation_message, program_id,
            matched_group_id, group_candidates,
            overridden, override_group_id, outcome, outcome_error
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, 'PENDING', NULL)
        "#,
    )
    .bind(import_id.to_string())
    .bind(row.row_index)
    .bind(raw_data)
    .bind(parsed)
    .bind(row.validation_status.as_str())
    .bind(&row.validation_message)
    .bind(row.program_id)
    .bind(row.matched_group_id)
    .bind(candidates)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Full row list, always in original file order regardless of
/// execution completion order
pub async fn load_rows(pool: &SqlitePool, import_id: Uuid) -> Result<Vec<ImportRow>> {
    let rows = sqlx::query(
        r#"
        SELECT row_index, raw_data, parsed,
               validation_status, validation_message, program_id,
               matched_group_id, group_candidates,
               overridden, override_group_id, outcome, outcome_error
        FROM import_rows
        WHERE import_id = ?
        ORDER BY row_index ASC
        "#,
    )
    .bind(import_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_from_db).collect()
}

/// Rows still awaiting execution, in original file order
pub async fn pending_rows(pool: &SqlitePool, import_id: Uuid) -> Result<Vec<ImportRow>> {
    let rows = sqlx::query(
        r#"
        SELECT row_index, raw_data, parsed,
               validation_status, validation_message, program_id,
               matched_group_id, group_candidates,
               overridden, override_group_id, outcome, outcome_error
        FROM import_rows
        WHERE import_id = ? AND outcome = 'PENDING'
        ORDER BY row_index ASC
        "#,
    )
    .bind(import_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_from_db).collect()
}

/// Apply a group override to one row. Returns false when the row does not
/// exist, is INVALID (no override can make it eligible), or its outcome is
/// no longer PENDING - skipped at confirmation or already executed.
pub async fn set_override(
    pool: &SqlitePool,
    import_id: Uuid,
    row_index: i64,
    group_id: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE import_rows
        SET overridden = 1, override_group_id = ?
        WHERE import_id = ? AND row_index = ?
          AND validation_status != 'INVALID' AND outcome = 'PENDING'
        "#,
    )
    .bind(group_id)
    .bind(import_id.to_string())
    .bind(row_index)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark every row that will never be attempted as SKIPPED.
/// Called once, at confirm time.
pub async fn mark_ineligible_skipped(pool: &SqlitePool, import_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE import_rows
        SET outcome = 'SKIPPED'
        WHERE import_id = ? AND outcome = 'PENDING'
          AND (validation_status = 'INVALID'
               OR (validation_status = 'NEEDS_REVIEW' AND overridden = 0))
        "#,
    )
    .bind(import_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Count of rows that would be attempted if the session were confirmed now
pub async fn count_eligible(pool: &SqlitePool, import_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM import_rows
        WHERE import_id = ?
          AND (validation_status = 'READY'
               OR (validation_status = 'NEEDS_REVIEW' AND overridden = 1))
        "#,
    )
    .bind(import_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Durably record one row's execution outcome and bump the session
/// counters in the same transaction.
///
/// The `outcome = 'PENDING'` guard makes this write exactly-once: a
/// restarted executor re-reading the session cannot double-record or
/// double-count a row. Returns false when the row was already recorded.
pub async fn record_outcome(
    pool: &SqlitePool,
    import_id: Uuid,
    row_index: i64,
    outcome: RowOutcome,
    error: Option<&str>,
) -> Result<bool> {
    let counter = match outcome {
        RowOutcome::Success => "success_count",
        RowOutcome::Failed => "failed_count",
        _ => {
            return Err(Error::Internal(format!(
                "Executor may only record SUCCESS or FAILED, got {}",
                outcome.as_str()
            )))
        }
    };
    let counter_sql = format!(
        "UPDATE import_sessions SET {counter} = {counter} + 1, \
         processed_count = processed_count + 1 WHERE import_id = ?"
    );

    retry_on_lock("record row outcome", OUTCOME_WRITE_MAX_WAIT_MS, || {
        let counter_sql = counter_sql.clone();
        async move {
            let mut tx = pool.begin().await?;

            let result = sqlx::query(
                r#"
                UPDATE import_rows
                SET outcome = ?, outcome_error = ?
                WHERE import_id = ? AND row_index = ? AND outcome = 'PENDING'
                "#,
            )
            .bind(outcome.as_str())
            .bind(error)
            .bind(import_id.to_string())
            .bind(row_index)
            .execute(&mut *tx)
            .await?;

            let recorded = result.rows_affected() == 1;

            if recorded {
                sqlx::query(&counter_sql)
                    .bind(import_id.to_string())
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok(recorded)
        }
    })
    .await
}

fn row_from_db(row: sqlx::sqlite::SqliteRow) -> Result<ImportRow> {
    let raw_data: String = row.get("raw_data");
    let raw_data: BTreeMap<String, String> = serde_json::from_str(&raw_data)
        .map_err(|e| Error::Internal(format!("Failed to deserialize raw row data: {}", e)))?;

    let parsed: Option<String> = row.get("parsed");
    let parsed: Option<ParsedCandidate> = parsed
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize parsed row: {}", e)))?;

    let candidates: String = row.get("group_candidates");
    let group_candidates: Vec<GroupCandidate> = serde_json::from_str(&candidates)
        .map_err(|e| Error::Internal(format!("Failed to deserialize group candidates: {}", e)))?;

    let validation_status: String = row.get("validation_status");
    let outcome: String = row.get("outcome");
    let overridden: i64 = row.get("overridden");

    Ok(ImportRow {
        row_index: row.get("row_index"),
        raw_data,
        parsed,
        validation_status: RowValidation::parse(&validation_status)?,
        validation_message: row.get("validation_message"),
        program_id: row.get("program_id"),
        matched_group_id: row.get("matched_group_id"),
        group_candidates,
        overridden: overridden != 0,
        override_group_id: row.get("override_group_id"),
        outcome: RowOutcome::parse(&outcome)?,
        outcome_error: row.get("outcome_error"),
    })
}
