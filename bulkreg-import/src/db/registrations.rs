//! Registration creation, the executor's unit of work per row
//!
//! Not idempotent by itself: calling it twice for the same candidate
//! creates a conflict, which is why the executor records each row's
//! outcome durably before moving on.

use bulkreg_common::{Error, Result};
use chrono::Utc;
use sqlx::SqlitePool;

/// Candidate fields fully resolved for creation
#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub owner_id: i64,
    pub full_name: String,
    pub email: String,
    pub country_code: String,
    pub mobile: String,
    pub program_id: i64,
    pub group_id: i64,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
}

/// Create one registration record.
///
/// A duplicate email or mobile for the same owner surfaces as
/// `Error::Conflict` - detectable only at commit time when another row
/// or a concurrent import got there first.
pub async fn create_registration(pool: &SqlitePool, reg: &NewRegistration) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO registrations (
            owner_id, full_name, email, country_code, mobile,
            program_id, group_id, window_start, window_end, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(reg.owner_id)
    .bind(&reg.full_name)
    .bind(&reg.email)
    .bind(&reg.country_code)
    .bind(&reg.mobile)
    .bind(reg.program_id)
    .bind(reg.group_id)
    .bind(&reg.window_start)
    .bind(&reg.window_end)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await;

    match result {
        Ok(done) => Ok(done.last_insert_rowid()),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(Error::Conflict(format!(
                "A registration with email '{}' or mobile '{}' already exists",
                reg.email, reg.mobile
            )))
        }
        Err(err) => Err(err.into()),
    }
}

/// Count registrations created for an owner (used by tests and reporting)
pub async fn count_registrations(pool: &SqlitePool, owner_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM registrations WHERE owner_id = ?")
        .bind(owner_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
