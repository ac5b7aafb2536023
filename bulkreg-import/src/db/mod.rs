//! Database access for bulkreg-import
//!
//! All state lives in one SQLite database: import sessions and rows,
//! plus the program/group catalog and the registrations the executor
//! creates.

pub mod catalog;
pub mod registrations;
pub mod retry;
pub mod rows;
pub mod sessions;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_sessions (
            import_id TEXT PRIMARY KEY,
            owner_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            filename TEXT,
            total_rows INTEGER NOT NULL DEFAULT 0,
            success_count INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            skipped_count INTEGER NOT NULL DEFAULT 0,
            processed_count INTEGER NOT NULL DEFAULT 0,
            progress_text TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_rows (
            import_id TEXT NOT NULL,
            row_index INTEGER NOT NULL,
            raw_data TEXT NOT NULL DEFAULT '{}',
            parsed TEXT,
            validation_status TEXT NOT NULL,
            validation_message TEXT,
            program_id INTEGER,
            matched_group_id INTEGER,
            group_candidates TEXT NOT NULL DEFAULT '[]',
            overridden INTEGER NOT NULL DEFAULT 0,
            override_group_id INTEGER,
            outcome TEXT NOT NULL DEFAULT 'PENDING',
            outcome_error TEXT,
            PRIMARY KEY (import_id, row_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS programs (
            program_id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS owner_groups (
            group_id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            UNIQUE (owner_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS registrations (
            registration_id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL,
            full_name TEXT NOT NULL,
            email TEXT NOT NULL,
            country_code TEXT NOT NULL,
            mobile TEXT NOT NULL,
            program_id INTEGER NOT NULL,
            group_id INTEGER NOT NULL,
            window_start TEXT,
            window_end TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (owner_id, email),
            UNIQUE (owner_id, mobile)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");

    Ok(())
}
