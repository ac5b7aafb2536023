//! Program and group catalog lookups
//!
//! Programs are global; groups are scoped to an owner (tenant).

use bulkreg_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// A program a candidate can be registered into
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramRef {
    pub program_id: i64,
    pub code: String,
    pub name: String,
}

/// An owner-scoped candidate group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRef {
    pub group_id: i64,
    pub name: String,
}

/// List all programs in the catalog
pub async fn list_programs(pool: &SqlitePool) -> Result<Vec<ProgramRef>> {
    let rows = sqlx::query("SELECT program_id, code, name FROM programs ORDER BY program_id")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| ProgramRef {
            program_id: row.get("program_id"),
            code: row.get("code"),
            name: row.get("name"),
        })
        .collect())
}

/// List the groups visible to one owner
pub async fn list_groups(pool: &SqlitePool, owner_id: i64) -> Result<Vec<GroupRef>> {
    let rows = sqlx::query("SELECT group_id, name FROM owner_groups WHERE owner_id = ? ORDER BY group_id")
        .bind(owner_id)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| GroupRef {
            group_id: row.get("group_id"),
            name: row.get("name"),
        })
        .collect())
}

/// Owner-scoped group lookup; another owner's group is indistinguishable
/// from a missing one
pub async fn get_group(pool: &SqlitePool, owner_id: i64, group_id: i64) -> Result<Option<GroupRef>> {
    let row = sqlx::query("SELECT group_id, name FROM owner_groups WHERE owner_id = ? AND group_id = ?")
        .bind(owner_id)
        .bind(group_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|row| GroupRef {
        group_id: row.get("group_id"),
        name: row.get("name"),
    }))
}

/// Create a group for an owner
pub async fn create_group(pool: &SqlitePool, owner_id: i64, name: &str) -> Result<GroupRef> {
    let result = sqlx::query("INSERT INTO owner_groups (owner_id, name) VALUES (?, ?)")
        .bind(owner_id)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(GroupRef {
        group_id: result.last_insert_rowid(),
        name: name.to_string(),
    })
}

/// Seed the default program catalog on first start
pub async fn ensure_default_programs(pool: &SqlitePool) -> Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM programs")
        .fetch_one(pool)
        .await?;

    if count == 0 {
        for (code, name) in [("EMPLOYEE", "Employee"), ("CXO", "CXO General")] {
            sqlx::query("INSERT INTO programs (code, name) VALUES (?, ?)")
                .bind(code)
                .bind(name)
                .execute(pool)
                .await?;
        }
        tracing::info!("Seeded default program catalog");
    }

    Ok(())
}
