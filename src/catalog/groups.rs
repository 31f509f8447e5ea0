//! Connection group persistence.
//!
//! Groups form a tree; deleting a group deletes its subgroups and the
//! connections saved under them.

use crate::db::BackendKind;
use crate::error::{Result, SqldeskError};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

/// Seeded top-level group for network connections.
pub const POSTGRES_GROUP: &str = "PostgreSQL Connections";

/// Seeded top-level group for file connections.
pub const SQLITE_GROUP: &str = "SQLite Connections";

/// Returns the seeded group that holds connections of the given backend.
pub fn default_group_for(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::Postgres => POSTGRES_GROUP,
        BackendKind::Sqlite => SQLITE_GROUP,
    }
}

/// A node in the connection tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ConnectionGroup {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
}

/// Lists all groups, parents before children.
pub async fn list_groups(pool: &SqlitePool) -> Result<Vec<ConnectionGroup>> {
    sqlx::query_as("SELECT id, name, parent_id FROM groups ORDER BY id")
        .fetch_all(pool)
        .await
        .map_err(|e| SqldeskError::catalog(format!("Failed to list groups: {e}")))
}

/// Finds a group by name. The first match wins if names repeat across levels.
pub async fn get_group_by_name(pool: &SqlitePool, name: &str) -> Result<Option<ConnectionGroup>> {
    sqlx::query_as("SELECT id, name, parent_id FROM groups WHERE name = ? ORDER BY id LIMIT 1")
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(|e| SqldeskError::catalog(format!("Failed to get group: {e}")))
}

/// Creates a group, optionally under a parent, and returns its id.
pub async fn create_group(pool: &SqlitePool, name: &str, parent_id: Option<i64>) -> Result<i64> {
    if name.trim().is_empty() {
        return Err(SqldeskError::catalog("Group name cannot be empty"));
    }

    let result = sqlx::query("INSERT INTO groups (name, parent_id) VALUES (?, ?)")
        .bind(name)
        .bind(parent_id)
        .execute(pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("FOREIGN KEY constraint") {
                SqldeskError::catalog(format!("Parent group {} not found", parent_id.unwrap_or_default()))
            } else {
                SqldeskError::catalog(format!("Failed to create group: {e}"))
            }
        })?;

    Ok(result.last_insert_rowid())
}

/// Renames a group.
pub async fn rename_group(pool: &SqlitePool, id: i64, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(SqldeskError::catalog("Group name cannot be empty"));
    }

    let result = sqlx::query("UPDATE groups SET name = ? WHERE id = ?")
        .bind(name)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| SqldeskError::catalog(format!("Failed to rename group: {e}")))?;

    if result.rows_affected() == 0 {
        return Err(SqldeskError::catalog(format!("Group {id} not found")));
    }
    Ok(())
}

/// Deletes a group with its subgroups and their connections.
pub async fn delete_group(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM groups WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| SqldeskError::catalog(format!("Failed to delete group: {e}")))?;

    if result.rows_affected() == 0 {
        return Err(SqldeskError::catalog(format!("Group {id} not found")));
    }
    Ok(())
}
