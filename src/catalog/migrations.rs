//! Schema versioning and migrations for the catalog database.
//!
//! Manages database schema evolution with forward-only migrations.

use crate::catalog::groups::{POSTGRES_GROUP, SQLITE_GROUP};
use crate::error::{Result, SqldeskError};
use sqlx::sqlite::SqlitePool;
use tracing::info;

pub const CURRENT_VERSION: i32 = 2;

/// Runs all pending migrations on the database.
///
/// Newer schemas are left alone; `CatalogDb` refuses them before migrating.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current = current_version(pool).await?;

    if current < CURRENT_VERSION {
        info!("Migrating catalog database from version {current} to {CURRENT_VERSION}");
        for version in (current + 1)..=CURRENT_VERSION {
            run_migration(pool, version).await?;
            record_version(pool, version).await?;
            info!("Applied migration v{version}");
        }
    }

    Ok(())
}

/// Returns the applied schema version, creating the version table if needed.
pub async fn current_version(pool: &SqlitePool) -> Result<i32> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| SqldeskError::catalog(format!("Failed to create schema_versions table: {e}")))?;

    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM schema_versions")
        .fetch_optional(pool)
        .await
        .map_err(|e| SqldeskError::catalog(format!("Failed to get schema version: {e}")))?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

async fn record_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_versions (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await
        .map_err(|e| SqldeskError::catalog(format!("Failed to record migration: {e}")))?;
    Ok(())
}

async fn run_migration(pool: &SqlitePool, version: i32) -> Result<()> {
    match version {
        1 => migration_v1(pool).await,
        2 => migration_v2(pool).await,
        _ => Err(SqldeskError::catalog(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: groups and connections, seeded with one group per backend.
async fn migration_v1(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            parent_id INTEGER,
            FOREIGN KEY (parent_id) REFERENCES groups(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| SqldeskError::catalog(format!("Failed to create groups table: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS connections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id INTEGER NOT NULL,
            name TEXT NOT NULL UNIQUE,
            backend TEXT NOT NULL CHECK (backend IN ('sqlite', 'postgres')),
            host TEXT,
            port INTEGER,
            database TEXT,
            username TEXT,
            password TEXT,
            path TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            last_used_at TEXT,
            FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| SqldeskError::catalog(format!("Failed to create connections table: {e}")))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_connections_group ON connections(group_id)")
        .execute(pool)
        .await
        .map_err(|e| SqldeskError::catalog(format!("Failed to create connections index: {e}")))?;

    for name in [POSTGRES_GROUP, SQLITE_GROUP] {
        sqlx::query("INSERT INTO groups (name, parent_id) VALUES (?, NULL)")
            .bind(name)
            .execute(pool)
            .await
            .map_err(|e| SqldeskError::catalog(format!("Failed to seed groups: {e}")))?;
    }

    Ok(())
}

/// Migration v2: usage counter for most-used ordering.
async fn migration_v2(pool: &SqlitePool) -> Result<()> {
    sqlx::query("ALTER TABLE connections ADD COLUMN usage_count INTEGER NOT NULL DEFAULT 0")
        .execute(pool)
        .await
        .map_err(|e| SqldeskError::catalog(format!("Failed to add usage_count column: {e}")))?;

    Ok(())
}
