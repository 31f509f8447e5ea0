//! Saved connection persistence.
//!
//! CRUD operations for the connection descriptors shown in the connection tree.

use crate::db::{BackendKind, ConnectionDescriptor, DEFAULT_PORT};
use crate::error::{Result, SqldeskError};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use std::path::PathBuf;

/// Raw database row for a saved connection.
#[derive(Debug, Clone, FromRow)]
pub struct SavedConnectionRow {
    pub id: i64,
    pub group_id: i64,
    pub name: String,
    pub backend: String,
    pub host: Option<String>,
    pub port: Option<i64>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub path: Option<String>,
    pub created_at: String,
    pub last_used_at: Option<String>,
    pub usage_count: i64,
}

/// A connection saved in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedConnection {
    pub id: i64,
    pub group_id: i64,
    pub name: String,
    pub descriptor: ConnectionDescriptor,
    pub created_at: String,
    pub last_used_at: Option<String>,
    pub usage_count: u64,
}

impl TryFrom<SavedConnectionRow> for SavedConnection {
    type Error = SqldeskError;

    fn try_from(row: SavedConnectionRow) -> Result<Self> {
        let kind = BackendKind::parse(&row.backend).ok_or_else(|| {
            SqldeskError::catalog(format!(
                "Connection '{}' has unknown backend '{}'",
                row.name, row.backend
            ))
        })?;

        let descriptor = match kind {
            BackendKind::Sqlite => ConnectionDescriptor::file(PathBuf::from(row.path.unwrap_or_default())),
            BackendKind::Postgres => ConnectionDescriptor::network(
                row.host.unwrap_or_default(),
                row.port
                    .and_then(|p| u16::try_from(p).ok())
                    .unwrap_or(DEFAULT_PORT),
                row.database.unwrap_or_default(),
                row.username.unwrap_or_default(),
                row.password.unwrap_or_default(),
            ),
        };

        Ok(Self {
            id: row.id,
            group_id: row.group_id,
            name: row.name,
            descriptor,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
            usage_count: row.usage_count.max(0) as u64,
        })
    }
}

/// Column values of a descriptor as stored in the `connections` table.
struct DescriptorColumns {
    backend: &'static str,
    host: Option<String>,
    port: Option<i64>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    path: Option<String>,
}

impl From<&ConnectionDescriptor> for DescriptorColumns {
    fn from(descriptor: &ConnectionDescriptor) -> Self {
        match descriptor {
            ConnectionDescriptor::File { path } => Self {
                backend: BackendKind::Sqlite.as_str(),
                host: None,
                port: None,
                database: None,
                username: None,
                password: None,
                path: Some(path.to_string_lossy().into_owned()),
            },
            ConnectionDescriptor::Network {
                host,
                port,
                database,
                user,
                password,
            } => Self {
                backend: BackendKind::Postgres.as_str(),
                host: Some(host.clone()),
                port: Some(i64::from(*port)),
                database: Some(database.clone()),
                username: Some(user.clone()),
                password: (!password.is_empty()).then(|| password.clone()),
                path: None,
            },
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, group_id, name, backend, host, port, database, username, password, path,
           created_at, last_used_at, usage_count
    FROM connections
"#;

fn convert_rows(rows: Vec<SavedConnectionRow>) -> Result<Vec<SavedConnection>> {
    rows.into_iter().map(SavedConnection::try_from).collect()
}

/// Lists saved connections, most used first, optionally restricted to a group.
pub async fn list_connections(
    pool: &SqlitePool,
    group_id: Option<i64>,
) -> Result<Vec<SavedConnection>> {
    let rows: Vec<SavedConnectionRow> = match group_id {
        Some(group_id) => {
            sqlx::query_as(&format!(
                "{SELECT_COLUMNS} WHERE group_id = ? ORDER BY usage_count DESC, name"
            ))
            .bind(group_id)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY usage_count DESC, name"))
                .fetch_all(pool)
                .await
        }
    }
    .map_err(|e| SqldeskError::catalog(format!("Failed to list connections: {e}")))?;

    convert_rows(rows)
}

/// Gets a saved connection by name.
pub async fn get_connection(pool: &SqlitePool, name: &str) -> Result<Option<SavedConnection>> {
    let row: Option<SavedConnectionRow> =
        sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE name = ?"))
            .bind(name)
            .fetch_optional(pool)
            .await
            .map_err(|e| SqldeskError::catalog(format!("Failed to get connection: {e}")))?;

    row.map(SavedConnection::try_from).transpose()
}

/// Saves a new connection under a group and returns its id.
pub async fn create_connection(
    pool: &SqlitePool,
    group_id: i64,
    name: &str,
    descriptor: &ConnectionDescriptor,
) -> Result<i64> {
    if name.trim().is_empty() {
        return Err(SqldeskError::catalog("Connection name cannot be empty"));
    }
    let columns = DescriptorColumns::from(descriptor);

    let result = sqlx::query(
        r#"
        INSERT INTO connections (group_id, name, backend, host, port, database, username,
                                 password, path)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(group_id)
    .bind(name)
    .bind(columns.backend)
    .bind(&columns.host)
    .bind(columns.port)
    .bind(&columns.database)
    .bind(&columns.username)
    .bind(&columns.password)
    .bind(&columns.path)
    .execute(pool)
    .await
    .map_err(|e| {
        let message = e.to_string();
        if message.contains("UNIQUE constraint") {
            SqldeskError::catalog(format!("Connection '{name}' already exists"))
        } else if message.contains("FOREIGN KEY constraint") {
            SqldeskError::catalog(format!("Group {group_id} not found"))
        } else {
            SqldeskError::catalog(format!("Failed to create connection: {e}"))
        }
    })?;

    Ok(result.last_insert_rowid())
}

/// Replaces the descriptor of a saved connection.
pub async fn update_connection(
    pool: &SqlitePool,
    name: &str,
    descriptor: &ConnectionDescriptor,
) -> Result<()> {
    let columns = DescriptorColumns::from(descriptor);

    let result = sqlx::query(
        r#"
        UPDATE connections
        SET backend = ?, host = ?, port = ?, database = ?, username = ?, password = ?, path = ?
        WHERE name = ?
        "#,
    )
    .bind(columns.backend)
    .bind(&columns.host)
    .bind(columns.port)
    .bind(&columns.database)
    .bind(&columns.username)
    .bind(&columns.password)
    .bind(&columns.path)
    .bind(name)
    .execute(pool)
    .await
    .map_err(|e| SqldeskError::catalog(format!("Failed to update connection: {e}")))?;

    if result.rows_affected() == 0 {
        return Err(SqldeskError::catalog(format!(
            "Connection '{name}' not found"
        )));
    }

    Ok(())
}

/// Deletes a saved connection.
pub async fn delete_connection(pool: &SqlitePool, name: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM connections WHERE name = ?")
        .bind(name)
        .execute(pool)
        .await
        .map_err(|e| SqldeskError::catalog(format!("Failed to delete connection: {e}")))?;

    if result.rows_affected() == 0 {
        return Err(SqldeskError::catalog(format!(
            "Connection '{name}' not found"
        )));
    }

    Ok(())
}

/// Records one use of a connection: bumps its usage count and stamps `last_used_at`.
pub async fn touch_connection(pool: &SqlitePool, name: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE connections
        SET usage_count = usage_count + 1, last_used_at = datetime('now')
        WHERE name = ?
        "#,
    )
    .bind(name)
    .execute(pool)
    .await
    .map_err(|e| SqldeskError::catalog(format!("Failed to update connection: {e}")))?;

    Ok(())
}
