//! SQLite database client implementation.
//!
//! Provides the `SqliteClient` struct that implements the `DatabaseClient` trait
//! for file-based SQLite databases using sqlx.

use crate::db::{
    AbortHandle, ColumnInfo, DatabaseClient, Execution, Interrupt, Row, RowSet, StatementKind,
    TableEntry, TableKind, Value,
};
use crate::error::{Result, SqldeskError};
use async_trait::async_trait;
use libsqlite3_sys::{sqlite3, sqlite3_interrupt, SQLITE_INTERRUPT};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{
    Column as SqlxColumn, ConnectOptions, Connection, Executor, Row as SqlxRow, Statement,
    TypeInfo, ValueRef,
};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long a statement waits on a locked database before failing.
const BUSY_TIMEOUT_SECS: u64 = 5;

/// SQLite database client over a single connection.
pub struct SqliteClient {
    conn: SqliteConnection,
    path: PathBuf,
    interrupt: Arc<SqliteInterrupt>,
}

impl SqliteClient {
    /// Opens an existing database file. Missing files are never created.
    pub async fn connect(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SqldeskError::connection(format!(
                "Database file not found: {}",
                path.display()
            )));
        }

        let mut conn = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false)
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))
            .connect()
            .await
            .map_err(|e| {
                SqldeskError::connection(format!("Cannot open {}: {e}", path.display()))
            })?;

        let handle = conn
            .lock_handle()
            .await
            .map_err(|e| SqldeskError::connection(format!("Cannot open {}: {e}", path.display())))?
            .as_raw_handle();

        debug!("Opened SQLite database {}", path.display());

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            interrupt: Arc::new(SqliteInterrupt { handle }),
        })
    }

    /// Creates a new database file and closes it again.
    ///
    /// This is the only path that creates files; opening an existing file
    /// leaves it as it is.
    pub async fn create(path: &Path) -> Result<()> {
        let conn = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .connect()
            .await
            .map_err(|e| {
                SqldeskError::connection(format!(
                    "Could not create database {}: {e}",
                    path.display()
                ))
            })?;
        conn.close().await.map_err(|e| {
            SqldeskError::connection(format!("Could not create database {}: {e}", path.display()))
        })?;

        debug!("Created SQLite database {}", path.display());
        Ok(())
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DatabaseClient for SqliteClient {
    /// The returned handle is only valid until `close`; query tasks unpublish
    /// it before closing the connection.
    fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(self.interrupt.clone())
    }

    async fn execute(&mut self, sql: &str, kind: StatementKind) -> Result<Execution> {
        match kind {
            StatementKind::RowReturning => {
                let rows = sqlx::query(sql)
                    .fetch_all(&mut self.conn)
                    .await
                    .map_err(map_execution_error)?;

                let columns = match rows.first() {
                    Some(first) => column_infos(first.columns()),
                    None => (&mut self.conn)
                        .prepare(sql)
                        .await
                        .map(|stmt| column_infos(stmt.columns()))
                        .unwrap_or_default(),
                };

                Ok(Execution::Rows(Box::new(SqliteRowSet { columns, rows })))
            }
            StatementKind::RowAffecting => {
                let done = sqlx::query(sql)
                    .execute(&mut self.conn)
                    .await
                    .map_err(map_execution_error)?;
                Ok(Execution::Affected(done.rows_affected()))
            }
        }
    }

    async fn list_tables(&mut self) -> Result<Vec<TableEntry>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT name, type
            FROM sqlite_master
            WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
            ORDER BY type, name
            "#,
        )
        .fetch_all(&mut self.conn)
        .await
        .map_err(|e| SqldeskError::query(format!("Failed to list tables: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(name, kind)| TableEntry {
                schema: None,
                name,
                kind: if kind == "view" {
                    TableKind::View
                } else {
                    TableKind::Table
                },
            })
            .collect())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let path = self.path;
        self.conn.close().await.map_err(|e| {
            SqldeskError::connection(format!("Failed to close {}: {e}", path.display()))
        })
    }
}

/// Process-local interruption of the statement running on one connection.
struct SqliteInterrupt {
    handle: NonNull<sqlite3>,
}

// SAFETY: sqlite3_interrupt is documented as safe to call from any thread
// while the connection is open. The pointer is only dereferenced by SQLite.
unsafe impl Send for SqliteInterrupt {}
unsafe impl Sync for SqliteInterrupt {}

impl Interrupt for SqliteInterrupt {
    fn interrupt(&self) {
        // SAFETY: callers only hold the handle while the connection is open.
        unsafe { sqlite3_interrupt(self.handle.as_ptr()) }
    }
}

/// Fetched SQLite rows.
struct SqliteRowSet {
    columns: Vec<ColumnInfo>,
    rows: Vec<SqliteRow>,
}

impl RowSet for SqliteRowSet {
    fn columns(&self) -> Vec<ColumnInfo> {
        self.columns.clone()
    }

    fn materialize(self: Box<Self>) -> Vec<Row> {
        self.rows.iter().map(convert_row).collect()
    }
}

fn column_infos(columns: &[sqlx::sqlite::SqliteColumn]) -> Vec<ColumnInfo> {
    columns
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

/// Converts a sqlx SqliteRow to our Row type.
fn convert_row(row: &SqliteRow) -> Row {
    (0..row.len()).map(|i| convert_value(row, i)).collect()
}

/// Converts one cell using its storage class, which SQLite decides per value.
fn convert_value(row: &SqliteRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    let decoded = match type_name.as_str() {
        "INTEGER" => row.try_get::<i64, _>(index).map(Value::Int),
        "BOOLEAN" => row.try_get::<bool, _>(index).map(Value::Bool),
        "REAL" => row.try_get::<f64, _>(index).map(Value::Float),
        "BLOB" => row.try_get::<Vec<u8>, _>(index).map(Value::Bytes),
        _ => row.try_get::<String, _>(index).map(Value::String),
    };

    decoded.unwrap_or(Value::Unsupported(type_name))
}

/// Maps statement failures, keeping interrupts distinct from real errors.
fn map_execution_error(error: sqlx::Error) -> SqldeskError {
    match error.as_database_error() {
        Some(db_error) => {
            let interrupted = db_error
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .is_some_and(|code| code & 0xff == SQLITE_INTERRUPT);
            if interrupted {
                SqldeskError::aborted(db_error.message())
            } else {
                SqldeskError::query(db_error.message())
            }
        }
        None => SqldeskError::query(error.to_string()),
    }
}
