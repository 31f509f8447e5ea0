//! PostgreSQL database client implementation.
//!
//! Provides the `PostgresClient` struct that implements the `DatabaseClient` trait
//! for PostgreSQL databases using sqlx.

use crate::db::{
    AbortHandle, ColumnInfo, DatabaseClient, Execution, Interrupt, Row, RowSet, StatementKind,
    TableEntry, TableKind, Value,
};
use crate::error::{Result, SqldeskError};
use async_trait::async_trait;
use sqlx::postgres::{PgColumn, PgConnectOptions, PgConnection, PgRow};
use sqlx::{
    Column as SqlxColumn, ConnectOptions, Connection, Executor, Row as SqlxRow, Statement,
    TypeInfo, ValueRef,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Connection establishment timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// SQLSTATE reported when a statement is stopped by a cancel request.
const QUERY_CANCELED: &str = "57014";

/// PostgreSQL database client over a single connection.
pub struct PostgresClient {
    conn: PgConnection,
    cancel: Arc<PgCancel>,
}

impl PostgresClient {
    /// Connects to the server and records the backend process id used for
    /// out-of-band cancellation.
    pub async fn connect(
        host: &str,
        port: u16,
        database: &str,
        user: &str,
        password: &str,
    ) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database)
            .username(user)
            .password(password);

        let connect = options.connect();
        let mut conn = tokio::time::timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), connect)
            .await
            .map_err(|_| {
                SqldeskError::connection(format!(
                    "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
                ))
            })?
            .map_err(|e| map_connection_error(e, host, port, user, database))?;

        let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut conn)
            .await
            .map_err(|e| SqldeskError::connection(format!("Failed to read backend pid: {e}")))?;

        debug!("Connected to {database} @ {host}:{port} (backend pid {pid})");

        Ok(Self {
            conn,
            cancel: Arc::new(PgCancel {
                options,
                pid,
                runtime: Handle::current(),
            }),
        })
    }

    /// Returns the server process id serving this connection.
    pub fn backend_pid(&self) -> i32 {
        self.cancel.pid
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(self.cancel.clone())
    }

    async fn execute(&mut self, sql: &str, kind: StatementKind) -> Result<Execution> {
        match kind {
            StatementKind::RowReturning => {
                let rows = sqlx::query(sql)
                    .fetch_all(&mut self.conn)
                    .await
                    .map_err(map_execution_error)?;

                // Empty result: read the column metadata from the prepared statement
                let columns = match rows.first() {
                    Some(first) => column_infos(first.columns()),
                    None => (&mut self.conn)
                        .prepare(sql)
                        .await
                        .map(|stmt| column_infos(stmt.columns()))
                        .unwrap_or_default(),
                };

                Ok(Execution::Rows(Box::new(PgRowSet { columns, rows })))
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
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT table_schema::text, table_name::text, table_type::text
            FROM information_schema.tables
            WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
            ORDER BY table_type, table_schema, table_name
            "#,
        )
        .fetch_all(&mut self.conn)
        .await
        .map_err(|e| SqldeskError::query(format!("Failed to list tables: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(schema, name, table_type)| TableEntry {
                schema: Some(schema),
                name,
                kind: if table_type == "VIEW" {
                    TableKind::View
                } else {
                    TableKind::Table
                },
            })
            .collect())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|e| SqldeskError::connection(format!("Failed to close connection: {e}")))
    }
}

/// Out-of-band cancellation: asks the server, over a second connection, to
/// cancel whatever the recorded backend is running.
struct PgCancel {
    options: PgConnectOptions,
    pid: i32,
    runtime: Handle,
}

impl Interrupt for PgCancel {
    fn interrupt(&self) {
        let options = self.options.clone();
        let pid = self.pid;
        self.runtime.spawn(async move {
            match cancel_backend(&options, pid).await {
                Ok(true) => debug!("Cancel request delivered to backend {pid}"),
                Ok(false) => debug!("Backend {pid} had nothing to cancel"),
                Err(e) => warn!("Cancel request for backend {pid} failed: {e}"),
            }
        });
    }
}

async fn cancel_backend(options: &PgConnectOptions, pid: i32) -> std::result::Result<bool, sqlx::Error> {
    let mut conn = options.connect().await?;
    let cancelled: bool = sqlx::query_scalar("SELECT pg_cancel_backend($1)")
        .bind(pid)
        .fetch_one(&mut conn)
        .await?;
    conn.close().await?;
    Ok(cancelled)
}

/// Fetched PostgreSQL rows.
struct PgRowSet {
    columns: Vec<ColumnInfo>,
    rows: Vec<PgRow>,
}

impl RowSet for PgRowSet {
    fn columns(&self) -> Vec<ColumnInfo> {
        self.columns.clone()
    }

    fn materialize(self: Box<Self>) -> Vec<Row> {
        self.rows.iter().map(convert_row).collect()
    }
}

fn column_infos(columns: &[PgColumn]) -> Vec<ColumnInfo> {
    columns
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(_) => {}
        Err(_) => return Value::Null,
    }

    let decoded = match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row.try_get::<bool, _>(index).map(Value::Bool),
        "INT2" | "SMALLINT" => row.try_get::<i16, _>(index).map(|v| Value::Int(v as i64)),
        "INT4" | "INT" | "INTEGER" => row.try_get::<i32, _>(index).map(|v| Value::Int(v as i64)),
        "INT8" | "BIGINT" => row.try_get::<i64, _>(index).map(Value::Int),
        "FLOAT4" | "REAL" => row.try_get::<f32, _>(index).map(|v| Value::Float(v as f64)),
        "FLOAT8" | "DOUBLE PRECISION" => row.try_get::<f64, _>(index).map(Value::Float),
        "BYTEA" => row.try_get::<Vec<u8>, _>(index).map(Value::Bytes),
        // Everything else is attempted as text
        _ => row.try_get::<String, _>(index).map(Value::String),
    };

    decoded.unwrap_or_else(|_| Value::Unsupported(type_name.to_string()))
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(
    error: sqlx::Error,
    host: &str,
    port: u16,
    user: &str,
    database: &str,
) -> SqldeskError {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        SqldeskError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        SqldeskError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        SqldeskError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        SqldeskError::connection("Server requires SSL. Adjust the server or connection settings.")
    } else if error_str.contains("failed to lookup address") || error_str.contains("name or service not known") {
        SqldeskError::connection(format!("Cannot resolve host '{host}'."))
    } else {
        SqldeskError::connection(error.to_string())
    }
}

/// Maps statement failures; a cancel-induced stop becomes `Aborted`.
fn map_execution_error(error: sqlx::Error) -> SqldeskError {
    let canceled = error
        .as_database_error()
        .and_then(|db_error| db_error.code())
        .is_some_and(|code| code == QUERY_CANCELED);

    if canceled {
        SqldeskError::aborted(format_query_error(error))
    } else {
        SqldeskError::query(format_query_error(error))
    }
}

/// Formats a query error with hints if available.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        let fields = [
            ("DETAIL", pg_error.detail()),
            ("HINT", pg_error.hint()),
            ("TABLE", pg_error.table()),
            ("COLUMN", pg_error.column()),
            ("CONSTRAINT", pg_error.constraint()),
        ];
        for (label, value) in fields {
            if let Some(value) = value {
                result.push_str(&format!("\n  {label}: {value}"));
            }
        }
    }

    result
}
