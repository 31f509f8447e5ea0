//! Database abstraction layer for sqldesk.
//!
//! Provides a uniform capability surface over the two backend kinds: opening a
//! connection from a [`ConnectionDescriptor`], executing one statement,
//! decoding its rows, and aborting a statement that is already running.

mod descriptor;
mod mock;
mod postgres;
pub mod schema;
mod sqlite;
mod types;

pub use descriptor::{BackendKind, ConnectionDescriptor, DEFAULT_PORT};
pub use mock::{MockBackend, MockStats};
pub use postgres::PostgresClient;
pub use schema::{TableEntry, TableKind};
pub use sqlite::SqliteClient;
pub use types::{ColumnInfo, QueryResult, Row, StatementKind, Value};

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Opens a client for the backend named by the descriptor.
///
/// This is the central factory function for database connections.
pub async fn connect(descriptor: &ConnectionDescriptor) -> Result<Box<dyn DatabaseClient>> {
    descriptor.validate()?;
    match descriptor {
        ConnectionDescriptor::File { path } => {
            let client = SqliteClient::connect(path).await?;
            Ok(Box::new(client))
        }
        ConnectionDescriptor::Network {
            host,
            port,
            database,
            user,
            password,
        } => {
            let client = PostgresClient::connect(host, *port, database, user, password).await?;
            Ok(Box::new(client))
        }
    }
}

/// Opens a connection and closes it again, reporting why it failed if it did.
pub async fn test_connection(descriptor: &ConnectionDescriptor) -> Result<()> {
    let client = connect(descriptor).await?;
    client.close().await
}

/// Creates an empty SQLite database file at `path`.
pub async fn create_sqlite_database(path: &Path) -> Result<()> {
    SqliteClient::create(path).await
}

/// Produces live connections for query tasks.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Opens a new connection, failing with a connection error when the
    /// descriptor is incomplete or the database cannot be reached.
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn DatabaseClient>>;
}

/// Backend that dispatches to the sqlx-based SQLite and PostgreSQL clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxBackend;

#[async_trait]
impl Backend for SqlxBackend {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn DatabaseClient>> {
        connect(descriptor).await
    }
}

/// Trait defining the interface for a single live database connection.
///
/// A client is owned by exactly one task. Only its [`AbortHandle`] is ever
/// shared with other threads.
#[async_trait]
pub trait DatabaseClient: Send {
    /// Returns the backend's abort capability for this connection.
    fn abort_handle(&self) -> AbortHandle;

    /// Executes one statement.
    ///
    /// Row-returning statements are fetched in full before this returns and
    /// yield a [`RowSet`] whose rows are not yet decoded; row-affecting
    /// statements are committed and report the affected-row count.
    async fn execute(&mut self, sql: &str, kind: StatementKind) -> Result<Execution>;

    /// Lists the tables and views visible on this connection.
    async fn list_tables(&mut self) -> Result<Vec<TableEntry>>;

    /// Closes the connection.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// What a statement produced.
pub enum Execution {
    /// A fetched result set, not yet converted to [`Value`]s.
    Rows(Box<dyn RowSet>),
    /// Rows affected by a committed statement.
    Affected(u64),
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rows(set) => f.debug_tuple("Rows").field(&set.columns().len()).finish(),
            Self::Affected(n) => f.debug_tuple("Affected").field(n).finish(),
        }
    }
}

/// Rows already fetched from the backend, still in its native encoding.
///
/// No I/O happens past this point; only the conversion to [`Value`]s remains.
pub trait RowSet: Send {
    /// Column metadata in result order.
    fn columns(&self) -> Vec<ColumnInfo>;

    /// Decodes every fetched row into [`Value`]s.
    fn materialize(self: Box<Self>) -> Vec<Row>;
}

/// A backend primitive that stops the statement running on a connection.
///
/// Implementations must be callable from any thread and must not block.
pub trait Interrupt: Send + Sync {
    /// Requests that the in-flight statement stop.
    fn interrupt(&self);
}

/// Uniform abort capability.
///
/// Wraps whichever interrupt primitive the backend offers; aborting a handle
/// without one does nothing.
#[derive(Default)]
pub struct AbortHandle {
    inner: Option<Arc<dyn Interrupt>>,
}

impl AbortHandle {
    /// Creates a handle backed by the given primitive.
    pub fn new(interrupt: Arc<dyn Interrupt>) -> Self {
        Self {
            inner: Some(interrupt),
        }
    }

    /// Creates a handle for a connection that cannot be aborted.
    pub fn unsupported() -> Self {
        Self { inner: None }
    }

    /// Returns true if aborting will reach the backend.
    pub fn is_supported(&self) -> bool {
        self.inner.is_some()
    }

    /// Aborts the in-flight statement, if the backend allows it.
    pub fn abort(&self) {
        if let Some(interrupt) = &self.inner {
            interrupt.interrupt();
        }
    }
}

impl std::fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortHandle")
            .field("supported", &self.is_supported())
            .finish()
    }
}
