//! Connection catalog for sqldesk.
//!
//! Local SQLite storage for connection groups and saved connection
//! descriptors. The execution core never reads it; the CLI resolves a saved
//! connection to a descriptor before submitting a query.

pub mod connections;
pub mod groups;
mod migrations;

pub use connections::SavedConnection;
pub use groups::{ConnectionGroup, POSTGRES_GROUP, SQLITE_GROUP};

use crate::error::{Result, SqldeskError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 100;

/// Why opening the catalog failed.
enum OpenFailure {
    /// Written by a newer sqldesk; left untouched.
    Unsupported(SqldeskError),
    /// Unreadable or corrupt.
    Broken(SqldeskError),
}

/// Handle to the catalog database.
pub struct CatalogDb {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl CatalogDb {
    /// Opens or creates the catalog at the specified path.
    ///
    /// A corrupt file is moved aside to `*.db.bak` and a fresh catalog is
    /// created in its place.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::ensure_parent_dirs(path)?;

        match Self::try_open(path).await {
            Ok(db) => Ok(db),
            Err(OpenFailure::Unsupported(e)) => Err(e),
            Err(OpenFailure::Broken(e)) => {
                warn!("Failed to open catalog database: {e}. Attempting recovery...");
                Self::attempt_recovery(path).await
            }
        }
    }

    /// Attempts to open the database with retries for lock contention.
    async fn try_open(path: &Path) -> std::result::Result<Self, OpenFailure> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * 2u64.pow(attempt)))
                    .await;
            }

            match Self::connect(path).await {
                Ok(pool) => {
                    let version = migrations::current_version(&pool)
                        .await
                        .map_err(OpenFailure::Broken)?;
                    if version > migrations::CURRENT_VERSION {
                        pool.close().await;
                        return Err(OpenFailure::Unsupported(SqldeskError::catalog(format!(
                            "Catalog schema version ({version}) is newer than supported version ({}). \
                             Please upgrade sqldesk to the latest version.",
                            migrations::CURRENT_VERSION
                        ))));
                    }
                    migrations::run_migrations(&pool)
                        .await
                        .map_err(OpenFailure::Broken)?;
                    info!("Catalog database opened at {}", path.display());
                    return Ok(Self {
                        pool,
                        db_path: path.to_path_buf(),
                    });
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(OpenFailure::Broken(last_error.unwrap_or_else(|| {
            SqldeskError::catalog("Failed to open catalog after retries")
        })))
    }

    /// Creates a connection pool to the SQLite database.
    async fn connect(path: &Path) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| SqldeskError::catalog(format!("Failed to connect to catalog database: {e}")))
    }

    /// Ensures parent directories exist for the database path.
    fn ensure_parent_dirs(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SqldeskError::catalog(format!(
                    "Failed to create catalog directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        Ok(())
    }

    /// Backs up a corrupt catalog and recreates it.
    async fn attempt_recovery(path: &Path) -> Result<Self> {
        let backup_path = path.with_extension("db.bak");

        if path.exists() {
            std::fs::rename(path, &backup_path).map_err(|e| {
                SqldeskError::catalog(format!(
                    "Failed to backup corrupted catalog to {}: {e}",
                    backup_path.display()
                ))
            })?;
            warn!("Backed up corrupted catalog to {}", backup_path.display());
        }

        match Self::try_open(path).await {
            Ok(db) => Ok(db),
            Err(OpenFailure::Unsupported(e)) | Err(OpenFailure::Broken(e)) => Err(
                SqldeskError::catalog(format!("Failed to recreate catalog after backup: {e}")),
            ),
        }
    }

    /// Returns the path to the catalog database.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
