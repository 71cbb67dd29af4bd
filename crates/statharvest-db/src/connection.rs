//! Database connection management.
//!
//! Provides a `ConnectionPool` wrapper around `SQLx` that applies the
//! `SQLite` settings the index relies on.

use crate::error::{DatabaseError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CONNECTIONS: u32 = 5;

/// Connection pool for the `SQLite` file index.
///
/// File-backed databases run in WAL mode so concurrent institution runs can
/// read while another run commits. Writers wait on the busy timeout instead of
/// failing immediately.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    pool: Pool<Sqlite>,
}

impl ConnectionPool {
    /// Open the index at `path`, creating the file if it does not exist.
    ///
    /// `:memory:` yields a shared in-memory database, one per pool.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let Some(location) = path.as_ref().to_str() else {
            return Err(DatabaseError::Open(format!(
                "{} is not a UTF-8 path",
                path.as_ref().display()
            )));
        };

        let mut options = SqliteConnectOptions::from_str(location)
            .map_err(|e| DatabaseError::Open(format!("{location}: {e}")))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        if location != ":memory:" {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::Open(format!("{location}: {e}")))?;

        tracing::info!("Opened file index at {}", location);
        Ok(Self { pool })
    }

    /// The underlying `SQLx` pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Shut the pool down.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::debug!("File index closed");
    }

    /// Execute `SELECT 1`.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
