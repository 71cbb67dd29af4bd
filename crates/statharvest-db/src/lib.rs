//! Durable file index for statharvest.
//!
//! One `artifacts` row per `(institution, source_url)` records where the
//! latest copy of a file lives and what its content digest was. Rows are
//! written by a single upsert statement so concurrent institution runs never
//! create duplicates. The schema ships as embedded `SQLx` migrations and the
//! pool runs `SQLite` in WAL mode.
//!
//! ```ignore
//! use statharvest_db::{artifacts, Database};
//!
//! let db = Database::open_migrated("index.db").await?;
//! let record = artifacts::lookup(db.pool(), &institution, url).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod artifacts;
pub mod connection;
pub mod error;
pub mod migrations;

pub use artifacts::{ArtifactRecord, NewArtifact};
pub use connection::ConnectionPool;
pub use error::{DatabaseError, Result};

use std::path::Path;

/// Handle to the index database, cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Open `path`, creating the file and its parent directories if needed.
    ///
    /// `:memory:` opens a private in-memory index, used by tests.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path != Path::new(":memory:") {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(Self {
            pool: ConnectionPool::new(path).await?,
        })
    }

    /// [`Database::new`] followed by [`Database::run_migrations`].
    pub async fn open_migrated(path: impl AsRef<Path>) -> Result<Self> {
        let db = Self::new(path).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Bring the schema up to date.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(self.pool()).await
    }

    /// Number of migrations applied so far.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(self.pool()).await
    }

    /// Pool to pass to the [`artifacts`] queries.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        self.pool.pool()
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    /// Wait for checked-out connections and shut the pool down.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
