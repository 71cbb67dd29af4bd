//! Embedded schema migrations for the file index.

use crate::error::{DatabaseError, Result};
use sqlx::{Pool, Sqlite};

/// Apply any migrations from `migrations/` that are not yet recorded.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    let migrator = sqlx::migrate!("./migrations");
    migrator
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;
    tracing::debug!("Index schema at {} migration(s)", migrator.iter().count());
    Ok(())
}

/// Number of applied migrations, or 0 for a fresh database.
pub async fn get_schema_version(pool: &Pool<Sqlite>) -> Result<i64> {
    let tracked: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_optional(pool)
    .await?;
    if tracked.is_none() {
        return Ok(0);
    }

    let applied = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await?;
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionPool;

    async fn fresh_pool() -> ConnectionPool {
        ConnectionPool::new(":memory:").await.expect("create pool")
    }

    #[tokio::test]
    async fn test_creates_artifacts_table_only() {
        let pool = fresh_pool().await;
        run_migrations(pool.pool()).await.expect("run migrations");

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations'
             ORDER BY name",
        )
        .fetch_all(pool.pool())
        .await
        .expect("query tables");
        assert_eq!(tables, vec!["artifacts"]);

        let indexes: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master
             WHERE type = 'index' AND tbl_name = 'artifacts' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .fetch_all(pool.pool())
        .await
        .expect("query indexes");
        assert_eq!(indexes.len(), 2);
    }

    #[tokio::test]
    async fn test_version_and_rerun() {
        let pool = fresh_pool().await;
        assert_eq!(get_schema_version(pool.pool()).await.expect("version"), 0);

        run_migrations(pool.pool()).await.expect("first run");
        run_migrations(pool.pool()).await.expect("second run is a no-op");

        assert_eq!(get_schema_version(pool.pool()).await.expect("version"), 1);
    }
}
