//! File index operations over the `artifacts` table.
//!
//! The index maps `(institution, source_url)` to the latest stored artifact.
//! A `UNIQUE(institution, source_url)` constraint plus a single-statement
//! upsert keep exactly one row per key, even when several runs commit the same
//! key concurrently: `SQLite` serializes the writes and the later commit wins.
//!
//! Commit policy: `created_at` and `file_name` are kept from the first write;
//! every later commit replaces `storage_path`, `mime_type`, `size_bytes`,
//! `content_digest` and `updated_at`.

use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use statharvest_core::InstitutionCode;

const SELECT_COLUMNS: &str = "id, institution, source_url, storage_path, file_name, mime_type,
                              size_bytes, content_digest, created_at, updated_at";

/// The latest stored artifact for one `(institution, source_url)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Row identifier
    pub id: i64,
    /// Institution the artifact was harvested from
    pub institution: InstitutionCode,
    /// Absolute URL the bytes were fetched from
    pub source_url: String,
    /// Locator returned by the storage backend
    pub storage_path: String,
    /// File name chosen at first download
    pub file_name: String,
    /// MIME type derived from the file extension
    pub mime_type: String,
    /// Exact byte count of the stored artifact
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the artifact bytes
    pub content_digest: String,
    /// When the record was first written
    pub created_at: DateTime<Utc>,
    /// When the record was last replaced
    pub updated_at: DateTime<Utc>,
}

/// Metadata for a commit. The bytes themselves must already be stored at
/// `storage_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArtifact {
    /// Institution the artifact was harvested from
    pub institution: InstitutionCode,
    /// Absolute URL the bytes were fetched from
    pub source_url: String,
    /// Locator returned by the storage backend
    pub storage_path: String,
    /// File name derived at download time
    pub file_name: String,
    /// MIME type derived from the file extension
    pub mime_type: String,
    /// Exact byte count
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the bytes
    pub content_digest: String,
}

/// Look up the record for `(institution, source_url)`.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a row cannot be decoded.
pub async fn lookup(
    pool: &Pool<Sqlite>,
    institution: &InstitutionCode,
    source_url: &str,
) -> Result<Option<ArtifactRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM artifacts WHERE institution = ? AND source_url = ?"
    ))
    .bind(institution.as_str())
    .bind(source_url)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(parse_artifact_row).transpose()
}

/// Insert a new record or update the existing one in place.
///
/// # Errors
/// Returns `DatabaseError::InvalidValue` if the size does not fit the schema,
/// or `DatabaseError::Sqlx` if the backend rejects the write. A failed commit
/// leaves the previous record untouched.
pub async fn commit(pool: &Pool<Sqlite>, artifact: &NewArtifact) -> Result<ArtifactRecord> {
    let size = i64::try_from(artifact.size_bytes).map_err(|_| {
        DatabaseError::InvalidValue(format!("size {} exceeds index range", artifact.size_bytes))
    })?;
    let now = Utc::now().to_rfc3339();

    let row = sqlx::query(&format!(
        "INSERT INTO artifacts (institution, source_url, storage_path, file_name, mime_type,
                                size_bytes, content_digest, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (institution, source_url) DO UPDATE SET
             storage_path = excluded.storage_path,
             mime_type = excluded.mime_type,
             size_bytes = excluded.size_bytes,
             content_digest = excluded.content_digest,
             updated_at = excluded.updated_at
         RETURNING {SELECT_COLUMNS}"
    ))
    .bind(artifact.institution.as_str())
    .bind(&artifact.source_url)
    .bind(&artifact.storage_path)
    .bind(&artifact.file_name)
    .bind(&artifact.mime_type)
    .bind(size)
    .bind(&artifact.content_digest)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;

    let record = parse_artifact_row(&row)?;
    tracing::debug!(
        institution = %record.institution,
        url = %record.source_url,
        digest = %record.content_digest,
        "Committed artifact record {}",
        record.id
    );
    Ok(record)
}

/// All records for one institution, ordered by URL.
pub async fn list_by_institution(
    pool: &Pool<Sqlite>,
    institution: &InstitutionCode,
) -> Result<Vec<ArtifactRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM artifacts WHERE institution = ? ORDER BY source_url"
    ))
    .bind(institution.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_artifact_row).collect()
}

/// Records across all institutions whose content has the given digest.
pub async fn find_by_digest(pool: &Pool<Sqlite>, digest: &str) -> Result<Vec<ArtifactRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM artifacts WHERE content_digest = ?
         ORDER BY institution, source_url"
    ))
    .bind(digest)
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_artifact_row).collect()
}

/// Number of records, optionally restricted to one institution.
pub async fn count(pool: &Pool<Sqlite>, institution: Option<&InstitutionCode>) -> Result<u64> {
    let total: i64 = match institution {
        Some(code) => {
            sqlx::query_scalar("SELECT COUNT(*) FROM artifacts WHERE institution = ?")
                .bind(code.as_str())
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM artifacts")
                .fetch_one(pool)
                .await?
        }
    };

    u64::try_from(total).map_err(|_| DatabaseError::Decode(format!("negative count {total}")))
}

fn parse_artifact_row(row: &SqliteRow) -> Result<ArtifactRecord> {
    let institution: String = row.try_get("institution")?;
    let institution = InstitutionCode::new(institution)
        .map_err(|e| DatabaseError::Decode(format!("stored institution: {e}")))?;

    let size_bytes: i64 = row.try_get("size_bytes")?;
    let size_bytes = u64::try_from(size_bytes)
        .map_err(|_| DatabaseError::Decode(format!("negative size_bytes {size_bytes}")))?;

    Ok(ArtifactRecord {
        id: row.try_get("id")?,
        institution,
        source_url: row.try_get("source_url")?,
        storage_path: row.try_get("storage_path")?,
        file_name: row.try_get("file_name")?,
        mime_type: row.try_get("mime_type")?,
        size_bytes,
        content_digest: row.try_get("content_digest")?,
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
    })
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("{column} '{raw}': {e}")))
}
