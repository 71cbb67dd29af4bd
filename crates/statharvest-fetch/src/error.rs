//! Error types for fetching, storing and committing artifacts.

use statharvest_db::DatabaseError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from talking to a remote host, classified for the retry policy.
#[derive(Debug, Error)]
pub enum FetchError {
    /// One attempt failed in a way worth retrying (network error, timeout, 5xx).
    #[error("transient network error for {url}: {reason}")]
    TransientNetwork {
        /// Requested URL
        url: String,
        /// HTTP status, if a response arrived
        status: Option<u16>,
        /// Human-readable cause
        reason: String,
    },

    /// Terminal failure for this URL: retries exhausted or a non-retryable status.
    #[error("fetch failed for {url} after {attempts} attempt(s): {reason}")]
    FetchFailed {
        /// Requested URL
        url: String,
        /// Attempts made before giving up
        attempts: u32,
        /// HTTP status of the last attempt, if any
        status: Option<u16>,
        /// Cause of the last failure
        reason: String,
    },

    /// The connection succeeded but the body could not be read to the end.
    #[error("download failed for {url}: {reason}")]
    Download {
        /// Requested URL
        url: String,
        /// What interrupted the body
        reason: String,
    },
}

impl FetchError {
    /// URL the error refers to.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::TransientNetwork { url, .. }
            | Self::FetchFailed { url, .. }
            | Self::Download { url, .. } => url,
        }
    }

    /// HTTP status behind the failure, when there was one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::TransientNetwork { status, .. } | Self::FetchFailed { status, .. } => *status,
            Self::Download { .. } => None,
        }
    }
}

/// Errors from the artifact storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Creating, writing or renaming the artifact failed.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Final location of the artifact
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Reading a stored file failed.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that could not be read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Deleting a superseded artifact failed.
    #[error("failed to remove {path}: {source}")]
    Remove {
        /// File that could not be removed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The path is empty, absolute or leaves the storage root.
    #[error("invalid logical path '{0}'")]
    InvalidPath(String),

    /// Run stats could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure processing one candidate URL. Never aborts a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fetching or reading the body failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Bytes were not written, so nothing was committed.
    #[error("storage write failed: {0}")]
    StorageWrite(#[from] StorageError),

    /// The index rejected the commit; the previous record is untouched.
    #[error("index commit failed: {0}")]
    IndexCommit(#[from] DatabaseError),
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
