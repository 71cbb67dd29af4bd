//! Streaming downloads and persistence.

use crate::error::{FetchError, Result};
use crate::hasher::ContentHasher;
use crate::mime::mime_for_file_name;
use crate::retry::{FetchMode, Fetcher};
use crate::storage::{artifact_key, file_name_from_url, sanitize_file_name, ArtifactStorage};
use futures::StreamExt;
use statharvest_core::InstitutionCode;
use statharvest_db::{artifacts, ArtifactRecord, Database, NewArtifact};
use std::sync::Arc;

/// Size of the pieces fed to the hasher.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Upper bound on the buffer reserved up front from `Content-Length`.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// A fully read response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedBody {
    /// The complete body
    pub bytes: Vec<u8>,
    /// SHA-256 hex digest of `bytes`
    pub digest: String,
    /// Length of `bytes`
    pub size_bytes: u64,
}

/// Downloads bodies, stores them and commits them to the file index.
///
/// The whole body is held in memory until it is handed to storage.
#[derive(Clone)]
pub struct Downloader {
    fetcher: Arc<Fetcher>,
    storage: Arc<dyn ArtifactStorage>,
    db: Arc<Database>,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// Downloader sharing the pipeline's fetcher, storage and index.
    #[must_use]
    pub fn new(fetcher: Arc<Fetcher>, storage: Arc<dyn ArtifactStorage>, db: Arc<Database>) -> Self {
        Self {
            fetcher,
            storage,
            db,
        }
    }

    /// Stream the body of `url`, hashing it as it arrives.
    pub async fn fetch_body(&self, url: &str) -> std::result::Result<DownloadedBody, FetchError> {
        let response = self.fetcher.fetch(url, FetchMode::Download).await?;
        let capacity = response
            .head
            .content_length
            .map_or(0, |len| len.min(MAX_PREALLOCATION));
        let mut bytes = Vec::with_capacity(usize::try_from(capacity).unwrap_or(0));
        let mut hasher = ContentHasher::new();
        let mut body = response.body;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| FetchError::Download {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            for piece in chunk.chunks(CHUNK_SIZE) {
                hasher.update(piece);
                bytes.extend_from_slice(piece);
            }
        }

        let size_bytes = hasher.bytes_hashed();
        let digest = hasher.finalize_hex();
        tracing::info!("Downloaded {} ({} bytes)", url, size_bytes);
        Ok(DownloadedBody {
            bytes,
            digest,
            size_bytes,
        })
    }

    /// Write a downloaded body to storage, then record it in the index.
    ///
    /// `previous` is the record currently indexed for `url`, if any. Its file
    /// name is kept, and new content goes to a fresh location, so `previous`
    /// keeps describing the bytes it points to until the commit succeeds.
    /// Only then is the superseded file removed. Nothing is committed if the
    /// storage write fails, and a failed commit removes the new file again.
    pub async fn persist(
        &self,
        institution: &InstitutionCode,
        url: &str,
        file_name: &str,
        body: DownloadedBody,
        previous: Option<&ArtifactRecord>,
    ) -> Result<ArtifactRecord> {
        let file_name = match previous {
            Some(record) => record.file_name.clone(),
            None => sanitize_file_name(file_name),
        };
        let logical_path = artifact_key(institution.as_str(), url, &body.digest, &file_name);
        let storage_path = self.storage.save(&logical_path, &body.bytes).await?;
        let replaced = previous
            .map(|record| record.storage_path.as_str())
            .filter(|old| *old != storage_path);

        let committed = artifacts::commit(
            self.db.pool(),
            &NewArtifact {
                institution: institution.clone(),
                source_url: url.to_string(),
                storage_path: storage_path.clone(),
                mime_type: mime_for_file_name(&file_name).to_string(),
                file_name,
                size_bytes: body.size_bytes,
                content_digest: body.digest,
            },
        )
        .await;

        let record = match committed {
            Ok(record) => record,
            Err(e) => {
                // The same path as `previous` holds identical bytes and stays
                if previous.is_none() || replaced.is_some() {
                    self.discard(&storage_path).await;
                }
                return Err(e.into());
            }
        };

        if let Some(old) = replaced {
            self.discard(old).await;
        }
        Ok(record)
    }

    async fn discard(&self, storage_path: &str) {
        if let Err(e) = self.storage.remove(storage_path).await {
            tracing::warn!("Could not remove {}: {}", storage_path, e);
        }
    }

    /// Download `url` and persist it unconditionally.
    ///
    /// Without a `target_name` the file name comes from the URL.
    pub async fn download(
        &self,
        institution: &InstitutionCode,
        url: &str,
        target_name: Option<&str>,
    ) -> Result<ArtifactRecord> {
        let previous = artifacts::lookup(self.db.pool(), institution, url).await?;
        let body = self.fetch_body(url).await?;
        let file_name = target_name.map_or_else(|| file_name_from_url(url), str::to_string);
        self.persist(institution, url, &file_name, body, previous.as_ref())
            .await
    }
}
