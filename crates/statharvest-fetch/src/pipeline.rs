//! Per-institution harvesting pipeline.
//!
//! For each candidate URL, one at a time:
//!
//! 1. look up the existing index record
//! 2. ask the change detector whether a download is needed
//! 3. stream the body, hashing as it arrives
//! 4. drop the bytes if the digest matches the stored one
//! 5. otherwise save them through storage and commit the index record
//!
//! A failure on one URL is recorded in the run stats and the run moves on.

use crate::change::{ChangeDecision, ChangeDetector};
use crate::discovery::{Candidate, DiscoveryStrategy};
use crate::download::Downloader;
use crate::error::{FetchError, PipelineError, Result};
use crate::retry::{Fetcher, RetryPolicy};
use crate::stats::{RunStats, RunStatsAggregator, RunStatsWriter};
use crate::storage::{file_name_from_url, ArtifactStorage};
use crate::transport::Transport;
use futures::StreamExt;
use statharvest_core::{FetchConfig, InstitutionCode};
use statharvest_db::{artifacts, ArtifactRecord, Database};
use std::sync::Arc;
use std::time::Duration;

/// How an unchanged file was recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnchangedBy {
    /// The remote validator matched, nothing was downloaded.
    Validator,
    /// The body was downloaded and its digest matched.
    Digest,
}

/// Result of processing one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// First copy of this URL was stored.
    Created(ArtifactRecord),
    /// New content replaced the indexed copy.
    Updated(ArtifactRecord),
    /// Nothing was written.
    Unchanged {
        /// The record as it already was
        record: ArtifactRecord,
        /// Which check recognized the content
        by: UnchangedBy,
    },
}

impl Outcome {
    /// The index record after processing.
    #[must_use]
    pub fn record(&self) -> &ArtifactRecord {
        match self {
            Self::Created(record) | Self::Updated(record) | Self::Unchanged { record, .. } => {
                record
            }
        }
    }

    /// Whether bytes were written in this step.
    #[must_use]
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Created(_) | Self::Updated(_))
    }
}

/// Fetches, deduplicates and persists the artifacts of one institution.
#[derive(Debug)]
pub struct Pipeline {
    institution: InstitutionCode,
    fetcher: Arc<Fetcher>,
    detector: ChangeDetector,
    downloader: Downloader,
    db: Arc<Database>,
    stats_writer: Option<RunStatsWriter>,
    url_deadline: Option<Duration>,
}

impl Pipeline {
    /// Create a pipeline for one institution.
    ///
    /// # Arguments
    /// * `institution` - Institution whose records this pipeline writes
    /// * `config` - Fetch settings (timeouts, retries, politeness delay)
    /// * `transport` - HTTP transport
    /// * `storage` - Destination for downloaded bytes
    /// * `db` - File index
    /// * `overwrite` - Always download and replace, ignoring validators and digests
    #[must_use]
    pub fn new(
        institution: InstitutionCode,
        config: &FetchConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn ArtifactStorage>,
        db: Arc<Database>,
        overwrite: bool,
    ) -> Self {
        let fetcher = Arc::new(Fetcher::new(transport, RetryPolicy::from_config(config)));
        Self {
            institution,
            detector: ChangeDetector::new(fetcher.clone(), overwrite),
            downloader: Downloader::new(fetcher.clone(), storage, db.clone()),
            fetcher,
            db,
            stats_writer: None,
            url_deadline: None,
        }
    }

    /// Persist run stats under the given writer at start, after each URL, and at the end.
    #[must_use]
    pub fn with_stats_writer(mut self, writer: RunStatsWriter) -> Self {
        self.stats_writer = Some(writer);
        self
    }

    /// Bound the time spent on each URL during [`Pipeline::run`].
    #[must_use]
    pub fn with_url_deadline(mut self, deadline: Duration) -> Self {
        self.url_deadline = Some(deadline);
        self
    }

    /// Institution this pipeline harvests.
    #[must_use]
    pub fn institution(&self) -> &InstitutionCode {
        &self.institution
    }

    /// Shared fetcher, also handed to discovery strategies.
    #[must_use]
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Process one candidate URL.
    pub async fn process(&self, candidate: &Candidate) -> Result<Outcome> {
        let url = candidate.url.as_str();
        let existing = artifacts::lookup(self.db.pool(), &self.institution, url).await?;

        if let ChangeDecision::Skip(record) = self
            .detector
            .should_download(url, existing.as_ref())
            .await
        {
            return Ok(Outcome::Unchanged {
                record,
                by: UnchangedBy::Validator,
            });
        }

        let body = self.downloader.fetch_body(url).await?;

        if self.detector.is_unchanged(existing.as_ref(), &body.digest) {
            if let Some(record) = existing {
                tracing::debug!("Content of {} unchanged, discarding download", url);
                return Ok(Outcome::Unchanged {
                    record,
                    by: UnchangedBy::Digest,
                });
            }
        }

        let file_name = candidate
            .suggested_file_name
            .clone()
            .unwrap_or_else(|| file_name_from_url(url));
        let record = self
            .downloader
            .persist(&self.institution, url, &file_name, body, existing.as_ref())
            .await?;

        tracing::info!(
            "Stored {} as {} ({} bytes)",
            url,
            record.storage_path,
            record.size_bytes
        );
        Ok(if existing.is_some() {
            Outcome::Updated(record)
        } else {
            Outcome::Created(record)
        })
    }

    /// Process one candidate, giving up once `deadline` has passed.
    ///
    /// Expiry is reported as a download failure; records already committed are untouched.
    pub async fn process_with_deadline(
        &self,
        candidate: &Candidate,
        deadline: Duration,
    ) -> Result<Outcome> {
        match tokio::time::timeout(deadline, self.process(candidate)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Fetch(FetchError::Download {
                url: candidate.url.clone(),
                reason: format!("deadline of {deadline:?} exceeded"),
            })),
        }
    }

    /// Run over every candidate produced by `strategy`.
    ///
    /// Per-URL failures are recorded and never abort the run.
    pub async fn run(&self, strategy: &dyn DiscoveryStrategy) -> RunStats {
        let mut stats = RunStatsAggregator::new(self.institution.clone());
        tracing::info!("Starting run {} for {}", stats.snapshot().run_id, self.institution);
        self.write_stats(stats.snapshot()).await;

        let mut candidates = strategy.candidates(&self.fetcher);
        while let Some(item) = candidates.next().await {
            match item {
                Ok(candidate) => {
                    let result = match self.url_deadline {
                        Some(deadline) => self.process_with_deadline(&candidate, deadline).await,
                        None => self.process(&candidate).await,
                    };
                    match result {
                        Ok(outcome) if outcome.is_stored() => {
                            stats.record_success(outcome.record().size_bytes);
                        }
                        Ok(_) => stats.record_unchanged(),
                        Err(e) => {
                            tracing::error!("Failed to process {}: {}", candidate.url, e);
                            stats.record_failure(&candidate.url, &e);
                        }
                    }
                }
                Err(e) => stats.record_error(e.url(), &e),
            }
            self.write_stats(stats.snapshot()).await;
        }

        let stats = stats.finalize();
        self.write_stats(&stats).await;
        tracing::info!("Finished run {}: {}", stats.run_id, stats);
        stats
    }

    async fn write_stats(&self, stats: &RunStats) {
        if let Some(writer) = &self.stats_writer {
            if let Err(e) = writer.write(stats).await {
                tracing::warn!("Failed to write run stats for {}: {}", self.institution, e);
            }
        }
    }
}
