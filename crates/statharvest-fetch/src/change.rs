//! Decides whether a URL needs to be downloaded again.
//!
//! Servers for these datasets sometimes publish the SHA-256 of a file as its
//! `ETag`. When a record exists, a cheap HEAD request is tried first and the
//! validator is compared byte-for-byte against the stored digest. Anything
//! short of an exact match, including a failed probe, falls through to a full
//! download whose digest is compared afterwards.

use crate::retry::Fetcher;
use statharvest_db::ArtifactRecord;
use std::sync::Arc;

/// Why a download is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchReason {
    /// Nothing indexed for this URL yet.
    NoRecord,
    /// Overwrite mode refetches everything.
    Overwrite,
    /// The remote ETag differs from the stored digest.
    ValidatorMismatch,
    /// The server sent no ETag.
    ValidatorAbsent,
    /// The HEAD request failed or returned an error status.
    ProbeFailed,
}

/// Outcome of the pre-download check.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeDecision {
    /// The remote validator matches the stored digest.
    Skip(ArtifactRecord),
    /// Download the body.
    Refetch(RefetchReason),
}

/// Pre- and post-download change detection.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    fetcher: Arc<Fetcher>,
    overwrite: bool,
}

impl ChangeDetector {
    /// Detector probing through `fetcher`; `overwrite` disables every skip.
    #[must_use]
    pub fn new(fetcher: Arc<Fetcher>, overwrite: bool) -> Self {
        Self { fetcher, overwrite }
    }

    /// Whether overwrite mode is on.
    #[must_use]
    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    /// Decide before downloading. Never fails: a probe error means "download".
    pub async fn should_download(
        &self,
        url: &str,
        existing: Option<&ArtifactRecord>,
    ) -> ChangeDecision {
        let Some(record) = existing else {
            return ChangeDecision::Refetch(RefetchReason::NoRecord);
        };
        if self.overwrite {
            return ChangeDecision::Refetch(RefetchReason::Overwrite);
        }

        match self.fetcher.probe(url).await {
            Ok(head) => match head.etag {
                Some(etag) if etag == record.content_digest => {
                    tracing::debug!("Validator for {} matches stored digest, skipping", url);
                    ChangeDecision::Skip(record.clone())
                }
                Some(_) => ChangeDecision::Refetch(RefetchReason::ValidatorMismatch),
                None => ChangeDecision::Refetch(RefetchReason::ValidatorAbsent),
            },
            Err(e) => {
                tracing::warn!("Probe for {} failed, falling back to download: {}", url, e);
                ChangeDecision::Refetch(RefetchReason::ProbeFailed)
            }
        }
    }

    /// Decide after downloading: identical bytes need no new write.
    #[must_use]
    pub fn is_unchanged(&self, existing: Option<&ArtifactRecord>, fresh_digest: &str) -> bool {
        !self.overwrite && existing.is_some_and(|r| r.content_digest == fresh_digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::transport::{FetchResponse, ResponseHead, Transport, TransportError};
    use async_trait::async_trait;
    use chrono::Utc;
    use statharvest_core::InstitutionCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const DIGEST: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    /// Answers HEAD with a fixed result and refuses GET.
    struct HeadOnly {
        head: Result<ResponseHead, ()>,
        heads: AtomicUsize,
    }

    impl HeadOnly {
        fn etag(etag: Option<&str>) -> Arc<Self> {
            Self::status(200, etag)
        }

        fn status(status: u16, etag: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                head: Ok(ResponseHead {
                    status,
                    etag: etag.map(str::to_string),
                    content_length: None,
                }),
                heads: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                head: Err(()),
                heads: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for HeadOnly {
        async fn head(&self, _url: &str, _timeout: Duration) -> Result<ResponseHead, TransportError> {
            self.heads.fetch_add(1, Ordering::SeqCst);
            self.head
                .clone()
                .map_err(|()| TransportError::Connect("connection refused".into()))
        }

        async fn get(&self, url: &str, _timeout: Duration) -> Result<FetchResponse, TransportError> {
            panic!("unexpected GET {url}");
        }
    }

    fn detector(transport: Arc<HeadOnly>, overwrite: bool) -> ChangeDetector {
        let policy = RetryPolicy {
            request_delay: Duration::ZERO,
            ..RetryPolicy::default()
        };
        ChangeDetector::new(Arc::new(Fetcher::new(transport, policy)), overwrite)
    }

    fn record() -> ArtifactRecord {
        ArtifactRecord {
            id: 1,
            institution: InstitutionCode::new("NSI").expect("valid code"),
            source_url: "https://www.nsi.bg/gdp.xlsx".to_string(),
            storage_path: "/data/NSI/gdp.xlsx".to_string(),
            file_name: "gdp.xlsx".to_string(),
            mime_type: "application/octet-stream".to_string(),
            size_bytes: 4,
            content_digest: DIGEST.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_no_record_refetches_without_probe() {
        let transport = HeadOnly::etag(Some(DIGEST));
        let decision = detector(transport.clone(), false)
            .should_download("https://www.nsi.bg/gdp.xlsx", None)
            .await;
        assert_eq!(decision, ChangeDecision::Refetch(RefetchReason::NoRecord));
        assert_eq!(transport.heads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_matching_validator_skips() {
        let existing = record();
        let decision = detector(HeadOnly::etag(Some(DIGEST)), false)
            .should_download(&existing.source_url, Some(&existing))
            .await;
        assert_eq!(decision, ChangeDecision::Skip(existing));
    }

    #[tokio::test]
    async fn test_validator_compared_byte_for_byte() {
        let existing = record();
        let quoted = format!("\"{DIGEST}\"");
        let decision = detector(HeadOnly::etag(Some(&quoted)), false)
            .should_download(&existing.source_url, Some(&existing))
            .await;
        assert_eq!(
            decision,
            ChangeDecision::Refetch(RefetchReason::ValidatorMismatch)
        );
    }

    #[tokio::test]
    async fn test_absent_validator_or_failed_probe_refetches() {
        let existing = record();

        let absent = detector(HeadOnly::etag(None), false)
            .should_download(&existing.source_url, Some(&existing))
            .await;
        assert_eq!(absent, ChangeDecision::Refetch(RefetchReason::ValidatorAbsent));

        let transport = HeadOnly::failing();
        let failed = detector(transport.clone(), false)
            .should_download(&existing.source_url, Some(&existing))
            .await;
        assert_eq!(failed, ChangeDecision::Refetch(RefetchReason::ProbeFailed));
        // Probes are never retried
        assert_eq!(transport.heads.load(Ordering::SeqCst), 1);

        let not_allowed = detector(HeadOnly::status(405, Some(DIGEST)), false)
            .should_download(&existing.source_url, Some(&existing))
            .await;
        assert_eq!(not_allowed, ChangeDecision::Refetch(RefetchReason::ProbeFailed));
    }

    #[tokio::test]
    async fn test_overwrite_always_refetches() {
        let existing = record();
        let transport = HeadOnly::etag(Some(DIGEST));
        let detector = detector(transport.clone(), true);

        let decision = detector
            .should_download(&existing.source_url, Some(&existing))
            .await;
        assert_eq!(decision, ChangeDecision::Refetch(RefetchReason::Overwrite));
        assert_eq!(transport.heads.load(Ordering::SeqCst), 0);
        assert!(!detector.is_unchanged(Some(&existing), DIGEST));
    }

    #[test]
    fn test_is_unchanged_after_download() {
        let existing = record();
        let detector = detector(HeadOnly::etag(None), false);
        assert!(detector.is_unchanged(Some(&existing), DIGEST));
        assert!(!detector.is_unchanged(Some(&existing), "other"));
        assert!(!detector.is_unchanged(None, DIGEST));
    }
}
