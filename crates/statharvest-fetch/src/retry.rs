//! Retrying fetcher with exponential backoff and a politeness delay.
//!
//! Attempt `n` (0-indexed) that fails transiently is followed by a wait of
//! `request_delay * 2^n`; there is no wait after the final attempt. Every
//! successful response is followed by one `request_delay` pause so a single
//! host is never hammered.

use crate::error::FetchError;
use crate::transport::{FetchResponse, ResponseHead, Transport, TransportError};
use futures::StreamExt;
use statharvest_core::FetchConfig;
use std::sync::Arc;
use std::time::Duration;

/// What a request is for; selects the method and the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// HEAD with the short request timeout.
    Metadata,
    /// GET of an HTML page with the short request timeout.
    Page,
    /// GET of a (possibly large) file with the long download timeout.
    Download,
}

/// Backoff before retrying after attempt `retry_count` (0-indexed).
#[must_use]
pub fn retry_delay(retry_count: u32, base: Duration) -> Duration {
    let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

/// Whether an HTTP status is worth another attempt.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

/// Timing and attempt limits for a [`Fetcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Politeness pause after success and base of the backoff.
    pub request_delay: Duration,
    /// Timeout for metadata probes and pages.
    pub request_timeout: Duration,
    /// Timeout for file bodies.
    pub download_timeout: Duration,
}

impl RetryPolicy {
    /// Policy from the `[fetch]` settings; at least one attempt.
    #[must_use]
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            request_delay: config.request_delay(),
            request_timeout: config.request_timeout(),
            download_timeout: config.download_timeout(),
        }
    }

    /// Per-attempt timeout for `mode`.
    #[must_use]
    pub fn timeout_for(&self, mode: FetchMode) -> Duration {
        match mode {
            FetchMode::Metadata | FetchMode::Page => self.request_timeout,
            FetchMode::Download => self.download_timeout,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

/// HTTP client wrapper that applies the retry policy.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Fetcher issuing requests through `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Limits in effect.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `url`, retrying transient failures.
    ///
    /// Non-retryable statuses (404 and other 4xx) fail on the first attempt.
    /// For [`FetchMode::Metadata`] the returned body is empty.
    pub async fn fetch(&self, url: &str, mode: FetchMode) -> Result<FetchResponse, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_reason = String::new();
        let mut last_status = None;

        for attempt in 0..max_attempts {
            match self.attempt(url, mode).await {
                Ok(response) => {
                    self.politeness_pause().await;
                    return Ok(response);
                }
                Err(FetchError::TransientNetwork { status, reason, .. }) => {
                    tracing::warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt + 1,
                        max_attempts,
                        url,
                        reason
                    );
                    last_reason = reason;
                    last_status = status;
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(retry_delay(attempt, self.policy.request_delay)).await;
                    }
                }
                Err(FetchError::FetchFailed { status, reason, .. }) => {
                    return Err(FetchError::FetchFailed {
                        url: url.to_string(),
                        attempts: attempt + 1,
                        status,
                        reason,
                    });
                }
                Err(other) => return Err(other),
            }
        }

        Err(FetchError::FetchFailed {
            url: url.to_string(),
            attempts: max_attempts,
            status: last_status,
            reason: last_reason,
        })
    }

    /// Single metadata request, no retries.
    ///
    /// Used for cheap validator checks where a failure simply means "download".
    pub async fn probe(&self, url: &str) -> Result<ResponseHead, FetchError> {
        let head = self.attempt(url, FetchMode::Metadata).await?.head;
        self.politeness_pause().await;
        Ok(head)
    }

    /// Fetch an HTML page and decode it as text.
    pub async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let mut response = self.fetch(url, FetchMode::Page).await?;
        let mut buf = Vec::new();
        while let Some(chunk) = response.body.next().await {
            let chunk = chunk.map_err(|e| FetchError::Download {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            buf.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    async fn attempt(&self, url: &str, mode: FetchMode) -> Result<FetchResponse, FetchError> {
        let timeout = self.policy.timeout_for(mode);
        let result = match mode {
            FetchMode::Metadata => self
                .transport
                .head(url, timeout)
                .await
                .map(|head| FetchResponse {
                    head,
                    body: futures::stream::empty().boxed(),
                }),
            FetchMode::Page | FetchMode::Download => self.transport.get(url, timeout).await,
        };

        match result {
            Ok(response) if response.head.is_success() => Ok(response),
            Ok(response) => {
                let status = response.head.status;
                let reason = status_reason(status);
                if is_retryable_status(status) {
                    Err(FetchError::TransientNetwork {
                        url: url.to_string(),
                        status: Some(status),
                        reason,
                    })
                } else {
                    Err(FetchError::FetchFailed {
                        url: url.to_string(),
                        attempts: 1,
                        status: Some(status),
                        reason,
                    })
                }
            }
            Err(err) => Err(transport_failure(url, &err)),
        }
    }

    async fn politeness_pause(&self) {
        if !self.policy.request_delay.is_zero() {
            tokio::time::sleep(self.policy.request_delay).await;
        }
    }
}

fn status_reason(status: u16) -> String {
    match reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
    {
        Some(text) => format!("HTTP {status} {text}"),
        None => format!("HTTP {status}"),
    }
}

fn transport_failure(url: &str, err: &TransportError) -> FetchError {
    if err.is_transient() {
        FetchError::TransientNetwork {
            url: url.to_string(),
            status: None,
            reason: err.to_string(),
        }
    } else {
        FetchError::FetchFailed {
            url: url.to_string(),
            attempts: 1,
            status: None,
            reason: err.to_string(),
        }
    }
}
