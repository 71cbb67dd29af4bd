//! HTTP transport seam.
//!
//! [`Transport`] is the single place the pipeline touches the network. The
//! production implementation wraps `reqwest`; tests substitute scripted mocks.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_LENGTH, ETAG};
use statharvest_core::FetchConfig;
use std::time::Duration;
use thiserror::Error;

/// `Accept` header sent with every request.
pub const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// `Accept-Language` header sent with every request.
pub const BROWSER_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

/// A single attempt's failure below the HTTP status level.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No connection could be made.
    #[error("connection error: {0}")]
    Connect(String),

    /// No complete response within the timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection broke while the body was streaming.
    #[error("error reading body: {0}")]
    Body(String),

    /// The request could not even be built (bad URL, bad header).
    #[error("invalid request: {0}")]
    Request(String),
}

impl TransportError {
    /// Whether another attempt could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Request(_))
    }
}

/// Body of a response, delivered as it arrives.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Status line and the headers the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// HTTP status code.
    pub status: u16,
    /// `ETag` exactly as sent by the server, quotes included.
    pub etag: Option<String>,
    /// Declared body length, if sent.
    pub content_length: Option<u64>,
}

impl ResponseHead {
    /// 2xx status.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A response whose body has not been read yet.
pub struct FetchResponse {
    /// Status and headers.
    pub head: ResponseHead,
    /// Unread body.
    pub body: BodyStream,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

/// Minimal HTTP client used by the fetcher.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Metadata-only request.
    async fn head(&self, url: &str, timeout: Duration) -> Result<ResponseHead, TransportError>;

    /// Full request; the body is streamed by the caller.
    async fn get(&self, url: &str, timeout: Duration) -> Result<FetchResponse, TransportError>;
}

/// `reqwest`-backed transport with a fixed user agent and browser-like headers.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client sending `config.user_agent` and the browser headers.
    pub fn new(config: &FetchConfig) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE),
        );

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self { client })
    }

    /// Wrap an already configured client.
    #[must_use]
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn classify(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_builder() {
        TransportError::Request(err.to_string())
    } else if err.is_body() || err.is_decode() {
        TransportError::Body(err.to_string())
    } else {
        TransportError::Connect(err.to_string())
    }
}

fn response_head(response: &reqwest::Response) -> ResponseHead {
    let headers = response.headers();
    ResponseHead {
        status: response.status().as_u16(),
        etag: headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        content_length: headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()),
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn head(&self, url: &str, timeout: Duration) -> Result<ResponseHead, TransportError> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(&e))?;
        Ok(response_head(&response))
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<FetchResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(&e))?;
        let head = response_head(&response);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| classify(&e)))
            .boxed();
        Ok(FetchResponse { head, body })
    }
}
