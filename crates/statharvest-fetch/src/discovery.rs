//! Candidate discovery strategies.
//!
//! A strategy yields the URLs a run should consider. The pipeline consumes
//! them one at a time and knows nothing about how they were found.

use crate::error::FetchError;
use crate::retry::Fetcher;
use crate::storage::sanitize_file_name;
use futures::stream::{self, BoxStream, StreamExt};
use scraper::{Html, Selector};
use statharvest_core::InstitutionConfig;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use url::Url;

/// Extensions treated as downloadable data files.
pub const DATA_FILE_EXTENSIONS: &[&str] = &[".xls", ".xlsx", ".csv", ".pdf", ".doc", ".docx", ".zip"];

/// A URL worth fetching, with an optional preferred file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Absolute URL to fetch
    pub url: String,
    /// Name to store under instead of the last URL segment
    pub suggested_file_name: Option<String>,
}

impl Candidate {
    /// Candidate named after its URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            suggested_file_name: None,
        }
    }

    /// Prefer `name` when storing.
    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.suggested_file_name = Some(name.into());
        self
    }
}

/// Lazily produced candidates. An `Err` item is a discovery failure, not a file failure.
pub type CandidateStream<'a> = BoxStream<'a, Result<Candidate, FetchError>>;

/// Source of candidates for one run.
pub trait DiscoveryStrategy: Send + Sync {
    /// Candidates for this run; `fetcher` is available for listing pages.
    fn candidates<'a>(&'a self, fetcher: &'a Fetcher) -> CandidateStream<'a>;
}

/// A fixed list of candidates.
#[derive(Debug, Clone, Default)]
pub struct StaticUrls {
    candidates: Vec<Candidate>,
}

impl StaticUrls {
    /// Yield exactly `candidates`, in order.
    #[must_use]
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    /// Candidates without suggested names.
    #[must_use]
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(urls.into_iter().map(Candidate::new).collect())
    }
}

impl DiscoveryStrategy for StaticUrls {
    fn candidates<'a>(&'a self, _fetcher: &'a Fetcher) -> CandidateStream<'a> {
        stream::iter(self.candidates.iter().cloned().map(Ok)).boxed()
    }
}

/// Links to data files found on a single listing page.
#[derive(Debug, Clone)]
pub struct FileLinkDiscovery {
    page_url: Url,
    extensions: Vec<String>,
}

impl FileLinkDiscovery {
    /// Scan `page_url` for the default data-file extensions.
    #[must_use]
    pub fn new(page_url: Url) -> Self {
        Self {
            page_url,
            extensions: DATA_FILE_EXTENSIONS.iter().map(|e| (*e).to_string()).collect(),
        }
    }

    /// Listing page at the institution's `base_url` joined with its `data_path`.
    pub fn for_institution(config: &InstitutionConfig) -> Result<Self, url::ParseError> {
        let page_url = Url::parse(&config.base_url)?.join(&config.data_path)?;
        Ok(Self::new(page_url))
    }

    /// Replace the accepted extensions (with leading dot, matched case-insensitively).
    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// The listing page.
    #[must_use]
    pub fn page_url(&self) -> &Url {
        &self.page_url
    }

    /// Extract candidate links from a listing page.
    #[must_use]
    pub fn extract_links(&self, html: &str) -> Vec<Candidate> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for anchor in document.select(anchor_selector()) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Ok(resolved) = self.page_url.join(href.trim()) else {
                continue;
            };
            if !matches!(resolved.scheme(), "http" | "https") {
                continue;
            }
            let Some(extension) = self.matching_extension(&resolved) else {
                continue;
            };
            if !seen.insert(resolved.as_str().to_string()) {
                continue;
            }

            let text = anchor.text().collect::<Vec<_>>().join(" ");
            let title = text.split_whitespace().collect::<Vec<_>>().join(" ");
            let suggested = if title.is_empty() {
                basename(&resolved)
            } else if title.to_ascii_lowercase().ends_with(extension) {
                title
            } else {
                format!("{title}{extension}")
            };

            candidates.push(Candidate {
                url: resolved.into(),
                suggested_file_name: Some(sanitize_file_name(&suggested)),
            });
        }

        candidates
    }

    fn matching_extension(&self, url: &Url) -> Option<&str> {
        let path = url.path().to_ascii_lowercase();
        self.extensions
            .iter()
            .find(|ext| path.ends_with(ext.as_str()))
            .map(String::as_str)
    }
}

impl DiscoveryStrategy for FileLinkDiscovery {
    fn candidates<'a>(&'a self, fetcher: &'a Fetcher) -> CandidateStream<'a> {
        let listing = async move {
            match fetcher.fetch_page(self.page_url.as_str()).await {
                Ok(html) => {
                    let found = self.extract_links(&html);
                    tracing::info!("Found {} data links on {}", found.len(), self.page_url);
                    found.into_iter().map(Ok).collect::<Vec<_>>()
                }
                Err(e) => {
                    tracing::error!("Failed to load listing page {}: {}", self.page_url, e);
                    vec![Err(e)]
                }
            }
        };
        stream::once(listing).flat_map(stream::iter).boxed()
    }
}

fn anchor_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("a[href]").expect("valid selector"))
}

fn basename(url: &Url) -> String {
    Path::new(url.path())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::transport::{FetchResponse, ResponseHead, Transport, TransportError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    const LISTING: &str = r#"
        <html><body>
          <a href="/files/gdp_2024.xlsx">  GDP
              2024 </a>
          <a href="files/prices.CSV">Consumer prices</a>
          <a href="https://cdn.nsi.bg/annual.pdf?rev=3"></a>
          <a href="/about.html">About</a>
          <a href="/files/gdp_2024.xlsx">GDP again</a>
          <a href="mailto:info@nsi.bg">Mail</a>
          <a>no href</a>
        </body></html>
    "#;

    struct PageTransport {
        page: Option<&'static str>,
    }

    #[async_trait]
    impl Transport for PageTransport {
        async fn head(&self, _url: &str, _timeout: Duration) -> Result<ResponseHead, TransportError> {
            Err(TransportError::Connect("not used".into()))
        }

        async fn get(&self, _url: &str, _timeout: Duration) -> Result<FetchResponse, TransportError> {
            match self.page {
                Some(page) => Ok(FetchResponse {
                    head: ResponseHead {
                        status: 200,
                        etag: None,
                        content_length: None,
                    },
                    body: stream::iter(vec![Ok(Bytes::from_static(page.as_bytes()))]).boxed(),
                }),
                None => Ok(FetchResponse {
                    head: ResponseHead {
                        status: 404,
                        etag: None,
                        content_length: None,
                    },
                    body: stream::empty().boxed(),
                }),
            }
        }
    }

    fn fetcher(page: Option<&'static str>) -> Fetcher {
        let policy = RetryPolicy {
            request_delay: Duration::ZERO,
            ..RetryPolicy::default()
        };
        Fetcher::new(Arc::new(PageTransport { page }), policy)
    }

    fn discovery() -> FileLinkDiscovery {
        FileLinkDiscovery::new(Url::parse("https://www.nsi.bg/bg/content/766/").expect("valid url"))
    }

    #[test]
    fn test_extract_links() {
        let links = discovery().extract_links(LISTING);
        assert_eq!(
            links,
            vec![
                Candidate::new("https://www.nsi.bg/files/gdp_2024.xlsx").with_file_name("GDP 2024.xlsx"),
                Candidate::new("https://www.nsi.bg/bg/content/766/files/prices.CSV")
                    .with_file_name("Consumer prices.csv"),
                Candidate::new("https://cdn.nsi.bg/annual.pdf?rev=3").with_file_name("annual.pdf"),
            ]
        );
    }

    #[test]
    fn test_custom_extensions() {
        let links = discovery().with_extensions([".HTML"]).extract_links(LISTING);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://www.nsi.bg/about.html");
    }

    #[test]
    fn test_for_institution_joins_data_path() {
        let config = InstitutionConfig {
            base_url: "https://www.bnb.bg/".to_string(),
            data_path: "Statistics/index.htm".to_string(),
            enabled: true,
        };
        let discovery = FileLinkDiscovery::for_institution(&config).expect("valid url");
        assert_eq!(
            discovery.page_url().as_str(),
            "https://www.bnb.bg/Statistics/index.htm"
        );
    }

    #[tokio::test]
    async fn test_static_urls_stream() {
        let strategy = StaticUrls::from_urls(["https://a.example/1.csv", "https://a.example/2.csv"]);
        let fetcher = fetcher(None);
        let found: Vec<_> = strategy.candidates(&fetcher).collect().await;
        assert_eq!(found.len(), 2);
        assert_eq!(
            found[1].as_ref().expect("candidate").url,
            "https://a.example/2.csv"
        );
    }

    #[tokio::test]
    async fn test_file_link_discovery_stream() {
        let fetcher = fetcher(Some(LISTING));
        let strategy = discovery();
        let found: Vec<_> = strategy.candidates(&fetcher).collect().await;
        assert_eq!(found.len(), 3);
        assert!(found.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn test_listing_failure_yields_single_error() {
        let fetcher = fetcher(None);
        let strategy = discovery();
        let found: Vec<_> = strategy.candidates(&fetcher).collect().await;
        assert_eq!(found.len(), 1);
        let err = found[0].as_ref().expect_err("listing fails");
        assert_eq!(err.url(), "https://www.nsi.bg/bg/content/766/");
        assert_eq!(err.status(), Some(404));
    }
}
