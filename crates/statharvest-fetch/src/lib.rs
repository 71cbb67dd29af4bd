//! Statharvest Fetch Pipeline
//!
//! Downloads statistical datasets published by institutions, skips content
//! that has not changed, and records every stored artifact in the file index.
//!
//! # Components
//!
//! - **Transport**: the HTTP seam ([`Transport`], [`ReqwestTransport`])
//! - **Fetcher**: retries with exponential backoff plus a politeness delay
//! - **Change detection**: `ETag` probe first, content digest as the fallback
//! - **Downloader**: streams bodies through a SHA-256 hasher, then stores and commits
//! - **Run stats**: per-run counters written next to the artifacts
//! - **Discovery**: pluggable strategies yielding candidate URLs
//!
//! # Example
//!
//! ```ignore
//! use statharvest_fetch::{FileLinkDiscovery, FileStorage, Pipeline, ReqwestTransport, RunStatsWriter};
//!
//! let pipeline = Pipeline::new(code, &config.fetch, transport, storage, db, false)
//!     .with_stats_writer(RunStatsWriter::new(&config.storage.base_storage_dir));
//! let stats = pipeline.run(&FileLinkDiscovery::for_institution(&institution)?).await;
//! println!("{stats}");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod change;
pub mod discovery;
pub mod download;
pub mod error;
pub mod hasher;
pub mod mime;
pub mod pipeline;
pub mod retry;
pub mod stats;
pub mod storage;
pub mod transport;

pub use change::{ChangeDecision, ChangeDetector, RefetchReason};
pub use discovery::{Candidate, DiscoveryStrategy, FileLinkDiscovery, StaticUrls};
pub use download::{DownloadedBody, Downloader};
pub use error::{FetchError, PipelineError, Result, StorageError};
pub use hasher::ContentHasher;
pub use pipeline::{Outcome, Pipeline, UnchangedBy};
pub use retry::{FetchMode, Fetcher, RetryPolicy};
pub use stats::{find_stale_runs, RunError, RunStats, RunStatsAggregator, RunStatsWriter, StaleRun};
pub use storage::{artifact_key, ArtifactStorage, FileStorage};
pub use transport::{FetchResponse, ResponseHead, ReqwestTransport, Transport, TransportError};
