//! Per-run statistics.
//!
//! A [`RunStatsAggregator`] is owned by exactly one pipeline run. Its
//! snapshot is written to disk when the run starts and after every URL, and
//! the final [`RunStats`] is produced by [`RunStatsAggregator::finalize`],
//! which consumes the aggregator.
//!
//! On-disk layout under the storage root:
//!
//! ```text
//! <root>/<institution>/<YYYYMMDD>/stats_<YYYYMMDD_HHMMSS>.json
//! <root>/<institution>/latest_stats.json
//! ```
//!
//! A stats file that still has `end_time: null` long after it was last
//! touched belongs to a run that crashed or hung; see [`find_stale_runs`].

use crate::error::StorageError;
use crate::storage::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statharvest_core::InstitutionCode;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Name of the per-institution file that always holds the most recent run.
pub const LATEST_STATS_FILE: &str = "latest_stats.json";

/// Default age after which an unfinished run is reported as stale.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3 * 60 * 60);

/// One failed URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    /// URL that failed
    pub url: String,
    /// Rendered error
    pub error: String,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
}

/// Counters and errors for one run of the pipeline over one institution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Unique per run
    pub run_id: Uuid,
    /// Institution harvested
    pub institution: InstitutionCode,
    /// When the run began
    pub start_time: DateTime<Utc>,
    /// When the run finished; `None` while it is in progress
    pub end_time: Option<DateTime<Utc>>,
    /// Wall time, set together with `end_time`
    pub duration_seconds: Option<f64>,
    /// Files created or replaced
    pub files_scraped: u64,
    /// Files that could not be fetched or stored
    pub files_failed: u64,
    /// Files skipped because their content was unchanged
    pub files_unchanged: u64,
    /// Bytes of all stored files
    pub total_size_bytes: u64,
    /// Every recorded failure, in order
    pub errors: Vec<RunError>,
}

impl RunStats {
    /// Whether `end_time` has been stamped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} stored, {} unchanged, {} failed, {} bytes",
            self.institution,
            self.files_scraped,
            self.files_unchanged,
            self.files_failed,
            self.total_size_bytes
        )?;
        if let Some(duration) = self.duration_seconds {
            write!(f, " in {duration:.1}s")?;
        }
        Ok(())
    }
}

/// Mutable accumulator behind a run's [`RunStats`].
#[derive(Debug)]
pub struct RunStatsAggregator {
    stats: RunStats,
}

impl RunStatsAggregator {
    /// Start a run now.
    #[must_use]
    pub fn new(institution: InstitutionCode) -> Self {
        Self::started_at(institution, Utc::now())
    }

    /// Start a run at a given time.
    #[must_use]
    pub fn started_at(institution: InstitutionCode, start_time: DateTime<Utc>) -> Self {
        Self {
            stats: RunStats {
                run_id: Uuid::new_v4(),
                institution,
                start_time,
                end_time: None,
                duration_seconds: None,
                files_scraped: 0,
                files_failed: 0,
                files_unchanged: 0,
                total_size_bytes: 0,
                errors: Vec::new(),
            },
        }
    }

    /// A file was stored (created or replaced).
    pub fn record_success(&mut self, size_bytes: u64) {
        self.stats.files_scraped += 1;
        self.stats.total_size_bytes = self.stats.total_size_bytes.saturating_add(size_bytes);
    }

    /// A file was skipped because its content had not changed.
    pub fn record_unchanged(&mut self) {
        self.stats.files_unchanged += 1;
    }

    /// A file could not be downloaded or stored.
    pub fn record_failure(&mut self, url: &str, error: &impl fmt::Display) {
        self.stats.files_failed += 1;
        self.push_error(url, error);
    }

    /// An error outside a file download, such as a listing page that failed to load.
    pub fn record_error(&mut self, url: &str, error: &impl fmt::Display) {
        self.push_error(url, error);
    }

    /// Current counters, for intermediate writes.
    #[must_use]
    pub fn snapshot(&self) -> &RunStats {
        &self.stats
    }

    /// Close the run, stamping `end_time` and `duration_seconds`.
    #[must_use]
    pub fn finalize(self) -> RunStats {
        self.finalize_at(Utc::now())
    }

    /// [`RunStatsAggregator::finalize`] with an explicit end time.
    #[must_use]
    pub fn finalize_at(mut self, end_time: DateTime<Utc>) -> RunStats {
        let elapsed = end_time - self.stats.start_time;
        #[allow(clippy::cast_precision_loss)]
        let seconds = elapsed.num_milliseconds().max(0) as f64 / 1000.0;
        self.stats.end_time = Some(end_time);
        self.stats.duration_seconds = Some(seconds);
        self.stats
    }

    fn push_error(&mut self, url: &str, error: &impl fmt::Display) {
        self.stats.errors.push(RunError {
            url: url.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// Writes run stats documents under the storage root.
#[derive(Debug, Clone)]
pub struct RunStatsWriter {
    root: PathBuf,
}

impl RunStatsWriter {
    /// Writer storing documents under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the timestamped document for a run.
    #[must_use]
    pub fn run_path(&self, stats: &RunStats) -> PathBuf {
        self.root
            .join(stats.institution.as_str())
            .join(stats.start_time.format("%Y%m%d").to_string())
            .join(format!(
                "stats_{}.json",
                stats.start_time.format("%Y%m%d_%H%M%S")
            ))
    }

    /// Path of the copy overwritten by every write.
    #[must_use]
    pub fn latest_path(&self, institution: &InstitutionCode) -> PathBuf {
        self.root.join(institution.as_str()).join(LATEST_STATS_FILE)
    }

    /// Write the run document and refresh the institution's latest copy.
    pub async fn write(&self, stats: &RunStats) -> Result<PathBuf, StorageError> {
        let json = serde_json::to_vec_pretty(stats)?;
        let run_path = self.run_path(stats);
        write_atomic(&run_path, &json).await?;
        write_atomic(&self.latest_path(&stats.institution), &json).await?;
        Ok(run_path)
    }
}

/// An unfinished run whose stats file has not been touched for too long.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleRun {
    /// Name of the institution directory
    pub institution: String,
    /// The run's timestamped stats document
    pub stats_file: PathBuf,
    /// When the run began
    pub start_time: DateTime<Utc>,
    /// Last time the document was written
    pub last_modified: DateTime<Utc>,
}

/// Find runs under `root` that never finished and went quiet more than `max_age` ago.
///
/// Only the most recent date directory of each institution is examined.
/// Unreadable or malformed stats files are skipped with a warning.
pub fn find_stale_runs(root: &Path, max_age: Duration) -> Result<Vec<StaleRun>, StorageError> {
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut stale = Vec::new();

    for institution_dir in subdirectories(root)? {
        let Some(latest_day) = subdirectories(&institution_dir)?
            .into_iter()
            .filter(|dir| is_run_date_dir(dir))
            .max()
        else {
            continue;
        };
        let institution = institution_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        for entry in read_dir(&latest_day)? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !(name.starts_with("stats_") && name.ends_with(".json")) {
                continue;
            }

            let stats: RunStats = match std::fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_slice(&raw).map_err(|e| e.to_string()))
            {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::warn!("Skipping unreadable stats file {}: {}", path.display(), e);
                    continue;
                }
            };
            if stats.is_finished() {
                continue;
            }

            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map_err(|source| StorageError::Read {
                    path: path.clone(),
                    source,
                })?;
            if modified <= cutoff {
                stale.push(StaleRun {
                    institution: institution.clone(),
                    stats_file: path,
                    start_time: stats.start_time,
                    last_modified: modified.into(),
                });
            }
        }
    }

    stale.sort_by(|a, b| a.stats_file.cmp(&b.stats_file));
    Ok(stale)
}

fn read_dir(dir: &Path) -> Result<Vec<std::fs::DirEntry>, StorageError> {
    let read_err = |source| StorageError::Read {
        path: dir.to_path_buf(),
        source,
    };
    std::fs::read_dir(dir)
        .map_err(read_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)
}

/// `YYYYMMDD` directories hold run stats; artifact directories sit beside them.
fn is_run_date_dir(dir: &Path) -> bool {
    dir.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.len() == 8 && n.bytes().all(|b| b.is_ascii_digit()))
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    Ok(read_dir(dir)?
        .into_iter()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| e.path())
        .collect())
}
