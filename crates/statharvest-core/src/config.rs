//! `config.toml` handling.
//!
//! Settings come from one TOML file in the platform config directory (or a
//! path given on the command line), then `STATHARVEST_*` environment
//! variables. Missing sections fall back to built-in defaults. The result is
//! built once and handed by reference to each component.

use crate::error::{ConfigError, ConfigResult};
use crate::types::InstitutionCode;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything a harvest run needs to know.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Artifact storage and index location
    pub storage: StorageConfig,
    /// HTTP fetching behavior
    pub fetch: FetchConfig,
    /// Per-institution source table
    pub institutions: BTreeMap<InstitutionCode, InstitutionConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            fetch: FetchConfig::default(),
            institutions: default_institutions(),
        }
    }
}

impl AppConfig {
    /// Read `config.toml` from the platform config directory.
    ///
    /// A missing file is not an error: the defaults are returned instead.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Like [`AppConfig::load`] but from an explicit file.
    pub fn load_from(config_path: &Path) -> ConfigResult<Self> {
        if !config_path.exists() {
            tracing::debug!("No config at {}, using built-in defaults", config_path.display());
            return Ok(Self::default());
        }
        tracing::debug!("Reading config {}", config_path.display());
        Ok(toml::from_str(&fs::read_to_string(config_path)?)?)
    }

    /// Overlay `STATHARVEST_*` variables fetched through `lookup`.
    ///
    /// Recognized: `STATHARVEST_STORAGE_DIR`, `STATHARVEST_USER_AGENT`,
    /// `STATHARVEST_REQUEST_DELAY` (seconds) and `STATHARVEST_MAX_RETRIES`.
    /// Values that fail to parse are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("STATHARVEST_STORAGE_DIR") {
            tracing::debug!("Override storage.base_storage_dir from env: {}", dir);
            self.storage.base_storage_dir = PathBuf::from(dir);
        }

        if let Some(user_agent) = lookup("STATHARVEST_USER_AGENT") {
            tracing::debug!("Override fetch.user_agent from env: {}", user_agent);
            self.fetch.user_agent = user_agent;
        }

        if let Some(val) = lookup("STATHARVEST_REQUEST_DELAY") {
            if let Ok(delay) = val.parse() {
                self.fetch.request_delay_seconds = delay;
                tracing::debug!("Override fetch.request_delay_seconds from env: {}", delay);
            }
        }

        if let Some(val) = lookup("STATHARVEST_MAX_RETRIES") {
            if let Ok(retries) = val.parse() {
                self.fetch.max_retries = retries;
                tracing::debug!("Override fetch.max_retries from env: {}", retries);
            }
        }
    }

    /// Check that the values can drive the fetch pipeline.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.fetch.max_retries == 0 {
            return Err(invalid("fetch.max_retries", "must be at least 1"));
        }
        if !self.fetch.request_delay_seconds.is_finite() || self.fetch.request_delay_seconds < 0.0
        {
            return Err(invalid(
                "fetch.request_delay_seconds",
                "must be a non-negative number",
            ));
        }
        if self.fetch.request_timeout_seconds == 0 {
            return Err(invalid("fetch.request_timeout_seconds", "must be positive"));
        }
        if self.fetch.download_timeout_seconds == 0 {
            return Err(invalid("fetch.download_timeout_seconds", "must be positive"));
        }
        for (code, institution) in &self.institutions {
            if institution.base_url.trim().is_empty() {
                return Err(invalid(
                    &format!("institutions.{code}.base_url"),
                    "must not be empty",
                ));
            }
        }
        Ok(())
    }

    /// Write these settings as TOML to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        tracing::debug!("Writing config to {}", path.display());
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Look up one institution's source settings.
    #[must_use]
    pub fn institution(&self, code: &InstitutionCode) -> Option<&InstitutionConfig> {
        self.institutions.get(code)
    }

    /// Institutions whose `enabled` flag is set, in code order.
    pub fn enabled_institutions(
        &self,
    ) -> impl Iterator<Item = (&InstitutionCode, &InstitutionConfig)> {
        self.institutions.iter().filter(|(_, cfg)| cfg.enabled)
    }

    /// Path of the SQLite file index.
    ///
    /// Defaults to `index.db` inside the storage root.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| self.storage.base_storage_dir.join("index.db"))
    }

    /// Default location of `config.toml`, e.g. `~/.config/statharvest/config.toml`.
    pub fn config_path() -> ConfigResult<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// Platform data directory, e.g. `~/.local/share/statharvest`.
    pub fn data_dir() -> ConfigResult<PathBuf> {
        Ok(project_dirs()?.data_dir().to_path_buf())
    }
}

fn project_dirs() -> ConfigResult<ProjectDirs> {
    ProjectDirs::from("org", "statharvest", "statharvest").ok_or(ConfigError::NoConfigDir)
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Artifact storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for artifact bytes and run stats
    pub base_storage_dir: PathBuf,
    /// Explicit index database path (defaults to `<base_storage_dir>/index.db`)
    pub database_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base_storage_dir = AppConfig::data_dir()
            .map_or_else(|_| PathBuf::from("storage"), |dir| dir.join("storage"));
        Self {
            base_storage_dir,
            database_path: None,
        }
    }
}

/// HTTP fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// User agent string sent on every request
    pub user_agent: String,
    /// Timeout for metadata probes and HTML pages, in seconds
    pub request_timeout_seconds: u64,
    /// Timeout for body downloads, in seconds
    pub download_timeout_seconds: u64,
    /// Politeness delay after each successful request, in seconds
    pub request_delay_seconds: f64,
    /// Maximum number of attempts per logical fetch
    pub max_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; statharvest/0.1; +https://github.com/statharvest/statharvest)"
                .to_string(),
            request_timeout_seconds: 30,
            download_timeout_seconds: 300,
            request_delay_seconds: 1.0,
            max_retries: 3,
        }
    }
}

impl FetchConfig {
    /// Timeout applied to probes and page fetches.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Timeout applied to body downloads.
    #[must_use]
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_seconds)
    }

    /// Politeness delay; negative or non-finite values collapse to zero.
    #[must_use]
    pub fn request_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_delay_seconds).unwrap_or(Duration::ZERO)
    }
}

/// Source settings for one institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionConfig {
    /// Site root, e.g. `https://www.bnb.bg/`
    pub base_url: String,
    /// Path of the statistics landing page relative to `base_url`
    #[serde(default)]
    pub data_path: String,
    /// Whether runs should include this institution
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_institutions() -> BTreeMap<InstitutionCode, InstitutionConfig> {
    [
        ("NSI", "https://www.nsi.bg/", "bg/content/766/статистически-данни"),
        ("BNB", "https://www.bnb.bg/", "Statistics/index.htm"),
        ("MF", "https://www.minfin.bg/", "bg/statistics"),
        ("NAP", "https://www.nap.bg/", "page?id=524"),
    ]
    .into_iter()
    .map(|(code, base_url, data_path)| {
        (
            InstitutionCode::new(code).expect("built-in institution codes are valid"),
            InstitutionConfig {
                base_url: base_url.to_string(),
                data_path: data_path.to_string(),
                enabled: true,
            },
        )
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.fetch.request_timeout_seconds, 30);
        assert_eq!(config.fetch.download_timeout_seconds, 300);
        assert!((config.fetch.request_delay_seconds - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.institutions.len(), 4);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[fetch]"));
        assert!(toml_str.contains("[institutions.BNB]"));

        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(parsed.fetch.user_agent, config.fetch.user_agent);
        assert_eq!(parsed.institutions, config.institutions);
    }

    #[test]
    fn test_load_from_file() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.fetch.max_retries = 5;
        config.storage.base_storage_dir = tmp.path().join("artifacts");
        config.save_to(&config_path).expect("write config file");

        let loaded = AppConfig::load_from(&config_path).expect("load config");
        assert_eq!(loaded.fetch.max_retries, 5);
        assert_eq!(loaded.storage.base_storage_dir, tmp.path().join("artifacts"));
        assert_eq!(loaded.database_path(), tmp.path().join("artifacts").join("index.db"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = TempDir::new().expect("create temp dir");
        let loaded = AppConfig::load_from(&tmp.path().join("absent.toml")).expect("load");
        assert_eq!(loaded.fetch.max_retries, 3);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("STATHARVEST_STORAGE_DIR", "/srv/stats"),
            ("STATHARVEST_REQUEST_DELAY", "0.25"),
            ("STATHARVEST_MAX_RETRIES", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.storage.base_storage_dir, PathBuf::from("/srv/stats"));
        assert_eq!(config.fetch.request_delay(), Duration::from_millis(250));
        // Unparseable values are ignored
        assert_eq!(config.fetch.max_retries, 3);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[fetch]
max_retries = 4

[institutions.ECB]
base_url = "https://data.ecb.europa.eu/"
enabled = false
"#;

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert_eq!(config.fetch.max_retries, 4);
        assert_eq!(config.fetch.request_timeout_seconds, 30);
        assert_eq!(config.institutions.len(), 1);

        let ecb = InstitutionCode::new("ECB").expect("valid code");
        let institution = config.institution(&ecb).expect("ECB configured");
        assert_eq!(institution.data_path, "");
        assert!(!institution.enabled);
        assert_eq!(config.enabled_institutions().count(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.fetch.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.fetch.request_delay_seconds = -1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.fetch.download_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_institution_code_in_toml() {
        let toml_str = r#"
[institutions."../bad"]
base_url = "https://example.org/"
"#;
        assert!(toml::from_str::<AppConfig>(toml_str).is_err());
    }
}
