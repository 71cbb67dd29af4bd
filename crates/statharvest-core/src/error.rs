//! Error types shared by every statharvest crate.

use thiserror::Error;

/// Errors raised while loading settings or validating shared types.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Settings could not be loaded or are inconsistent
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An institution code that cannot be used as an index key or directory name
    #[error("invalid institution code '{code}': {reason}")]
    InvalidInstitution {
        /// The rejected input
        code: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Errors from reading, writing or validating `config.toml`.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No home or config directory could be determined for this platform
    #[error("could not determine config directory")]
    NoConfigDir,

    /// The file exists but is not valid TOML for [`crate::AppConfig`]
    #[error("failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The settings could not be rendered back to TOML
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Reading or writing the file failed
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A setting is out of range
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the setting, e.g. `fetch.max_retries`
        field: String,
        /// Why the value was rejected
        reason: String,
    },
}

/// Result alias for [`HarvestError`].
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result alias for [`ConfigError`].
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
