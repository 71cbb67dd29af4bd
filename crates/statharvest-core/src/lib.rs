//! Shared building blocks for statharvest.
//!
//! [`AppConfig`] holds the settings every other crate reads, [`InstitutionCode`]
//! is the validated key used for index rows and storage directories, and
//! [`HarvestError`] / [`ConfigError`] describe what can go wrong before any
//! network traffic happens.
//!
//! ```rust
//! use statharvest_core::{AppConfig, InstitutionCode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = AppConfig::default();
//! settings.validate()?;
//!
//! let bnb = InstitutionCode::new("BNB")?;
//! assert!(settings.institution(&bnb).is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, FetchConfig, InstitutionConfig, StorageConfig};
pub use error::{ConfigError, ConfigResult, HarvestError, Result};
pub use types::InstitutionCode;
