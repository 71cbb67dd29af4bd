//! Statharvest command-line runner.
//!
//! Loads configuration, opens the file index and runs the fetch pipeline for
//! each selected institution. Institutions run concurrently; URLs within one
//! institution are processed one at a time.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod cli;
pub mod commands;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command};
use statharvest_core::AppConfig;
use std::path::Path;
use tracing::info;

/// Initialize tracing subscriber for logging.
///
/// Honors `RUST_LOG`; defaults to `info,statharvest=debug`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,statharvest=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Load configuration from `path` (or the default location) with environment overrides applied.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let mut config = match path {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AppConfig::load().context("failed to load config")?,
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    info!("Starting statharvest v{}", env!("CARGO_PKG_VERSION"));
    if let Command::InitConfig(args) = &cli.cmd {
        let path = match cli.config.clone() {
            Some(path) => path,
            None => AppConfig::config_path()?,
        };
        commands::init_config(&path, args)?;
        info!("Wrote default config to {}", path.display());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    match cli.cmd {
        Command::Harvest(args) => {
            let results = commands::harvest(&config, &args).await?;
            for stats in &results {
                info!("{}", stats);
                println!("{}", serde_json::to_string(stats)?);
            }
        }
        Command::Stale(args) => {
            let runs = commands::stale(&config, &args)?;
            if runs.is_empty() {
                info!("No stale runs");
            }
            for run in runs {
                println!(
                    "{}\t{}\tstarted {}\tlast update {}",
                    run.institution,
                    run.stats_file.display(),
                    run.start_time.to_rfc3339(),
                    run.last_modified.to_rfc3339()
                );
            }
        }
        Command::List(args) => {
            for line in commands::list(&config, &args).await? {
                println!("{line}");
            }
        }
        Command::InitConfig(_) => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_from_explicit_path() {
        let tmp = TempDir::new().expect("create temp dir");
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "[fetch]\nmax_retries = 5\n\n[institutions.ECB]\nbase_url = \"https://www.ecb.europa.eu/\"\n",
        )
        .expect("write config");

        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config.institutions.len(), 1);
        assert_eq!(config.fetch.request_timeout_seconds, 30);
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let tmp = TempDir::new().expect("create temp dir");
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[fetch]\nrequest_timeout_seconds = 0\n").expect("write config");

        assert!(load_config(Some(&path)).is_err());
    }
}
