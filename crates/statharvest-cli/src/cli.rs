//! Command-line arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Harvest statistical datasets from institution websites.
#[derive(Clone, Debug, Parser)]
#[command(name = "statharvest", version, about, long_about = None, propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub cmd: Command,
}

/// Top-level subcommands.
#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Fetch new and changed files for the enabled institutions.
    #[command(alias = "run")]
    Harvest(HarvestArgs),
    /// Report runs that never finished.
    Stale(StaleArgs),
    /// Print the file index as JSON lines.
    #[command(alias = "ls")]
    List(ListArgs),
    /// Write the default configuration file.
    InitConfig(InitConfigArgs),
}

/// Options for `harvest`.
#[derive(Clone, Debug, Args)]
pub struct HarvestArgs {
    /// Only these institutions (repeatable). Defaults to every enabled one.
    #[arg(long = "institution", short = 'i')]
    pub institutions: Vec<String>,

    /// Download and replace every file even if it has not changed.
    #[arg(long)]
    pub overwrite: bool,

    /// Institutions harvested at the same time.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    pub max_concurrent: u16,

    /// Give up on a single URL after this many seconds.
    #[arg(long)]
    pub url_timeout: Option<u64>,
}

/// Options for `stale`.
#[derive(Clone, Debug, Args)]
pub struct StaleArgs {
    /// Age in hours after which an unfinished run counts as stuck.
    #[arg(long, default_value_t = 3)]
    pub max_age_hours: u64,
}

/// Options for `list`.
#[derive(Clone, Debug, Args)]
pub struct ListArgs {
    /// Restrict to one institution.
    #[arg(long, short = 'i')]
    pub institution: Option<String>,
}

/// Options for `init-config`.
#[derive(Clone, Debug, Args)]
pub struct InitConfigArgs {
    /// Replace an existing file.
    #[arg(long)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_harvest() {
        let cli = Cli::try_parse_from([
            "statharvest",
            "harvest",
            "-i",
            "NSI",
            "--institution",
            "BNB",
            "--overwrite",
            "--url-timeout",
            "600",
            "--config",
            "/etc/statharvest.toml",
        ])
        .expect("parse");

        assert_eq!(cli.config, Some(PathBuf::from("/etc/statharvest.toml")));
        let Command::Harvest(args) = cli.cmd else {
            panic!("expected harvest");
        };
        assert_eq!(args.institutions, vec!["NSI", "BNB"]);
        assert!(args.overwrite);
        assert_eq!(args.max_concurrent, 4);
        assert_eq!(args.url_timeout, Some(600));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = Cli::try_parse_from(["statharvest", "harvest", "--max-concurrent", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_stale_default() {
        let cli = Cli::try_parse_from(["statharvest", "stale"]).expect("parse");
        let Command::Stale(args) = cli.cmd else {
            panic!("expected stale");
        };
        assert_eq!(args.max_age_hours, 3);
    }

    #[test]
    fn test_parse_init_config() {
        let cli = Cli::try_parse_from(["statharvest", "init-config", "--force"]).expect("parse");
        assert!(matches!(cli.cmd, Command::InitConfig(InitConfigArgs { force: true })));
    }
}
