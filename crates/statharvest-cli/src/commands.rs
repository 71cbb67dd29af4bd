//! Implementations of the subcommands.

use crate::cli::{HarvestArgs, InitConfigArgs, ListArgs, StaleArgs};
use anyhow::{bail, Context};
use futures::stream::{FuturesUnordered, StreamExt};
use statharvest_core::{AppConfig, InstitutionCode, InstitutionConfig};
use statharvest_db::{artifacts, Database};
use statharvest_fetch::{
    find_stale_runs, ArtifactStorage, FileLinkDiscovery, FileStorage, Pipeline, ReqwestTransport,
    RunStats, RunStatsWriter, StaleRun, Transport,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Institutions to harvest: the named ones, or every enabled one.
pub fn select_institutions(
    config: &AppConfig,
    requested: &[String],
) -> anyhow::Result<Vec<(InstitutionCode, InstitutionConfig)>> {
    if requested.is_empty() {
        return Ok(config
            .enabled_institutions()
            .map(|(code, inst)| (code.clone(), inst.clone()))
            .collect());
    }

    let mut selected = Vec::with_capacity(requested.len());
    for name in requested {
        let code = InstitutionCode::new(name.as_str())?;
        let Some(inst) = config.institution(&code) else {
            bail!("unknown institution '{code}'");
        };
        if !inst.enabled {
            tracing::warn!("Institution {} is disabled in config, harvesting anyway", code);
        }
        selected.push((code, inst.clone()));
    }
    Ok(selected)
}

/// Run the pipeline for each selected institution, several at a time.
pub async fn harvest(config: &AppConfig, args: &HarvestArgs) -> anyhow::Result<Vec<RunStats>> {
    let institutions = select_institutions(config, &args.institutions)?;
    if institutions.is_empty() {
        tracing::warn!("No institutions enabled, nothing to do");
        return Ok(Vec::new());
    }

    let base_dir = &config.storage.base_storage_dir;
    let db = Arc::new(
        Database::open_migrated(config.database_path())
            .await
            .context("failed to open file index")?,
    );
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(&config.fetch)?);
    let storage: Arc<dyn ArtifactStorage> = Arc::new(FileStorage::new(base_dir));
    let max_concurrent = usize::from(args.max_concurrent.max(1));

    let mut runs = FuturesUnordered::new();
    let mut results = Vec::new();

    for (code, inst) in institutions {
        let discovery = match FileLinkDiscovery::for_institution(&inst) {
            Ok(discovery) => discovery,
            Err(e) => {
                tracing::error!("Invalid listing URL for {}: {}", code, e);
                continue;
            }
        };

        let mut pipeline = Pipeline::new(
            code,
            &config.fetch,
            transport.clone(),
            storage.clone(),
            db.clone(),
            args.overwrite,
        )
        .with_stats_writer(RunStatsWriter::new(base_dir));
        if let Some(seconds) = args.url_timeout {
            pipeline = pipeline.with_url_deadline(Duration::from_secs(seconds));
        }

        runs.push(async move { pipeline.run(&discovery).await });

        // Respect concurrency limit
        while runs.len() >= max_concurrent {
            if let Some(stats) = runs.next().await {
                results.push(stats);
            }
        }
    }

    while let Some(stats) = runs.next().await {
        results.push(stats);
    }

    results.sort_by(|a, b| a.institution.cmp(&b.institution));
    Ok(results)
}

/// Unfinished runs older than the given age.
pub fn stale(config: &AppConfig, args: &StaleArgs) -> anyhow::Result<Vec<StaleRun>> {
    let max_age = Duration::from_secs(args.max_age_hours.saturating_mul(60 * 60));
    let runs = find_stale_runs(&config.storage.base_storage_dir, max_age)?;
    Ok(runs)
}

/// Index records as JSON lines.
pub async fn list(config: &AppConfig, args: &ListArgs) -> anyhow::Result<Vec<String>> {
    let db = Database::open_migrated(config.database_path())
        .await
        .context("failed to open file index")?;

    let codes: Vec<InstitutionCode> = match &args.institution {
        Some(name) => vec![InstitutionCode::new(name.as_str())?],
        None => config.institutions.keys().cloned().collect(),
    };

    let mut lines = Vec::new();
    for code in &codes {
        for record in artifacts::list_by_institution(db.pool(), code).await? {
            lines.push(serde_json::to_string(&record)?);
        }
    }
    db.close().await;
    Ok(lines)
}

/// Write the default settings to `path`; refuses to clobber without `--force`.
pub fn init_config(path: &Path, args: &InitConfigArgs) -> anyhow::Result<()> {
    if path.exists() && !args.force {
        bail!("{} already exists (use --force to replace it)", path.display());
    }
    AppConfig::default()
        .save_to(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
