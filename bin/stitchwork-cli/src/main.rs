//! StitchWork CLI - Artifact registry administration
//!
//! Inspects and maintains the upload directory of a StitchWork service:
//! listing and removing tracked files, applying the eviction limits,
//! repairing a damaged manifest, and running the background sweeper.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use stitchwork_common::{ArtifactRecord, Config, format_timestamp, unix_now};
use stitchwork_registry::{
    ArtifactRegistry, RepairReport, RegistryStats, SweepSchedule, Sweeper, repair_manifest,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "stitchwork-cli")]
#[command(about = "StitchWork artifact registry admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/stitchwork/registry.toml")]
    config: PathBuf,

    /// Upload directory holding the artifacts and the manifest
    #[arg(long, env = "STITCHWORK_UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    /// Maximum number of tracked artifacts
    #[arg(long)]
    max_count: Option<usize>,

    /// Maximum artifact age in seconds
    #[arg(long)]
    max_age_secs: Option<u64>,

    /// Log level (overrides the config file, overridden by RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show registry statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List tracked artifacts
    List,
    /// Start tracking an existing file
    Track {
        /// File to track
        path: PathBuf,
        /// Upload group id (random if omitted)
        #[arg(long)]
        id: Option<String>,
        /// Artifact kind: input, pattern, preview or any other label
        #[arg(long, default_value = "pattern")]
        kind: String,
    },
    /// Stop tracking a file and delete it
    Remove {
        /// Tracked file path
        path: PathBuf,
    },
    /// Remove every file of an upload group
    RemoveGroup {
        /// Upload group id
        id: String,
    },
    /// Apply the age and count limits once
    Evict,
    /// Remove every tracked file
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
    /// Check and fix the manifest (service must be stopped)
    Repair {
        /// Backup directory (default: <upload_dir>/backups)
        #[arg(long)]
        backup_dir: Option<PathBuf>,
    },
    /// Run the background sweeper until interrupted
    Watch,
    /// Delete untracked files older than the age limit
    PurgeUntracked,
}

impl Args {
    /// File config with command line overrides applied
    fn effective_config(&self) -> Result<Config> {
        let mut config = Config::load(&self.config)
            .with_context(|| format!("failed to load config {}", self.config.display()))?;
        if let Some(dir) = &self.upload_dir {
            config.registry.upload_dir.clone_from(dir);
        }
        if let Some(max_count) = self.max_count {
            config.registry.max_count = max_count;
        }
        if let Some(max_age_secs) = self.max_age_secs {
            config.registry.max_age_secs = max_age_secs;
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.effective_config()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Commands::Repair { backup_dir } = &args.command {
        let backup_dir = backup_dir
            .clone()
            .unwrap_or_else(|| config.registry.upload_dir.join("backups"));
        return repair(&config, &backup_dir);
    }

    let registry = Arc::new(
        ArtifactRegistry::open(config.registry.clone()).with_context(|| {
            format!(
                "failed to open registry in {}",
                config.registry.upload_dir.display()
            )
        })?,
    );

    match args.command {
        Commands::Stats { json } => {
            let stats = registry.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
        Commands::List => print_records(&registry.snapshot()),
        Commands::Track { path, id, kind } => {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let Some(record) = registry.add(&path, id, kind) else {
                bail!("{} is not a regular file", path.display());
            };
            println!(
                "Tracking {} (id: {}, type: {})",
                record.display_name, record.artifact_id, record.kind
            );
        }
        Commands::Remove { path } => {
            if !registry.remove_by_path(&path) {
                bail!("{} is not tracked", path.display());
            }
            println!("Removed {}", path.display());
        }
        Commands::RemoveGroup { id } => {
            let removed = registry.remove_by_artifact_id(id.as_str());
            println!("Removed {removed} artifacts for {id}");
        }
        Commands::Evict => {
            let report = registry.sweep();
            println!(
                "Evicted {} expired and {} overflow artifacts",
                report.expired, report.overflow
            );
        }
        Commands::Clear { yes } => {
            if !yes {
                bail!("refusing to delete every tracked file without --yes");
            }
            println!("Cleared {} artifacts", registry.clear());
        }
        Commands::Watch => match SweepSchedule::enabled(&config.sweeper) {
            Some(schedule) => watch(registry, schedule).await?,
            None => println!("Sweeper is disabled in the configuration ([sweeper] enabled = false)"),
        },
        Commands::PurgeUntracked => {
            let report = registry.purge_untracked();
            println!(
                "Deleted {} untracked files ({} bytes), {} failures",
                report.files_deleted, report.bytes_reclaimed, report.delete_failures
            );
        }
        Commands::Repair { .. } => {}
    }

    Ok(())
}

async fn watch(registry: Arc<ArtifactRegistry>, schedule: SweepSchedule) -> Result<()> {
    let sweeper = Sweeper::spawn(Arc::clone(&registry), schedule)?;
    info!("Sweeper running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down...");
    sweeper.shutdown().await;

    let counters = registry.counters().snapshot();
    info!(
        "Sweeper stopped: {} expired, {} overflow, {} files deleted",
        counters.expired, counters.overflowed, counters.files_deleted
    );
    Ok(())
}

fn repair(config: &Config, backup_dir: &std::path::Path) -> Result<()> {
    let manifest_path = config.registry.manifest_path();
    let report = repair_manifest(&manifest_path, backup_dir)
        .with_context(|| format!("failed to repair {}", manifest_path.display()))?;

    match report {
        RepairReport::Missing => println!("No manifest at {}", manifest_path.display()),
        RepairReport::EmptyReset { backup } => {
            println!("Manifest was empty, reset (backup: {})", backup.display());
        }
        RepairReport::CorruptReset { backup, reason } => {
            println!(
                "Manifest was corrupt ({reason}), reset (backup: {})",
                backup.display()
            );
        }
        RepairReport::Pruned {
            dropped,
            kept,
            backup,
        } => {
            println!(
                "Dropped {} records for missing files, {kept} kept (copy: {})",
                dropped.len(),
                backup.display()
            );
            for path in dropped {
                println!("  {}", path.display());
            }
        }
        RepairReport::Healthy { records } => println!("Manifest is healthy: {records} records"),
    }
    Ok(())
}

fn print_stats(stats: &RegistryStats) {
    println!("Registry Statistics");
    println!("===================");
    println!("Artifacts:  {} / {}", stats.total_count, stats.max_count);
    println!("Total size: {:.2} MB", stats.total_size_mb());
    println!("Max age:    {}s", stats.max_age.as_secs());
    if let Some(oldest) = stats.oldest_created_at {
        println!("Oldest:     {}", format_timestamp(oldest));
    }
    if let Some(newest) = stats.newest_created_at {
        println!("Newest:     {}", format_timestamp(newest));
    }
    for (kind, count) in &stats.count_by_kind {
        println!("  {kind:<12} {count}");
    }
}

fn print_records(records: &[ArtifactRecord]) {
    if records.is_empty() {
        println!("No tracked artifacts");
        return;
    }
    let now = unix_now();
    println!(
        "{:<38} {:<10} {:>12} {:<28} {:>8} {}",
        "ID", "TYPE", "SIZE", "CREATED", "AGE", "FILE"
    );
    println!("{}", "-".repeat(120));
    for record in records {
        println!(
            "{:<38} {:<10} {:>12} {:<28} {:>7.0}s {}",
            record.artifact_id,
            record.kind,
            record.size_bytes,
            record.created_at_iso,
            record.age_secs(now),
            record.display_name
        );
    }
}
