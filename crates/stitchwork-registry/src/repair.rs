//! Offline manifest repair
//!
//! Inspects a manifest while the service is stopped, keeps a backup of
//! anything it changes, and leaves behind a manifest the codec loads
//! cleanly. Unlike the load path, which quarantines silently, every outcome
//! is reported to the caller.

use crate::manifest::{self, Decoded, Manifest};
use chrono::Local;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use stitchwork_common::{ArtifactRecord, Error, Result};
use tracing::{info, warn};

/// What a repair run found and did
#[derive(Debug, Clone, PartialEq)]
pub enum RepairReport {
    /// No manifest; nothing written
    Missing,
    /// Zero-byte manifest backed up and reset to `[]`
    EmptyReset { backup: PathBuf },
    /// Unparseable or wrong-shaped manifest backed up and reset to `[]`
    CorruptReset { backup: PathBuf, reason: String },
    /// Records for missing files dropped; the corrected list was also
    /// written to `backup`
    Pruned {
        dropped: Vec<PathBuf>,
        kept: usize,
        backup: PathBuf,
    },
    /// Manifest is sound
    Healthy { records: usize },
}

impl RepairReport {
    /// True if the manifest was rewritten
    #[must_use]
    pub const fn changed(&self) -> bool {
        !matches!(self, Self::Missing | Self::Healthy { .. })
    }
}

/// Check the manifest at `manifest_path` and fix what can be fixed, keeping
/// backups in `backup_dir`
pub fn repair_manifest(manifest_path: &Path, backup_dir: &Path) -> Result<RepairReport> {
    let bytes = match fs::read(manifest_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("Manifest {:?} not found", manifest_path);
            return Ok(RepairReport::Missing);
        }
        Err(e) => return Err(Error::manifest_io(manifest_path, e)),
    };
    fs::create_dir_all(backup_dir)?;
    let manifest = Manifest::new(manifest_path);

    if bytes.is_empty() {
        let backup = backup_path(backup_dir, "empty_queue");
        fs::copy(manifest_path, &backup)?;
        manifest.save(&[])?;
        info!("Empty manifest backed up to {:?} and reset", backup);
        return Ok(RepairReport::EmptyReset { backup });
    }

    let records = match manifest::decode_bytes(&bytes) {
        Decoded::Records(records) => records,
        Decoded::Empty => {
            return reset_corrupt(&manifest, backup_dir, "manifest is blank".to_string());
        }
        Decoded::Malformed(reason) | Decoded::WrongShape(reason) => {
            return reset_corrupt(&manifest, backup_dir, reason);
        }
    };

    let (kept, dropped): (Vec<ArtifactRecord>, Vec<ArtifactRecord>) =
        records.into_iter().partition(|r| r.path.exists());
    if dropped.is_empty() {
        info!("Manifest {:?} is healthy: {} records", manifest_path, kept.len());
        return Ok(RepairReport::Healthy {
            records: kept.len(),
        });
    }

    let backup = backup_path(backup_dir, "fixed_queue");
    fs::write(&backup, manifest::encode(&kept)?)?;
    manifest.save(&kept)?;
    info!(
        "Dropped {} records for missing files from {:?}, {} kept",
        dropped.len(),
        manifest_path,
        kept.len()
    );
    Ok(RepairReport::Pruned {
        dropped: dropped.into_iter().map(|r| r.path).collect(),
        kept: kept.len(),
        backup,
    })
}

fn reset_corrupt(manifest: &Manifest, backup_dir: &Path, reason: String) -> Result<RepairReport> {
    let backup = backup_path(backup_dir, "corrupted_queue");
    fs::copy(manifest.path(), &backup)?;
    manifest.save(&[])?;
    warn!(
        "Corrupt manifest ({}) backed up to {:?} and reset",
        reason, backup
    );
    Ok(RepairReport::CorruptReset { backup, reason })
}

/// `<dir>/<prefix>_<YYYYmmdd_HHMMSS>.json`, suffixed if already taken
fn backup_path(dir: &Path, prefix: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let mut candidate = dir.join(format!("{prefix}_{stamp}.json"));
    let mut n = 1u32;
    while candidate.exists() {
        candidate = dir.join(format!("{prefix}_{stamp}_{n}.json"));
        n += 1;
    }
    candidate
}
