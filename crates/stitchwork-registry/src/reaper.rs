//! Artifact reaper
//!
//! Carries out eviction decisions. For every doomed record the backing file
//! is deleted first and the record dropped second; a failed delete is logged
//! and counted but never keeps the record alive. Persisting the manifest is
//! left to the caller, once per batch.

use crate::eviction::EvictionReason;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use stitchwork_common::{ArtifactRecord, MANIFEST_FILE_NAME, display_name_of};
use tracing::{debug, error, info, warn};

/// What happened to one backing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRemoval {
    /// File deleted
    Deleted,
    /// File was already gone
    AlreadyGone,
    /// Delete attempted and failed
    Failed(ErrorKind),
}

/// Delete a backing file, treating "already gone" as success
pub fn remove_backing_file(path: &Path) -> FileRemoval {
    match fs::remove_file(path) {
        Ok(()) => FileRemoval::Deleted,
        Err(e) if e.kind() == ErrorKind::NotFound => FileRemoval::AlreadyGone,
        Err(e) => {
            error!("Failed to delete {:?}: {}", path, e);
            FileRemoval::Failed(e.kind())
        }
    }
}

/// Totals for one reaping batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Records dropped from the registry
    pub records_removed: usize,
    /// Backing files actually deleted
    pub files_deleted: usize,
    /// Backing files that were already gone
    pub files_missing: usize,
    /// Backing files that could not be deleted
    pub delete_failures: usize,
    /// Bytes freed, by recorded size of deleted files
    pub bytes_reclaimed: u64,
}

impl ReapReport {
    fn note(&mut self, removal: FileRemoval, size_bytes: u64) {
        match removal {
            FileRemoval::Deleted => {
                self.files_deleted += 1;
                self.bytes_reclaimed += size_bytes;
            }
            FileRemoval::AlreadyGone => self.files_missing += 1,
            FileRemoval::Failed(_) => self.delete_failures += 1,
        }
    }
}

/// Delete the files behind `positions` and drop those records, keeping the
/// survivors in their stored order
pub fn reap(
    records: &mut Vec<ArtifactRecord>,
    positions: &[usize],
    reason: EvictionReason,
) -> ReapReport {
    let mut report = ReapReport::default();
    if positions.is_empty() {
        return report;
    }

    let mut doomed = vec![false; records.len()];
    for &i in positions {
        if let Some(slot) = doomed.get_mut(i) {
            *slot = true;
        }
    }

    for (record, _) in records.iter().zip(&doomed).filter(|(_, d)| **d) {
        let removal = remove_backing_file(&record.path);
        match removal {
            FileRemoval::Deleted => info!(
                "Deleted {} artifact {} (id: {}, {} bytes)",
                reason.label(),
                record.display_name,
                record.artifact_id,
                record.size_bytes
            ),
            FileRemoval::AlreadyGone => debug!(
                "Artifact {} ({}) was already gone",
                record.display_name,
                reason.label()
            ),
            FileRemoval::Failed(_) => {}
        }
        report.note(removal, record.size_bytes);
        report.records_removed += 1;
    }

    let mut flags = doomed.iter();
    records.retain(|_| !flags.next().copied().unwrap_or(false));
    report
}

/// Delete files in `dir` that no record tracks and that were last modified
/// more than `max_age` before `now`
///
/// The manifest and its temp and archive siblings are never touched.
pub fn purge_stale_files(
    dir: &Path,
    tracked: &[PathBuf],
    max_age: Duration,
    now: SystemTime,
) -> ReapReport {
    let mut report = ReapReport::default();
    let tracked: HashSet<PathBuf> = tracked
        .iter()
        .map(|p| fs::canonicalize(p).unwrap_or_else(|_| p.clone()))
        .collect();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to scan {:?}: {}", dir, e);
            return report;
        }
    };

    for entry in entries.filter_map(std::result::Result::ok) {
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with(MANIFEST_FILE_NAME) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if tracked.contains(&canonical) {
            continue;
        }
        let stale = meta
            .modified()
            .ok()
            .and_then(|mtime| now.duration_since(mtime).ok())
            .is_some_and(|age| age > max_age);
        if !stale {
            continue;
        }

        let removal = remove_backing_file(&path);
        if removal == FileRemoval::Deleted {
            info!(
                "Deleted {} file {}",
                EvictionReason::Untracked.label(),
                display_name_of(&path)
            );
        }
        report.note(removal, meta.len());
        report.records_removed += usize::from(removal == FileRemoval::Deleted);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitchwork_common::ArtifactKind;
    use tempfile::tempdir;

    fn tracked_file(dir: &Path, name: &str, id: &str, created_at: f64) -> ArtifactRecord {
        let path = dir.join(name);
        fs::write(&path, name.as_bytes()).unwrap();
        ArtifactRecord::new(
            id.into(),
            path,
            name.len() as u64,
            created_at,
            ArtifactKind::Pattern,
        )
    }

    #[test]
    fn test_reap_deletes_files_and_keeps_order() {
        let dir = tempdir().unwrap();
        let mut records = vec![
            tracked_file(dir.path(), "a.png", "1", 1.0),
            tracked_file(dir.path(), "b.png", "1", 2.0),
            tracked_file(dir.path(), "c.png", "2", 3.0),
            tracked_file(dir.path(), "d.png", "2", 4.0),
        ];

        let report = reap(&mut records, &[0, 2], EvictionReason::Removed);

        assert_eq!(report.records_removed, 2);
        assert_eq!(report.files_deleted, 2);
        assert_eq!(report.bytes_reclaimed, 10);
        let names: Vec<&str> = records.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, vec!["b.png", "d.png"]);
        assert!(!dir.path().join("a.png").exists());
        assert!(dir.path().join("b.png").exists());
        assert!(!dir.path().join("c.png").exists());
    }

    #[test]
    fn test_reap_tolerates_missing_files() {
        let dir = tempdir().unwrap();
        let mut records = vec![tracked_file(dir.path(), "gone.png", "1", 1.0)];
        fs::remove_file(dir.path().join("gone.png")).unwrap();

        let report = reap(&mut records, &[0], EvictionReason::Expired);

        assert!(records.is_empty());
        assert_eq!(report.records_removed, 1);
        assert_eq!(report.files_missing, 1);
        assert_eq!(report.files_deleted, 0);
    }

    #[test]
    fn test_reap_undeletable_file_still_drops_record() {
        let dir = tempdir().unwrap();
        // A non-empty directory cannot be removed with remove_file
        let stuck = dir.path().join("stuck");
        fs::create_dir(&stuck).unwrap();
        fs::write(stuck.join("inner"), b"x").unwrap();
        let mut records = vec![ArtifactRecord::new(
            "1".into(),
            &stuck,
            0,
            1.0,
            ArtifactKind::Input,
        )];

        let report = reap(&mut records, &[0], EvictionReason::Overflow);

        assert!(records.is_empty());
        assert_eq!(report.delete_failures, 1);
    }

    #[test]
    fn test_reap_ignores_out_of_range_positions() {
        let dir = tempdir().unwrap();
        let mut records = vec![tracked_file(dir.path(), "a.png", "1", 1.0)];

        let report = reap(&mut records, &[5], EvictionReason::Removed);

        assert_eq!(report, ReapReport::default());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_purge_skips_tracked_fresh_and_manifest() {
        let dir = tempdir().unwrap();
        let tracked = dir.path().join("tracked.png");
        let untracked = dir.path().join("untracked.png");
        fs::write(&tracked, b"t").unwrap();
        fs::write(&untracked, b"u").unwrap();
        fs::write(dir.path().join(MANIFEST_FILE_NAME), b"[]").unwrap();
        fs::create_dir(dir.path().join("backups")).unwrap();

        // Nothing is older than an hour yet
        let fresh = purge_stale_files(
            dir.path(),
            &[tracked.clone()],
            Duration::from_secs(3600),
            SystemTime::now(),
        );
        assert_eq!(fresh.files_deleted, 0);

        // Two hours from now everything is stale
        let later = SystemTime::now() + Duration::from_secs(7200);
        let report = purge_stale_files(dir.path(), &[tracked.clone()], Duration::from_secs(3600), later);

        assert_eq!(report.files_deleted, 1);
        assert!(tracked.exists());
        assert!(!untracked.exists());
        assert!(dir.path().join(MANIFEST_FILE_NAME).exists());
        assert!(dir.path().join("backups").exists());
    }
}
