//! Artifact registry
//!
//! The registry owns the in-memory record list and its manifest. Every public
//! operation takes the one registry lock, mutates the list, writes the
//! manifest at most once and releases the lock, so operations are
//! linearizable and the manifest always reflects a state the list was in.

use crate::eviction::{EvictionPolicy, EvictionReason};
use crate::manifest::{LoadOutcome, Manifest};
use crate::reaper::{self, ReapReport};
use crate::stats::{RegistryCounters, RegistryStats, SweepReport};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use stitchwork_common::{
    ArtifactId, ArtifactKind, ArtifactRecord, Error, RegistryConfig, Result, unix_now,
};
use tracing::{debug, error, info, warn};

/// Bounded, persisted registry of uploaded and generated files
pub struct ArtifactRegistry {
    config: RegistryConfig,
    policy: EvictionPolicy,
    manifest: Manifest,
    records: Mutex<Vec<ArtifactRecord>>,
    counters: RegistryCounters,
    sweeper_active: AtomicBool,
}

impl ArtifactRegistry {
    /// Open the registry for `config.upload_dir`, creating the directory and
    /// loading whatever manifest is there
    pub fn open(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.upload_dir)?;

        let manifest = Manifest::new(config.manifest_path());
        let load = manifest.load_with_outcome();
        match &load.outcome {
            LoadOutcome::Quarantined { archive, reason } => warn!(
                "Registry in {:?} starts empty, damaged manifest archived at {:?} ({})",
                config.upload_dir, archive, reason
            ),
            LoadOutcome::Unreadable(reason) => error!(
                "Registry in {:?} starts empty, manifest unreadable: {}",
                config.upload_dir, reason
            ),
            _ => {}
        }

        let (records, duplicates) = dedup_by_path(load.records);

        info!(
            "Opened artifact registry in {:?}: {} records (max_count={}, max_age={}s)",
            config.upload_dir,
            records.len(),
            config.max_count,
            config.max_age_secs
        );

        let registry = Self {
            policy: EvictionPolicy::new(config.max_count, config.max_age_duration()),
            manifest,
            records: Mutex::new(records),
            counters: RegistryCounters::default(),
            sweeper_active: AtomicBool::new(false),
            config,
        };
        if duplicates > 0 {
            warn!(
                "Dropped {} manifest records that repeat a tracked path",
                duplicates
            );
            registry.persist(&registry.records.lock());
        }
        Ok(registry)
    }

    /// Start tracking the file at `path`
    ///
    /// Returns `None` when `path` is not an existing regular file. A record
    /// already tracking the same path is replaced. The count limit is
    /// enforced before the manifest is written.
    pub fn add(
        &self,
        path: impl AsRef<Path>,
        artifact_id: impl Into<ArtifactId>,
        kind: impl Into<ArtifactKind>,
    ) -> Option<ArtifactRecord> {
        let path = path.as_ref();
        let meta = match fs::metadata(path) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => {
                warn!("Not tracking {:?}: not a regular file", path);
                return None;
            }
            Err(e) => {
                warn!("Not tracking {:?}: {}", path, e);
                return None;
            }
        };

        let record = ArtifactRecord::new(
            artifact_id.into(),
            path,
            meta.len(),
            unix_now(),
            kind.into(),
        );

        let mut records = self.records.lock();
        if let Some(pos) = records.iter().position(|r| r.path == record.path) {
            debug!("Replacing existing record for {:?}", path);
            records.remove(pos);
        }
        records.push(record.clone());
        self.counters.added.fetch_add(1, Ordering::Relaxed);

        let overflow = self.policy.select_overflow(&records);
        let reaped = reaper::reap(&mut records, &overflow, EvictionReason::Overflow);
        self.account(EvictionReason::Overflow, reaped);

        self.persist(&records);
        info!(
            "Tracking {} (id: {}, type: {}, {} bytes)",
            record.display_name, record.artifact_id, record.kind, record.size_bytes
        );
        Some(record)
    }

    /// Stop tracking `path` and delete its file
    pub fn remove_by_path(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let mut records = self.records.lock();
        let Some(pos) = records.iter().position(|r| r.path == path) else {
            debug!("No record tracks {:?}", path);
            return false;
        };

        let reaped = reaper::reap(&mut records, &[pos], EvictionReason::Removed);
        self.account(EvictionReason::Removed, reaped);
        self.persist(&records);
        true
    }

    /// Stop tracking every file of one upload group and delete them
    pub fn remove_by_artifact_id(&self, artifact_id: impl Into<ArtifactId>) -> usize {
        let artifact_id = artifact_id.into();
        let mut records = self.records.lock();
        let positions: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.artifact_id == artifact_id)
            .map(|(i, _)| i)
            .collect();
        if positions.is_empty() {
            debug!("No records for artifact {}", artifact_id);
            return 0;
        }

        let reaped = reaper::reap(&mut records, &positions, EvictionReason::GroupRemoved);
        self.account(EvictionReason::GroupRemoved, reaped);
        self.persist(&records);
        info!("Removed {} records for artifact {}", reaped.records_removed, artifact_id);
        reaped.records_removed
    }

    /// Drop every record older than the age limit
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(unix_now())
    }

    /// Drop every record older than the age limit, as seen at `now`
    pub fn evict_expired_at(&self, now: f64) -> usize {
        let mut records = self.records.lock();
        self.evict_expired_locked(&mut records, now)
    }

    /// Drop the oldest records above the count limit
    pub fn evict_overflow(&self) -> usize {
        let mut records = self.records.lock();
        self.evict_overflow_locked(&mut records)
    }

    /// Apply the age limit, then the count limit, persisting once
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(unix_now())
    }

    /// [`Self::sweep`] with a caller-supplied clock
    pub fn sweep_at(&self, now: f64) -> SweepReport {
        let mut records = self.records.lock();
        let expired = self.reap_expired(&mut records, now);
        let overflow = self.reap_overflow(&mut records);
        let report = SweepReport {
            expired: expired.records_removed,
            overflow: overflow.records_removed,
        };
        if report.total() > 0 {
            self.persist(&records);
            info!(
                "Sweep dropped {} expired and {} overflow records, {} remain",
                report.expired,
                report.overflow,
                records.len()
            );
        }
        report
    }

    fn evict_expired_locked(&self, records: &mut Vec<ArtifactRecord>, now: f64) -> usize {
        let reaped = self.reap_expired(records, now);
        if reaped.records_removed > 0 {
            self.persist(records);
            info!("Evicted {} expired records", reaped.records_removed);
        }
        reaped.records_removed
    }

    fn evict_overflow_locked(&self, records: &mut Vec<ArtifactRecord>) -> usize {
        let reaped = self.reap_overflow(records);
        if reaped.records_removed > 0 {
            self.persist(records);
            info!("Evicted {} overflow records", reaped.records_removed);
        }
        reaped.records_removed
    }

    fn reap_expired(&self, records: &mut Vec<ArtifactRecord>, now: f64) -> ReapReport {
        let doomed = self.policy.select_expired(records, now);
        let reaped = reaper::reap(records, &doomed, EvictionReason::Expired);
        self.account(EvictionReason::Expired, reaped);
        reaped
    }

    fn reap_overflow(&self, records: &mut Vec<ArtifactRecord>) -> ReapReport {
        let doomed = self.policy.select_overflow(records);
        let reaped = reaper::reap(records, &doomed, EvictionReason::Overflow);
        self.account(EvictionReason::Overflow, reaped);
        reaped
    }

    /// Summary of the current contents
    pub fn stats(&self) -> RegistryStats {
        let records = self.records.lock();
        let mut count_by_kind = BTreeMap::new();
        for record in records.iter() {
            *count_by_kind.entry(record.kind.to_string()).or_insert(0) += 1;
        }

        RegistryStats {
            total_count: records.len(),
            total_size_bytes: records.iter().map(|r| r.size_bytes).sum(),
            max_count: self.policy.max_count(),
            max_age: self.policy.max_age(),
            oldest_created_at: records.iter().map(|r| r.created_at).reduce(f64::min),
            newest_created_at: records.iter().map(|r| r.created_at).reduce(f64::max),
            count_by_kind,
        }
    }

    /// Drop every record and delete every tracked file
    pub fn clear(&self) -> usize {
        let mut records = self.records.lock();
        let all: Vec<usize> = (0..records.len()).collect();
        let reaped = reaper::reap(&mut records, &all, EvictionReason::Cleared);
        self.account(EvictionReason::Cleared, reaped);
        self.persist(&records);
        info!("Cleared {} records", reaped.records_removed);
        reaped.records_removed
    }

    /// Delete untracked files in the upload directory older than the age limit
    pub fn purge_untracked(&self) -> ReapReport {
        let records = self.records.lock();
        let tracked: Vec<PathBuf> = records.iter().map(|r| r.path.clone()).collect();
        let report = reaper::purge_stale_files(
            &self.config.upload_dir,
            &tracked,
            self.policy.max_age(),
            SystemTime::now(),
        );
        self.counters
            .files_deleted
            .fetch_add(report.files_deleted as u64, Ordering::Relaxed);
        self.counters
            .delete_failures
            .fetch_add(report.delete_failures as u64, Ordering::Relaxed);
        if report.files_deleted > 0 {
            info!(
                "Purged {} untracked files from {:?}",
                report.files_deleted, self.config.upload_dir
            );
        }
        report
    }

    /// Copy of the current records in stored order
    pub fn snapshot(&self) -> Vec<ArtifactRecord> {
        self.records.lock().clone()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True when nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Check whether a record tracks `path`
    pub fn contains_path(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.records.lock().iter().any(|r| r.path == path)
    }

    /// Running operational counters
    pub fn counters(&self) -> &RegistryCounters {
        &self.counters
    }

    /// Configuration the registry was opened with
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Location of the manifest file
    pub fn manifest_path(&self) -> &Path {
        self.manifest.path()
    }

    /// Mark the registry as swept by a background task
    pub(crate) fn claim_sweeper(&self) -> Result<()> {
        self.sweeper_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::SweeperAlreadyRunning(self.config.upload_dir.clone()))
    }

    pub(crate) fn release_sweeper(&self) {
        self.sweeper_active.store(false, Ordering::Release);
    }

    fn account(&self, reason: EvictionReason, reaped: ReapReport) {
        let removed = reaped.records_removed as u64;
        let counter = match reason {
            EvictionReason::Expired => &self.counters.expired,
            EvictionReason::Overflow => &self.counters.overflowed,
            _ => &self.counters.removed,
        };
        counter.fetch_add(removed, Ordering::Relaxed);
        self.counters
            .files_deleted
            .fetch_add(reaped.files_deleted as u64, Ordering::Relaxed);
        self.counters
            .delete_failures
            .fetch_add(reaped.delete_failures as u64, Ordering::Relaxed);
    }

    fn persist(&self, records: &[ArtifactRecord]) {
        match self.manifest.save(records) {
            Ok(()) => {
                self.counters.manifest_saves.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.save_failures.fetch_add(1, Ordering::Relaxed);
                error!("Failed to persist manifest {:?}: {}", self.manifest.path(), e);
            }
        }
    }
}

/// Keep only the last record for each path, preserving stored order
fn dedup_by_path(records: Vec<ArtifactRecord>) -> (Vec<ArtifactRecord>, usize) {
    let total = records.len();
    let mut seen = HashSet::with_capacity(total);
    let mut kept: Vec<ArtifactRecord> = records
        .into_iter()
        .rev()
        .filter(|r| seen.insert(r.path.clone()))
        .collect();
    kept.reverse();
    let dropped = total - kept.len();
    (kept, dropped)
}

impl std::fmt::Debug for ArtifactRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactRegistry")
            .field("upload_dir", &self.config.upload_dir)
            .field("max_count", &self.policy.max_count())
            .field("max_age", &self.policy.max_age())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
