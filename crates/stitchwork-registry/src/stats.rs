//! Registry statistics

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time summary of the registry contents
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStats {
    /// Number of live records
    pub total_count: usize,
    /// Sum of recorded sizes
    pub total_size_bytes: u64,
    /// Configured count limit
    pub max_count: usize,
    /// Configured age limit
    #[serde(serialize_with = "serialize_secs")]
    pub max_age: Duration,
    /// Creation time of the oldest record
    pub oldest_created_at: Option<f64>,
    /// Creation time of the newest record
    pub newest_created_at: Option<f64>,
    /// Live records per kind
    pub count_by_kind: BTreeMap<String, usize>,
}

impl RegistryStats {
    /// Total size in mebibytes, rounded to two decimals
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn total_size_mb(&self) -> f64 {
        (self.total_size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

/// Running totals since the registry was opened
#[derive(Debug, Default)]
pub struct RegistryCounters {
    /// Records added
    pub added: AtomicU64,
    /// Records removed by path, by group or by clear
    pub removed: AtomicU64,
    /// Records dropped by the age limit
    pub expired: AtomicU64,
    /// Records dropped by the count limit
    pub overflowed: AtomicU64,
    /// Backing files deleted
    pub files_deleted: AtomicU64,
    /// Backing files that could not be deleted
    pub delete_failures: AtomicU64,
    /// Successful manifest writes
    pub manifest_saves: AtomicU64,
    /// Failed manifest writes
    pub save_failures: AtomicU64,
}

impl RegistryCounters {
    /// Copy the current values
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            added: self.added.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            delete_failures: self.delete_failures.load(Ordering::Relaxed),
            manifest_saves: self.manifest_saves.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`RegistryCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub added: u64,
    pub removed: u64,
    pub expired: u64,
    pub overflowed: u64,
    pub files_deleted: u64,
    pub delete_failures: u64,
    pub manifest_saves: u64,
    pub save_failures: u64,
}

/// Records dropped by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Dropped by the age limit
    pub expired: usize,
    /// Dropped by the count limit
    pub overflow: usize,
}

impl SweepReport {
    /// Records dropped for any reason
    #[must_use]
    pub const fn total(&self) -> usize {
        self.expired + self.overflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_size_mb_rounds() {
        let stats = RegistryStats {
            total_count: 1,
            total_size_bytes: 1_572_864 + 5_000,
            max_count: 100,
            max_age: Duration::from_secs(3600),
            oldest_created_at: None,
            newest_created_at: None,
            count_by_kind: BTreeMap::new(),
        };
        assert!((stats.total_size_mb() - 1.5).abs() < f64::EPSILON);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["max_age"], 3600);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = RegistryCounters::default();
        counters.added.fetch_add(3, Ordering::Relaxed);
        counters.save_failures.fetch_add(1, Ordering::Relaxed);

        let snap = counters.snapshot();
        assert_eq!(snap.added, 3);
        assert_eq!(snap.save_failures, 1);
        assert_eq!(snap.removed, 0);
    }
}
