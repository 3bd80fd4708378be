//! Eviction policy
//!
//! Pure selection logic: given the live records and a clock reading, decide
//! which positions must go. Nothing here touches the filesystem; the reaper
//! carries out the decision.

use std::time::Duration;
use stitchwork_common::ArtifactRecord;

/// Why a record left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Older than the maximum age
    Expired,
    /// Pushed out by the count limit
    Overflow,
    /// Removed by path
    Removed,
    /// Removed together with its artifact group
    GroupRemoved,
    /// Dropped by a bulk clear
    Cleared,
    /// Untracked file found in the upload directory
    Untracked,
}

impl EvictionReason {
    /// Short label for log lines
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Overflow => "overflow",
            Self::Removed => "removed",
            Self::GroupRemoved => "group removed",
            Self::Cleared => "cleared",
            Self::Untracked => "untracked",
        }
    }
}

/// Age and count limits for a registry
#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    max_count: usize,
    max_age: Duration,
}

impl EvictionPolicy {
    /// Create a policy
    #[must_use]
    pub const fn new(max_count: usize, max_age: Duration) -> Self {
        Self { max_count, max_age }
    }

    /// Maximum number of live records
    #[must_use]
    pub const fn max_count(&self) -> usize {
        self.max_count
    }

    /// Maximum record age
    #[must_use]
    pub const fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Records created strictly before this instant are expired
    #[must_use]
    pub fn cutoff(&self, now: f64) -> f64 {
        now - self.max_age.as_secs_f64()
    }

    /// Positions of every expired record, ascending
    #[must_use]
    pub fn select_expired(&self, records: &[ArtifactRecord], now: f64) -> Vec<usize> {
        let cutoff = self.cutoff(now);
        records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.created_at < cutoff)
            .map(|(i, _)| i)
            .collect()
    }

    /// Number of records above the count limit
    #[must_use]
    pub const fn excess(&self, len: usize) -> usize {
        len.saturating_sub(self.max_count)
    }

    /// Positions of the oldest records above the count limit, ascending
    ///
    /// Records with equal `created_at` keep their stored order, so the one
    /// stored first is evicted first.
    #[must_use]
    pub fn select_overflow(&self, records: &[ArtifactRecord]) -> Vec<usize> {
        let excess = self.excess(records.len());
        if excess == 0 {
            return Vec::new();
        }

        let mut order: Vec<usize> = (0..records.len()).collect();
        // sort_by is stable
        order.sort_by(|&a, &b| records[a].created_at.total_cmp(&records[b].created_at));
        order.truncate(excess);
        order.sort_unstable();
        order
    }
}
