//! StitchWork Registry - Bounded artifact tracking
//!
//! This crate keeps track of files uploaded to and generated by StitchWork:
//! - Manifest codec with atomic writes and damaged-file recovery
//! - Registry with age and count limits under a single lock
//! - Eviction policy and file reaper
//! - Background sweeper task with clean shutdown
//! - Late-initialized registry handle
//! - Offline manifest repair

pub mod cell;
pub mod eviction;
pub mod manifest;
pub mod reaper;
pub mod registry;
pub mod repair;
pub mod stats;
pub mod sweeper;

// Re-exports
pub use cell::RegistryCell;
pub use eviction::{EvictionPolicy, EvictionReason};
pub use manifest::{LoadOutcome, Manifest, ManifestLoad};
pub use reaper::{FileRemoval, ReapReport};
pub use registry::ArtifactRegistry;
pub use repair::{RepairReport, repair_manifest};
pub use stats::{CountersSnapshot, RegistryCounters, RegistryStats, SweepReport};
pub use sweeper::{SweepSchedule, Sweeper};
