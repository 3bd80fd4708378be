//! Core type definitions for StitchWork
//!
//! This module defines the artifact record tracked by the registry and the
//! identifiers and kinds attached to it. The serialized field names are fixed:
//! the manifest on disk is shared with the offline repair tooling.

use chrono::{Local, TimeZone};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Grouping key shared by every file produced from one upload
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From)]
#[serde(transparent)]
#[display("{_0}")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Get the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactId({})", self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Role of an artifact within one upload
///
/// The set is open: kinds the registry does not know about are carried
/// through verbatim in [`ArtifactKind::Other`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArtifactKind {
    /// The uploaded source image
    Input,
    /// The rendered numbered pattern
    Pattern,
    /// The downscaled preview of the pattern
    Preview,
    /// Anything else
    Other(String),
}

impl ArtifactKind {
    /// Kind assigned to manifest records that carry no `file_type`
    #[must_use]
    pub fn unknown() -> Self {
        Self::Other("unknown".to_string())
    }

    /// Get the kind's wire name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Input => "input",
            Self::Pattern => "pattern",
            Self::Preview => "preview",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for ArtifactKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "input" => Self::Input,
            "pattern" => Self::Pattern,
            "preview" => Self::Preview,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for ArtifactKind {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ArtifactKind> for String {
    fn from(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for one tracked file
///
/// Records are immutable once built. The registry replaces them wholesale
/// or drops them; it never edits one in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Upload this file belongs to
    #[serde(rename = "file_id")]
    pub artifact_id: ArtifactId,
    /// Location of the backing file
    #[serde(rename = "file_path")]
    pub path: PathBuf,
    /// Base name of `path`, captured at creation
    #[serde(rename = "file_name", default)]
    pub display_name: String,
    /// File size at creation
    #[serde(rename = "file_size", default)]
    pub size_bytes: u64,
    /// Creation time in fractional seconds since the Unix epoch
    #[serde(rename = "timestamp")]
    pub created_at: f64,
    /// Local-time ISO-8601 rendering of `created_at`
    #[serde(rename = "datetime", default)]
    pub created_at_iso: String,
    /// Role of the file
    #[serde(rename = "file_type", default = "ArtifactKind::unknown")]
    pub kind: ArtifactKind,
}

impl ArtifactRecord {
    /// Build a record, deriving the display name and ISO timestamp
    pub fn new(
        artifact_id: ArtifactId,
        path: impl Into<PathBuf>,
        size_bytes: u64,
        created_at: f64,
        kind: ArtifactKind,
    ) -> Self {
        let path = path.into();
        Self {
            artifact_id,
            display_name: display_name_of(&path),
            size_bytes,
            created_at,
            created_at_iso: format_timestamp(created_at),
            kind,
            path,
        }
    }

    /// Seconds elapsed between creation and `now`
    #[must_use]
    pub fn age_secs(&self, now: f64) -> f64 {
        (now - self.created_at).max(0.0)
    }
}

/// Base name of a path, or the whole path when it has none
#[must_use]
pub fn display_name_of(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.to_string_lossy().into_owned(),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// Current wall-clock time in fractional seconds since the Unix epoch
#[must_use]
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

/// Render a Unix timestamp as local time, microsecond precision
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_timestamp(ts: f64) -> String {
    if !ts.is_finite() {
        return String::new();
    }
    let secs = ts.floor();
    let nanos = (((ts - secs) * 1e9).round() as u32).min(999_999_999);
    Local
        .timestamp_opt(secs as i64, nanos)
        .single()
        .map(|dt| dt.naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
        .unwrap_or_default()
}
