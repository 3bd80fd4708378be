//! Error types for StitchWork
//!
//! Most registry failures are absorbed where they happen (a file that is
//! already gone, a manifest that cannot be parsed). What remains here is the
//! small set that crosses an API boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for StitchWork operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for StitchWork
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest I/O error at {path}: {source}")]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry not initialized: call init first")]
    NotInitialized,

    #[error("sweeper already running for {0}")]
    SweeperAlreadyRunning(PathBuf),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap an I/O error with the manifest path it concerns
    pub fn manifest_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ManifestIo {
            path: path.into(),
            source,
        }
    }

    /// Check if this error signals a programming mistake rather than a
    /// runtime condition
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::NotInitialized | Self::SweeperAlreadyRunning(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Self::Io(e.into())
        } else if e.is_data() || e.is_syntax() || e.is_eof() {
            Self::Deserialization(e.to_string())
        } else {
            Self::Serialization(e.to_string())
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Configuration(e.to_string())
    }
}
