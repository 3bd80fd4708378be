//! Late-initialized registry handle for composition roots

use crate::registry::ArtifactRegistry;
use parking_lot::RwLock;
use std::sync::Arc;
use stitchwork_common::{Error, RegistryConfig, Result};
use tracing::debug;

/// Holds at most one registry, opened on first `init`
///
/// Handlers that start before the registry is configured get
/// [`Error::NotInitialized`] from [`RegistryCell::get`] instead of a panic.
#[derive(Debug, Default)]
pub struct RegistryCell {
    inner: RwLock<Option<Arc<ArtifactRegistry>>>,
}

impl RegistryCell {
    /// Create an empty cell
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Open the registry, or return the one already opened
    ///
    /// A second call ignores its `config`.
    pub fn init(&self, config: RegistryConfig) -> Result<Arc<ArtifactRegistry>> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.as_ref() {
            debug!(
                "Registry already initialized for {:?}",
                existing.config().upload_dir
            );
            return Ok(Arc::clone(existing));
        }
        let registry = Arc::new(ArtifactRegistry::open(config)?);
        *inner = Some(Arc::clone(&registry));
        Ok(registry)
    }

    /// The registry, if `init` has succeeded
    pub fn get(&self) -> Result<Arc<ArtifactRegistry>> {
        self.inner.read().clone().ok_or(Error::NotInitialized)
    }

    /// Check whether `init` has succeeded
    pub fn is_initialized(&self) -> bool {
        self.inner.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_get_before_init() {
        let cell = RegistryCell::new();
        assert!(!cell.is_initialized());
        let err = cell.get().unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
        assert!(err.is_misuse());
    }

    #[test]
    fn test_init_is_idempotent() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        let cell = RegistryCell::new();

        let a = cell.init(RegistryConfig::with_upload_dir(first.path())).unwrap();
        let b = cell.init(RegistryConfig::with_upload_dir(second.path())).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &cell.get().unwrap()));
        assert_eq!(b.config().upload_dir, first.path());
    }

    #[test]
    fn test_failed_init_leaves_cell_empty() {
        let dir = tempdir().unwrap();
        let cell = RegistryCell::new();

        assert!(cell.init(RegistryConfig::with_upload_dir(dir.path()).max_count(0)).is_err());
        assert!(!cell.is_initialized());
    }
}
