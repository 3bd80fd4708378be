//! Background sweeper
//!
//! One tokio task per registry. After an initial grace period it applies the
//! age limit and then the count limit, sleeps, and repeats. The sweep itself
//! runs on the blocking pool since it does file I/O under the registry lock;
//! a panic there comes back as a `JoinError` and is followed by the shorter
//! error back-off. The lock is never held while the task sleeps.

use crate::registry::ArtifactRegistry;
use crate::stats::SweepReport;
use std::sync::Arc;
use std::time::Duration;
use stitchwork_common::{Error, Result, SweeperConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Timing of the sweep loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSchedule {
    /// Grace period before the first sweep
    pub initial_delay: Duration,
    /// Pause between successful sweeps
    pub interval: Duration,
    /// Pause after a failed sweep
    pub error_backoff: Duration,
}

impl Default for SweepSchedule {
    fn default() -> Self {
        Self::from(&SweeperConfig::default())
    }
}

impl SweepSchedule {
    /// Schedule for `config`, or `None` when the sweeper is switched off
    #[must_use]
    pub fn enabled(config: &SweeperConfig) -> Option<Self> {
        config.enabled.then(|| Self::from(config))
    }
}

impl From<&SweeperConfig> for SweepSchedule {
    fn from(config: &SweeperConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            interval: Duration::from_secs(config.interval_secs),
            error_backoff: Duration::from_secs(config.error_backoff_secs),
        }
    }
}

/// Releases the registry's sweeper slot when the task ends
struct SweeperClaim(Arc<ArtifactRegistry>);

impl Drop for SweeperClaim {
    fn drop(&mut self) {
        self.0.release_sweeper();
    }
}

/// Handle to a running sweep loop
///
/// Dropping the handle without calling [`Sweeper::shutdown`] also stops the
/// loop, at its next wake-up.
#[derive(Debug)]
pub struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Start sweeping `registry` on the current tokio runtime
    ///
    /// Fails with [`Error::SweeperAlreadyRunning`] if another sweeper is
    /// still attached to the same registry.
    pub fn spawn(registry: Arc<ArtifactRegistry>, schedule: SweepSchedule) -> Result<Self> {
        registry.claim_sweeper()?;
        let claim = SweeperClaim(Arc::clone(&registry));
        info!(
            "Starting sweeper for {:?} (first sweep in {:?}, then every {:?})",
            registry.config().upload_dir,
            schedule.initial_delay,
            schedule.interval
        );
        Self::launch(schedule, move || registry.sweep(), Some(claim))
    }

    fn launch<F>(schedule: SweepSchedule, job: F, claim: Option<SweeperClaim>) -> Result<Self>
    where
        F: Fn() -> SweepReport + Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::internal(format!("sweeper needs a tokio runtime: {e}")))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(async move {
            let _claim = claim;
            sweep_loop(Arc::new(job), schedule, shutdown_rx).await;
        });
        Ok(Self {
            shutdown_tx,
            handle,
        })
    }

    /// Signal the loop to stop and wait for it
    ///
    /// A sweep already in progress is allowed to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!("Sweeper task ended abnormally: {}", e);
        }
    }

    /// Check whether the loop has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn sweep_loop<F>(job: Arc<F>, schedule: SweepSchedule, mut shutdown: watch::Receiver<bool>)
where
    F: Fn() -> SweepReport + Send + Sync + 'static,
{
    if wait_or_shutdown(&mut shutdown, schedule.initial_delay).await {
        loop {
            let job = Arc::clone(&job);
            let delay = match tokio::task::spawn_blocking(move || job()).await {
                Ok(report) => {
                    debug!(
                        "Sweep finished: {} expired, {} overflow",
                        report.expired, report.overflow
                    );
                    schedule.interval
                }
                Err(e) => {
                    error!(
                        "Sweep failed: {}, retrying in {:?}",
                        e, schedule.error_backoff
                    );
                    schedule.error_backoff
                }
            };
            if !wait_or_shutdown(&mut shutdown, delay).await {
                break;
            }
        }
    }
    info!("Sweeper stopped");
}

/// Sleep for `delay`; false if shutdown was requested first
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    let slept = tokio::select! {
        () = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => false,
    };
    slept && !*shutdown.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stitchwork_common::{ArtifactKind, ArtifactRecord, RegistryConfig, unix_now};
    use tempfile::tempdir;

    fn quick() -> SweepSchedule {
        SweepSchedule {
            initial_delay: Duration::ZERO,
            interval: Duration::from_millis(10),
            error_backoff: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_schedule_from_config() {
        let schedule = SweepSchedule::default();
        assert_eq!(schedule.initial_delay, Duration::from_secs(60));
        assert_eq!(schedule.interval, Duration::from_secs(300));
        assert_eq!(schedule.error_backoff, Duration::from_secs(60));
    }

    #[test]
    fn test_disabled_config_yields_no_schedule() {
        let mut config = SweeperConfig {
            interval_secs: 30,
            ..SweeperConfig::default()
        };
        assert_eq!(
            SweepSchedule::enabled(&config).map(|s| s.interval),
            Some(Duration::from_secs(30))
        );

        config.enabled = false;
        assert!(SweepSchedule::enabled(&config).is_none());
    }

    #[tokio::test]
    async fn test_sweeps_seeded_expired_records() {
        let dir = tempdir().unwrap();
        let config = RegistryConfig::with_upload_dir(dir.path());
        let two_hours_ago = unix_now() - 7200.0;
        let mut seeded = Vec::new();
        for i in 0..3 {
            let path = dir.path().join(format!("old-{i}.png"));
            std::fs::write(&path, b"old").unwrap();
            seeded.push(ArtifactRecord::new(
                uuid::Uuid::new_v4().to_string().into(),
                path,
                3,
                two_hours_ago + f64::from(i),
                ArtifactKind::Pattern,
            ));
        }
        Manifest::new(config.manifest_path()).save(&seeded).unwrap();

        let registry = Arc::new(ArtifactRegistry::open(config).unwrap());
        assert_eq!(registry.len(), 3);
        let sweeper = Sweeper::spawn(Arc::clone(&registry), quick()).unwrap();

        for _ in 0..200 {
            if registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweeper.shutdown().await;

        assert!(registry.is_empty());
        assert!(seeded.iter().all(|r| !r.path.exists()));
        assert_eq!(registry.counters().snapshot().expired, 3);
    }

    #[tokio::test]
    async fn test_panicking_sweep_backs_off_and_continues() {
        let calls = Arc::new(AtomicUsize::new(0));
        let job_calls = Arc::clone(&calls);
        let sweeper = Sweeper::launch(
            quick(),
            move || {
                if job_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("sweep blew up");
                }
                SweepReport::default()
            },
            None,
        )
        .unwrap();

        for _ in 0..200 {
            if calls.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!sweeper.is_finished());
        sweeper.shutdown().await;
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_shutdown_is_prompt_and_releases_registry() {
        let dir = tempdir().unwrap();
        let registry =
            Arc::new(ArtifactRegistry::open(RegistryConfig::with_upload_dir(dir.path())).unwrap());
        let slow = SweepSchedule {
            initial_delay: Duration::from_secs(3600),
            ..quick()
        };

        let sweeper = Sweeper::spawn(Arc::clone(&registry), slow).unwrap();
        let second = Sweeper::spawn(Arc::clone(&registry), slow);
        assert!(matches!(second, Err(Error::SweeperAlreadyRunning(_))));

        tokio::time::timeout(Duration::from_secs(1), sweeper.shutdown())
            .await
            .unwrap();

        let again = Sweeper::spawn(Arc::clone(&registry), slow).unwrap();
        drop(again);
    }

    #[test]
    fn test_spawn_without_runtime_fails() {
        let dir = tempdir().unwrap();
        let registry =
            Arc::new(ArtifactRegistry::open(RegistryConfig::with_upload_dir(dir.path())).unwrap());

        let err = Sweeper::spawn(Arc::clone(&registry), quick()).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
