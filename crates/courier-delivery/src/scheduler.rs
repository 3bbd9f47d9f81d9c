//! Interval scheduler for sweep jobs with graceful shutdown.

use std::{sync::Arc, time::Duration};

use courier_core::time::Clock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    sweep::Sweep,
};

/// Sweep intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between retry sweep runs.
    pub retry_interval: Duration,
    /// Pause between retention sweep runs.
    pub retention_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { retry_interval: Duration::from_secs(60), retention_interval: Duration::from_secs(3600) }
    }
}

/// Runs registered sweeps on fixed intervals until shut down.
///
/// Each sweep runs in its own task: run, then sleep for the interval or
/// stop on cancellation. A run in progress is never interrupted; shutdown
/// waits for it up to the given timeout.
pub struct SweepScheduler {
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
    pending: Vec<(Arc<dyn Sweep>, Duration)>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl SweepScheduler {
    /// Creates a scheduler with no sweeps.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            cancellation_token: CancellationToken::new(),
            pending: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Adds a sweep to run every `interval` once started.
    pub fn register(&mut self, sweep: Arc<dyn Sweep>, interval: Duration) {
        self.pending.push((sweep, interval));
    }

    /// Token cancelled on shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Spawns one loop per registered sweep.
    pub fn start(&mut self) {
        for (sweep, interval) in std::mem::take(&mut self.pending) {
            let name = sweep.name();
            let token = self.cancellation_token.clone();
            let clock = self.clock.clone();

            info!(sweep = name, interval_seconds = interval.as_secs(), "starting sweep loop");
            let handle = tokio::spawn(run_loop(sweep, interval, clock, token));
            self.handles.push((name, handle));
        }
    }

    /// Whether any sweep loop is still running.
    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|(_, h)| !h.is_finished())
    }

    /// Cancels every loop and waits for in-flight runs to finish.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if loops do not stop within `timeout`, or
    /// `TaskPanic` if a loop panicked.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            sweep_count = self.handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful sweep shutdown"
        );

        self.cancellation_token.cancel();
        let handles = std::mem::take(&mut self.handles);

        let shutdown_future = async {
            let mut first_panic = None;

            for (name, handle) in handles {
                if let Err(join_error) = handle.await {
                    error!(sweep = name, error = %join_error, "sweep task panicked during shutdown");
                    first_panic.get_or_insert(DeliveryError::TaskPanic {
                        task: name.to_string(),
                        error: join_error.to_string(),
                    });
                }
            }

            first_panic
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(None) => {
                info!("sweep scheduler shutdown completed");
                Ok(())
            },
            Ok(Some(panic)) => Err(panic),
            Err(_timeout) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "sweep shutdown timed out, some sweeps may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }
}

async fn run_loop(
    sweep: Arc<dyn Sweep>,
    interval: Duration,
    clock: Arc<dyn Clock>,
    token: CancellationToken,
) {
    let name = sweep.name();

    while !token.is_cancelled() {
        match sweep.run().await {
            Ok(report) if report.skipped => {
                debug!(sweep = name, "sweep skipped, guard held elsewhere");
            },
            Ok(report) => debug!(sweep = name, ?report, "sweep run completed"),
            Err(e) => error!(sweep = name, error = %e, "sweep run failed"),
        }

        tokio::select! {
            () = clock.sleep(interval) => {},
            () = token.cancelled() => break,
        }
    }

    info!(sweep = name, "sweep loop stopped");
}

impl Drop for SweepScheduler {
    fn drop(&mut self) {
        let active = self.handles.iter().filter(|(_, h)| !h.is_finished()).count();

        if active > 0 && !self.cancellation_token.is_cancelled() {
            warn!(
                active_sweeps = active,
                "sweep scheduler dropped without shutdown_graceful, cancelling sweeps"
            );
            self.cancellation_token.cancel();
        }
    }
}
