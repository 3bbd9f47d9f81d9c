//! Periodic sweep jobs.
//!
//! The retry sweep re-dispatches Errored events that are due and Pending
//! events that were never attempted. The retention sweep deletes old events
//! and HTTP logs in bounded batches. Both are idempotent and guarded so a
//! sweep kind never overlaps with itself, in this process or any other.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use courier_core::{models::EventStatus, storage::OrgScope, time::Clock};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, OwnedMutexGuard, Semaphore},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    dispatch::{Dispatcher, Disposition},
    error::{DeliveryError, Result},
    storage::DeliveryStore,
    PENDING_GRACE_SECONDS, TRIM_BATCH_SIZE,
};

/// Lease name of the retry sweep.
pub const RETRY_SWEEP: &str = "retry_events";

/// Lease name of the retention sweep.
pub const RETENTION_SWEEP: &str = "trim_delivery_logs";

const DEFAULT_LEASE_SECONDS: u64 = 15 * 60;

/// Non-overlap guard for one sweep kind.
///
/// Two layers: an in-process mutex taken with `try_lock`, then a database
/// lease that expires on its own if the holder dies. A long run keeps the
/// lease alive through [`SweepPermit::keep_alive`].
pub struct SweepGuard {
    name: &'static str,
    holder: String,
    lease_duration: Duration,
    local: Arc<Mutex<()>>,
    store: Arc<dyn DeliveryStore>,
    clock: Arc<dyn Clock>,
}

/// Proof that the caller runs the sweep. Release it when done.
pub struct SweepPermit<'a> {
    guard: &'a SweepGuard,
    _local: OwnedMutexGuard<()>,
    renew_after: DateTime<Utc>,
}

impl SweepGuard {
    /// Creates a guard with a process-unique holder name.
    pub fn new(
        name: &'static str,
        lease_duration: Duration,
        store: Arc<dyn DeliveryStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name,
            holder: format!("courier-{}", Uuid::new_v4()),
            lease_duration,
            local: Arc::new(Mutex::new(())),
            store,
            clock,
        }
    }

    /// Sweep kind this guard protects.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Takes both layers, or returns `None` if either is held elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the lease cannot be queried.
    pub async fn acquire(&self) -> Result<Option<SweepPermit<'_>>> {
        let Ok(local) = self.local.clone().try_lock_owned() else {
            debug!(sweep = self.name, "sweep already running in this process");
            return Ok(None);
        };

        let now = self.clock.now();
        if !self.claim(now).await? {
            debug!(sweep = self.name, "sweep lease held by another process");
            return Ok(None);
        }

        Ok(Some(SweepPermit { guard: self, _local: local, renew_after: self.renew_after(now) }))
    }

    async fn claim(&self, now: DateTime<Utc>) -> Result<bool> {
        let expires_at = now
            .checked_add_signed(chrono_duration(self.lease_duration))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Ok(self.store.try_acquire_sweep(self.name, &self.holder, now, expires_at).await?)
    }

    /// Halfway through the lease.
    fn renew_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(chrono_duration(self.lease_duration / 2))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl SweepPermit<'_> {
    /// Extends the database lease once half of it has elapsed.
    ///
    /// Call between units of work. Cheap when no renewal is due.
    ///
    /// # Errors
    ///
    /// Returns `LeaseLost` if another holder claimed the lease, and `Storage`
    /// if the lease cannot be queried. The run must stop in either case.
    pub async fn keep_alive(&mut self) -> Result<()> {
        let guard = self.guard;
        let now = guard.clock.now();
        if now < self.renew_after {
            return Ok(());
        }

        if !guard.claim(now).await? {
            warn!(sweep = guard.name, "sweep lease taken over by another process");
            return Err(DeliveryError::LeaseLost { sweep: guard.name.to_string() });
        }

        debug!(sweep = guard.name, "sweep lease renewed");
        self.renew_after = guard.renew_after(now);
        Ok(())
    }

    /// Releases the database lease. Failures are logged, the lease then
    /// simply expires.
    pub async fn release(self) {
        let guard = self.guard;
        if let Err(e) = guard.store.release_sweep(guard.name, &guard.holder, guard.clock.now()).await
        {
            warn!(sweep = guard.name, error = %e, "failed to release sweep lease");
        }
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// `now - age`, saturating at the earliest representable time.
fn cutoff(now: DateTime<Utc>, age: chrono::Duration) -> DateTime<Utc> {
    now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn seconds(secs: i64) -> chrono::Duration {
    chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
}

/// What a sweep run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// The run did not take the guard and did nothing.
    pub skipped: bool,
    /// Events dispatched.
    pub dispatched: usize,
    /// Dispatches that ended Completed.
    pub completed: usize,
    /// Dispatches that ended Errored.
    pub errored: usize,
    /// Dispatches that ended Failed.
    pub failed: usize,
    /// Events skipped because another dispatcher held them.
    pub busy: usize,
    /// Dispatches that returned an error.
    pub errors: usize,
    /// Events deleted.
    pub events_deleted: u64,
    /// Standalone results deleted. Event results cascade and are not counted.
    pub results_deleted: u64,
}

impl SweepReport {
    /// Report of a run that did not take the guard.
    pub fn skipped() -> Self {
        Self { skipped: true, ..Self::default() }
    }
}

/// A periodic job the scheduler can run.
pub trait Sweep: Send + Sync + 'static {
    /// Stable name for logs.
    fn name(&self) -> &'static str;

    /// Runs one pass.
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<SweepReport>> + Send + '_>>;
}

/// Retry sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySweepConfig {
    /// Maximum events picked per run.
    pub batch_size: usize,
    /// Maximum concurrent dispatches.
    pub concurrency: usize,
    /// Age after which a Pending event counts as abandoned.
    pub pending_grace: Duration,
    /// Lifetime of the database lease.
    pub lease_duration: Duration,
}

impl Default for RetrySweepConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 8,
            pending_grace: Duration::from_secs(PENDING_GRACE_SECONDS),
            lease_duration: Duration::from_secs(DEFAULT_LEASE_SECONDS),
        }
    }
}

/// Re-dispatches due Errored events and abandoned Pending events.
pub struct RetrySweep {
    dispatcher: Arc<Dispatcher>,
    guard: SweepGuard,
    config: RetrySweepConfig,
}

impl RetrySweep {
    /// Creates a retry sweep over the dispatcher's store.
    pub fn new(dispatcher: Arc<Dispatcher>, config: RetrySweepConfig) -> Self {
        let guard = SweepGuard::new(
            RETRY_SWEEP,
            config.lease_duration,
            dispatcher.store().clone(),
            dispatcher.clock().clone(),
        );
        Self { dispatcher, guard, config }
    }

    /// Runs one pass.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if candidates cannot be loaded and `LeaseLost` if the
    /// lease was taken over mid-run. Failures of single dispatches are
    /// counted, not returned.
    pub async fn run(&self) -> Result<SweepReport> {
        let Some(mut permit) = self.guard.acquire().await? else {
            return Ok(SweepReport::skipped());
        };

        let report = self.run_locked(&mut permit).await;
        permit.release().await;
        report
    }

    async fn run_locked(&self, lease: &mut SweepPermit<'_>) -> Result<SweepReport> {
        let now = self.dispatcher.clock().now();
        let pending_before = cutoff(now, chrono_duration(self.config.pending_grace));

        let candidates = self
            .dispatcher
            .store()
            .retry_candidates(now, pending_before, self.config.batch_size)
            .await?;

        let mut report = SweepReport::default();
        if candidates.is_empty() {
            return Ok(report);
        }

        debug!(candidates = candidates.len(), "retry sweep picked events");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut lease_error = None;

        for event_id in candidates {
            // In-flight dispatches finish; nothing new starts without the lease.
            if let Err(e) = lease.keep_alive().await {
                lease_error = Some(e);
                break;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| DeliveryError::internal(format!("semaphore closed: {e}")))?;
            let dispatcher = self.dispatcher.clone();

            tasks.spawn(async move {
                let outcome = dispatcher.dispatch(event_id).await;
                drop(permit);
                (event_id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => match outcome.disposition {
                    Disposition::Busy => report.busy += 1,
                    Disposition::AlreadyFinal => {},
                    Disposition::Attempted => {
                        report.dispatched += 1;
                        match outcome.status {
                            EventStatus::Completed => report.completed += 1,
                            EventStatus::Errored => report.errored += 1,
                            EventStatus::Failed => report.failed += 1,
                            EventStatus::Pending => {},
                        }
                    },
                },
                Ok((event_id, Err(e))) => {
                    report.errors += 1;
                    warn!(event_id = %event_id, error = %e, "retry dispatch failed");
                },
                Err(e) => {
                    report.errors += 1;
                    error!(error = %e, "retry dispatch task panicked");
                },
            }
        }

        info!(
            dispatched = report.dispatched,
            completed = report.completed,
            errored = report.errored,
            failed = report.failed,
            busy = report.busy,
            errors = report.errors,
            "retry sweep finished"
        );

        match lease_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

impl Sweep for RetrySweep {
    fn name(&self) -> &'static str {
        RETRY_SWEEP
    }

    fn run(&self) -> Pin<Box<dyn Future<Output = Result<SweepReport>> + Send + '_>> {
        Box::pin(RetrySweep::run(self))
    }
}

/// Default retention tiers and batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Age after which successful records are deleted.
    pub success_after: Duration,
    /// Age after which every record is deleted.
    pub all_after: Duration,
    /// Rows deleted per statement.
    pub batch_size: usize,
    /// Lifetime of the database lease.
    pub lease_duration: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            success_after: Duration::from_secs(48 * 60 * 60),
            all_after: Duration::from_secs(30 * 24 * 60 * 60),
            batch_size: TRIM_BATCH_SIZE,
            lease_duration: Duration::from_secs(DEFAULT_LEASE_SECONDS),
        }
    }
}

/// Deletes events and HTTP logs past their retention tiers.
///
/// Organizations with an override use their own tiers; everyone else uses
/// the defaults. Successful means Completed for events and 2xx for
/// standalone logs.
pub struct RetentionSweep {
    store: Arc<dyn DeliveryStore>,
    clock: Arc<dyn Clock>,
    guard: SweepGuard,
    config: RetentionConfig,
}

impl RetentionSweep {
    /// Creates a retention sweep.
    pub fn new(store: Arc<dyn DeliveryStore>, clock: Arc<dyn Clock>, config: RetentionConfig) -> Self {
        let guard =
            SweepGuard::new(RETENTION_SWEEP, config.lease_duration, store.clone(), clock.clone());
        Self { store, clock, guard, config }
    }

    /// Runs one pass.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if a delete batch fails. Batches already committed
    /// stay deleted.
    pub async fn run(&self) -> Result<SweepReport> {
        let Some(mut permit) = self.guard.acquire().await? else {
            return Ok(SweepReport::skipped());
        };

        let report = self.run_locked(&mut permit).await;
        if let Err(e) = &report {
            error!(error = %e, "retention sweep failed");
        }
        permit.release().await;
        report
    }

    async fn run_locked(&self, permit: &mut SweepPermit<'_>) -> Result<SweepReport> {
        let now = self.clock.now();
        let overrides = self.store.retention_overrides().await?;
        let mut report = SweepReport::default();

        for retention in &overrides {
            self.trim_scope(
                &OrgScope::Only(retention.org_id),
                cutoff(now, seconds(retention.success_after_secs)),
                cutoff(now, seconds(retention.all_after_secs)),
                permit,
                &mut report,
            )
            .await?;
        }

        let default_scope = OrgScope::Except(overrides.iter().map(|r| r.org_id).collect());
        self.trim_scope(
            &default_scope,
            cutoff(now, chrono_duration(self.config.success_after)),
            cutoff(now, chrono_duration(self.config.all_after)),
            permit,
            &mut report,
        )
        .await?;

        info!(
            events_deleted = report.events_deleted,
            results_deleted = report.results_deleted,
            overrides = overrides.len(),
            "retention sweep finished"
        );

        Ok(report)
    }

    async fn trim_scope(
        &self,
        scope: &OrgScope,
        success_cutoff: DateTime<Utc>,
        all_cutoff: DateTime<Utc>,
        permit: &mut SweepPermit<'_>,
        report: &mut SweepReport,
    ) -> Result<()> {
        for (before, only_success) in [(success_cutoff, true), (all_cutoff, false)] {
            self.trim_events(scope, before, only_success, permit, report).await?;
            self.trim_results(scope, before, only_success, permit, report).await?;
        }
        Ok(())
    }

    async fn trim_events(
        &self,
        scope: &OrgScope,
        cutoff: DateTime<Utc>,
        only_completed: bool,
        permit: &mut SweepPermit<'_>,
        report: &mut SweepReport,
    ) -> Result<()> {
        let batch_size = self.config.batch_size.max(1);

        loop {
            permit.keep_alive().await?;
            let deleted =
                self.store.trim_events(scope.clone(), cutoff, only_completed, batch_size).await?;
            report.events_deleted += deleted;
            if deleted < batch_size as u64 {
                return Ok(());
            }
        }
    }

    async fn trim_results(
        &self,
        scope: &OrgScope,
        cutoff: DateTime<Utc>,
        only_success: bool,
        permit: &mut SweepPermit<'_>,
        report: &mut SweepReport,
    ) -> Result<()> {
        let batch_size = self.config.batch_size.max(1);

        loop {
            permit.keep_alive().await?;
            let deleted = self
                .store
                .trim_standalone_results(scope.clone(), cutoff, only_success, batch_size)
                .await?;
            report.results_deleted += deleted;
            if deleted < batch_size as u64 {
                return Ok(());
            }
        }
    }
}

impl Sweep for RetentionSweep {
    fn name(&self) -> &'static str {
        RETENTION_SWEEP
    }

    fn run(&self) -> Pin<Box<dyn Future<Output = Result<SweepReport>> + Send + '_>> {
        Box::pin(RetentionSweep::run(self))
    }
}
