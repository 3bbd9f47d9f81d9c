//! Storage abstraction layer for the delivery engine.
//!
//! The dispatcher and sweeps depend only on [`DeliveryStore`]. Production
//! uses [`PostgresDeliveryStore`] over the `courier_core` repositories;
//! tests use [`memory::InMemoryDeliveryStore`], which keeps the same
//! locking and retention semantics without a database.
//!
//! A dispatch attempt holds one [`EventLease`]. The attempt's result is
//! written through the lease and becomes visible together with the state
//! update, so an event's attempt count and its stored results move as one.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use courier_core::{
    error::Result,
    models::{
        ClassifierId, DeliveryResult, Event, EventId, EventUpdate, OrgId, OrgRetention,
        Subscription, SubscriptionId,
    },
    storage::{OrgScope, Storage},
};
use sqlx::{Acquire, Postgres, Transaction};

/// Future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Exclusive hold on one event for the duration of a dispatch attempt.
///
/// Dropping a lease without committing releases it and leaves the event
/// unchanged, discarding any result recorded through it.
pub trait EventLease: Send {
    /// Event state as read when the lock was taken.
    fn event(&self) -> &Event;

    /// Writes a delivery result as part of the lease.
    ///
    /// A failed write leaves the lease usable; only the result is lost.
    fn record(&mut self, result: DeliveryResult) -> StoreFuture<'_, ()>;

    /// Persists the new state and releases the lock.
    fn commit(self: Box<Self>, update: EventUpdate, now: DateTime<Utc>) -> StoreFuture<'static, ()>;
}

/// Outcome of trying to lock an event.
pub enum EventLock {
    /// The caller holds the event until the lease is committed or dropped.
    Acquired(Box<dyn EventLease>),
    /// Another dispatcher holds the event.
    Busy,
    /// No such event.
    Missing,
}

/// Storage operations required by the delivery engine.
pub trait DeliveryStore: Send + Sync + 'static {
    /// Inserts a new event.
    fn create_event(&self, event: Event) -> StoreFuture<'_, ()>;

    /// Loads an event without locking it.
    fn find_event(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>>;

    /// Takes the per-event lock without waiting.
    fn lock_event(&self, event_id: EventId) -> StoreFuture<'_, EventLock>;

    /// Inserts an immutable delivery result.
    fn insert_delivery_result(&self, result: DeliveryResult) -> StoreFuture<'_, ()>;

    /// All results recorded for an event, oldest first.
    fn find_delivery_results(&self, event_id: EventId) -> StoreFuture<'_, Vec<DeliveryResult>>;

    /// All HTTP logs recorded for a classifier, newest first.
    fn find_classifier_results(
        &self,
        classifier_id: ClassifierId,
    ) -> StoreFuture<'_, Vec<DeliveryResult>>;

    /// Inserts a subscription.
    fn create_subscription(&self, subscription: Subscription) -> StoreFuture<'_, ()>;

    /// Active subscriptions of an organization for a topic.
    fn active_subscriptions(
        &self,
        org_id: OrgId,
        topic: String,
    ) -> StoreFuture<'_, Vec<Subscription>>;

    /// Soft-deletes a subscription. Returns whether it was active.
    fn deactivate_subscription(&self, subscription_id: SubscriptionId) -> StoreFuture<'_, bool>;

    /// Errored events due by `now` and Pending events created before
    /// `pending_before`, oldest due first.
    fn retry_candidates(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<EventId>>;

    /// Organizations with their own retention tiers.
    fn retention_overrides(&self) -> StoreFuture<'_, Vec<OrgRetention>>;

    /// Deletes up to `batch_size` events older than `cutoff`, together with
    /// their results. Returns the number of events deleted.
    fn trim_events(
        &self,
        scope: OrgScope,
        cutoff: DateTime<Utc>,
        only_completed: bool,
        batch_size: usize,
    ) -> StoreFuture<'_, u64>;

    /// Deletes up to `batch_size` results that belong to no event.
    fn trim_standalone_results(
        &self,
        scope: OrgScope,
        cutoff: DateTime<Utc>,
        only_success: bool,
        batch_size: usize,
    ) -> StoreFuture<'_, u64>;

    /// Claims the named sweep lease unless another holder owns it.
    fn try_acquire_sweep<'a>(
        &'a self,
        name: &'a str,
        holder: &'a str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreFuture<'a, bool>;

    /// Releases a sweep lease held by `holder`.
    fn release_sweep<'a>(
        &'a self,
        name: &'a str,
        holder: &'a str,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, ()>;
}

/// Production store over PostgreSQL.
///
/// `lock_event` opens a transaction and takes the row with
/// `FOR NO KEY UPDATE SKIP LOCKED`; the transaction lives in the lease and
/// the state update commits it. Attempt results are inserted on the same
/// connection under a savepoint, so a dispatch never needs a second pool
/// connection and a failed commit takes its result with it.
pub struct PostgresDeliveryStore {
    storage: Arc<Storage>,
}

impl PostgresDeliveryStore {
    /// Creates a new PostgreSQL store adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

struct PostgresEventLease {
    storage: Arc<Storage>,
    tx: Transaction<'static, Postgres>,
    event: Event,
}

impl EventLease for PostgresEventLease {
    fn event(&self) -> &Event {
        &self.event
    }

    fn record(&mut self, result: DeliveryResult) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut savepoint = self.tx.begin().await?;
            match self.storage.delivery_results.create_in_tx(&mut savepoint, &result).await {
                Ok(_) => savepoint.commit().await?,
                Err(e) => {
                    savepoint.rollback().await?;
                    return Err(e);
                },
            }
            Ok(())
        })
    }

    fn commit(self: Box<Self>, update: EventUpdate, now: DateTime<Utc>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            let Self { storage, mut tx, event } = *self;
            storage.events.update_state_in_tx(&mut tx, event.id, &update, now).await?;
            tx.commit().await?;
            Ok(())
        })
    }
}

fn to_limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl DeliveryStore for PostgresDeliveryStore {
    fn create_event(&self, event: Event) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.storage.events.create(&event).await.map(|_| ()) })
    }

    fn find_event(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>> {
        Box::pin(async move { self.storage.events.find_by_id(event_id).await })
    }

    fn lock_event(&self, event_id: EventId) -> StoreFuture<'_, EventLock> {
        Box::pin(async move {
            let mut tx = self.storage.pool().begin().await?;

            match self.storage.events.lock_for_dispatch_in_tx(&mut tx, event_id).await? {
                Some(event) => Ok(EventLock::Acquired(Box::new(PostgresEventLease {
                    storage: self.storage.clone(),
                    tx,
                    event,
                }))),
                None => {
                    drop(tx);
                    if self.storage.events.find_by_id(event_id).await?.is_some() {
                        Ok(EventLock::Busy)
                    } else {
                        Ok(EventLock::Missing)
                    }
                },
            }
        })
    }

    fn insert_delivery_result(&self, result: DeliveryResult) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.storage.delivery_results.create(&result).await.map(|_| ()) })
    }

    fn find_delivery_results(&self, event_id: EventId) -> StoreFuture<'_, Vec<DeliveryResult>> {
        Box::pin(async move { self.storage.delivery_results.find_by_event(event_id).await })
    }

    fn find_classifier_results(
        &self,
        classifier_id: ClassifierId,
    ) -> StoreFuture<'_, Vec<DeliveryResult>> {
        Box::pin(async move { self.storage.delivery_results.find_by_classifier(classifier_id).await })
    }

    fn create_subscription(&self, subscription: Subscription) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.storage.subscriptions.create(&subscription).await.map(|_| ()) })
    }

    fn active_subscriptions(
        &self,
        org_id: OrgId,
        topic: String,
    ) -> StoreFuture<'_, Vec<Subscription>> {
        Box::pin(async move { self.storage.subscriptions.find_active(org_id, &topic).await })
    }

    fn deactivate_subscription(&self, subscription_id: SubscriptionId) -> StoreFuture<'_, bool> {
        Box::pin(async move { self.storage.subscriptions.deactivate(subscription_id).await })
    }

    fn retry_candidates(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<EventId>> {
        Box::pin(async move {
            self.storage.events.find_retry_candidates(now, pending_before, to_limit(limit)).await
        })
    }

    fn retention_overrides(&self) -> StoreFuture<'_, Vec<OrgRetention>> {
        Box::pin(async move { self.storage.retention.list_overrides().await })
    }

    fn trim_events(
        &self,
        scope: OrgScope,
        cutoff: DateTime<Utc>,
        only_completed: bool,
        batch_size: usize,
    ) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.storage
                .events
                .delete_batch_before(&scope, cutoff, only_completed, to_limit(batch_size))
                .await
        })
    }

    fn trim_standalone_results(
        &self,
        scope: OrgScope,
        cutoff: DateTime<Utc>,
        only_success: bool,
        batch_size: usize,
    ) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.storage
                .delivery_results
                .delete_standalone_batch_before(&scope, cutoff, only_success, to_limit(batch_size))
                .await
        })
    }

    fn try_acquire_sweep<'a>(
        &'a self,
        name: &'a str,
        holder: &'a str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.storage.sweep_leases.try_acquire(name, holder, now, expires_at).await })
    }

    fn release_sweep<'a>(
        &'a self,
        name: &'a str,
        holder: &'a str,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.storage.sweep_leases.release(name, holder, now).await })
    }
}

pub mod memory {
    //! In-memory store for testing delivery logic without a database.
    //!
    //! Per-event locks are `tokio` mutexes taken with `try_lock_owned`, so a
    //! second dispatcher sees `Busy` exactly like `SKIP LOCKED`. A lock entry
    //! lives only while someone holds or waits on it. Retention deletes skip
    //! locked events and cascade to their results.

    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    };

    use chrono::{DateTime, Utc};
    use courier_core::{
        error::CoreError,
        models::{
            ClassifierId, DeliveryResult, Event, EventId, EventStatus, EventUpdate, OrgId,
            OrgRetention, Subscription, SubscriptionId,
        },
        storage::OrgScope,
    };
    use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

    use super::{DeliveryStore, EventLease, EventLock, StoreFuture};

    type LockTable = Arc<std::sync::Mutex<HashMap<EventId, Arc<Mutex<()>>>>>;

    #[derive(Default)]
    struct State {
        events: HashMap<EventId, Event>,
        results: Vec<DeliveryResult>,
        subscriptions: HashMap<SubscriptionId, Subscription>,
        retention: HashMap<OrgId, OrgRetention>,
        leases: HashMap<String, (String, DateTime<Utc>)>,
    }

    /// In-memory delivery store with failure injection.
    #[derive(Clone, Default)]
    pub struct InMemoryDeliveryStore {
        state: Arc<RwLock<State>>,
        locks: LockTable,
        fail_result_inserts: Arc<AtomicBool>,
        fail_event_inserts: Arc<AtomicBool>,
    }

    impl InMemoryDeliveryStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Inserts an event as-is, e.g. one backdated for sweep tests.
        pub async fn seed_event(&self, event: Event) {
            self.state.write().await.events.insert(event.id, event);
        }

        /// Inserts a result as-is.
        pub async fn seed_result(&self, result: DeliveryResult) {
            self.state.write().await.results.push(result);
        }

        /// Sets a retention override for an organization.
        pub async fn set_retention(&self, retention: OrgRetention) {
            self.state.write().await.retention.insert(retention.org_id, retention);
        }

        /// Makes every following result insert fail until turned off.
        pub fn fail_result_inserts(&self, fail: bool) {
            self.fail_result_inserts.store(fail, Ordering::SeqCst);
        }

        /// Makes every following event insert fail until turned off.
        pub fn fail_event_inserts(&self, fail: bool) {
            self.fail_event_inserts.store(fail, Ordering::SeqCst);
        }

        /// Current state of one event.
        pub async fn event(&self, event_id: EventId) -> Option<Event> {
            self.state.read().await.events.get(&event_id).cloned()
        }

        /// Every stored event.
        pub async fn events(&self) -> Vec<Event> {
            self.state.read().await.events.values().cloned().collect()
        }

        /// Every stored result.
        pub async fn results(&self) -> Vec<DeliveryResult> {
            self.state.read().await.results.clone()
        }

        /// Holds the lock on an event as if another dispatcher owned it.
        pub async fn hold_lock(&self, event_id: EventId) -> OwnedMutexGuard<()> {
            self.lock_for(event_id).lock_owned().await
        }

        fn lock_for(&self, event_id: EventId) -> Arc<Mutex<()>> {
            let mut locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            locks.entry(event_id).or_default().clone()
        }

        fn is_locked(&self, event_id: EventId) -> bool {
            let locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            locks.get(&event_id).is_some_and(|lock| lock.try_lock().is_err())
        }

        /// Number of per-event lock entries currently kept.
        pub fn lock_entries(&self) -> usize {
            self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
        }
    }

    /// Drops the lock entry of an event unless someone still holds or waits
    /// on it.
    fn prune_lock(locks: &LockTable, event_id: EventId) {
        let mut locks = locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if locks.get(&event_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&event_id);
        }
    }

    struct MemoryEventLease {
        state: Arc<RwLock<State>>,
        locks: LockTable,
        fail_result_inserts: Arc<AtomicBool>,
        event: Event,
        staged: Vec<DeliveryResult>,
        guard: Option<OwnedMutexGuard<()>>,
    }

    impl EventLease for MemoryEventLease {
        fn event(&self) -> &Event {
            &self.event
        }

        fn record(&mut self, result: DeliveryResult) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                if self.fail_result_inserts.load(Ordering::SeqCst) {
                    return Err(CoreError::Database("injected result insert failure".into()));
                }
                self.staged.push(result);
                Ok(())
            })
        }

        fn commit(
            self: Box<Self>,
            update: EventUpdate,
            now: DateTime<Utc>,
        ) -> StoreFuture<'static, ()> {
            Box::pin(async move {
                let mut lease = self;
                let staged = std::mem::take(&mut lease.staged);

                let mut state = lease.state.write().await;
                let event = state.events.get_mut(&lease.event.id).ok_or_else(|| {
                    CoreError::NotFound(format!("event {} not found", lease.event.id))
                })?;
                event.apply(&update, now);
                state.results.extend(staged);
                Ok(())
            })
        }
    }

    impl Drop for MemoryEventLease {
        fn drop(&mut self) {
            drop(self.guard.take());
            prune_lock(&self.locks, self.event.id);
        }
    }

    /// Oldest `batch_size` keys by timestamp.
    fn take_batch<K>(items: impl Iterator<Item = (DateTime<Utc>, K)>, batch_size: usize) -> Vec<K> {
        let mut matching: Vec<(DateTime<Utc>, K)> = items.collect();
        matching.sort_by_key(|(at, _)| *at);
        matching.into_iter().take(batch_size).map(|(_, key)| key).collect()
    }

    impl DeliveryStore for InMemoryDeliveryStore {
        fn create_event(&self, event: Event) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                if self.fail_event_inserts.load(Ordering::SeqCst) {
                    return Err(CoreError::Database("injected event insert failure".into()));
                }

                let mut state = self.state.write().await;
                if state.events.contains_key(&event.id) {
                    return Err(CoreError::ConstraintViolation(format!(
                        "duplicate event {}",
                        event.id
                    )));
                }
                state.events.insert(event.id, event);
                Ok(())
            })
        }

        fn find_event(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>> {
            Box::pin(async move { Ok(self.state.read().await.events.get(&event_id).cloned()) })
        }

        fn lock_event(&self, event_id: EventId) -> StoreFuture<'_, EventLock> {
            Box::pin(async move {
                let Ok(guard) = self.lock_for(event_id).try_lock_owned() else {
                    return Ok(EventLock::Busy);
                };

                let event = self.state.read().await.events.get(&event_id).cloned();
                Ok(match event {
                    Some(event) => EventLock::Acquired(Box::new(MemoryEventLease {
                        state: self.state.clone(),
                        locks: self.locks.clone(),
                        fail_result_inserts: self.fail_result_inserts.clone(),
                        event,
                        staged: Vec::new(),
                        guard: Some(guard),
                    })),
                    None => {
                        drop(guard);
                        prune_lock(&self.locks, event_id);
                        EventLock::Missing
                    },
                })
            })
        }

        fn insert_delivery_result(&self, result: DeliveryResult) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                if self.fail_result_inserts.load(Ordering::SeqCst) {
                    return Err(CoreError::Database("injected result insert failure".into()));
                }

                let mut state = self.state.write().await;
                if let Some(event_id) = result.association.event_id() {
                    if !state.events.contains_key(&event_id) {
                        return Err(CoreError::ConstraintViolation(format!(
                            "foreign key constraint violation: event {event_id}"
                        )));
                    }
                }
                state.results.push(result);
                Ok(())
            })
        }

        fn find_delivery_results(
            &self,
            event_id: EventId,
        ) -> StoreFuture<'_, Vec<DeliveryResult>> {
            Box::pin(async move {
                let state = self.state.read().await;
                let mut results: Vec<DeliveryResult> = state
                    .results
                    .iter()
                    .filter(|r| r.association.event_id() == Some(event_id))
                    .cloned()
                    .collect();
                results.sort_by_key(|r| r.created_at);
                Ok(results)
            })
        }

        fn find_classifier_results(
            &self,
            classifier_id: ClassifierId,
        ) -> StoreFuture<'_, Vec<DeliveryResult>> {
            Box::pin(async move {
                let state = self.state.read().await;
                let mut results: Vec<DeliveryResult> = state
                    .results
                    .iter()
                    .filter(|r| r.association.classifier_id() == Some(classifier_id))
                    .cloned()
                    .collect();
                results.sort_by_key(|r| std::cmp::Reverse(r.created_at));
                Ok(results)
            })
        }

        fn create_subscription(&self, subscription: Subscription) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                self.state.write().await.subscriptions.insert(subscription.id, subscription);
                Ok(())
            })
        }

        fn active_subscriptions(
            &self,
            org_id: OrgId,
            topic: String,
        ) -> StoreFuture<'_, Vec<Subscription>> {
            Box::pin(async move {
                let state = self.state.read().await;
                let mut subscriptions: Vec<Subscription> = state
                    .subscriptions
                    .values()
                    .filter(|s| s.is_active && s.org_id == org_id && s.topic == topic)
                    .cloned()
                    .collect();
                subscriptions.sort_by_key(|s| s.created_at);
                Ok(subscriptions)
            })
        }

        fn deactivate_subscription(
            &self,
            subscription_id: SubscriptionId,
        ) -> StoreFuture<'_, bool> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                Ok(match state.subscriptions.get_mut(&subscription_id) {
                    Some(subscription) if subscription.is_active => {
                        subscription.is_active = false;
                        true
                    },
                    _ => false,
                })
            })
        }

        fn retry_candidates(
            &self,
            now: DateTime<Utc>,
            pending_before: DateTime<Utc>,
            limit: usize,
        ) -> StoreFuture<'_, Vec<EventId>> {
            Box::pin(async move {
                let state = self.state.read().await;
                let due = state.events.values().filter_map(|event| {
                    let due_at = match event.status {
                        EventStatus::Errored => event.next_attempt.filter(|at| *at <= now),
                        EventStatus::Pending if event.created_at <= pending_before => {
                            Some(event.next_attempt.unwrap_or(event.created_at))
                        },
                        _ => None,
                    }?;
                    Some((due_at, event.id))
                });
                Ok(take_batch(due, limit))
            })
        }

        fn retention_overrides(&self) -> StoreFuture<'_, Vec<OrgRetention>> {
            Box::pin(async move {
                let mut overrides: Vec<OrgRetention> =
                    self.state.read().await.retention.values().copied().collect();
                overrides.sort_by_key(|r| r.org_id);
                Ok(overrides)
            })
        }

        fn trim_events(
            &self,
            scope: OrgScope,
            cutoff: DateTime<Utc>,
            only_completed: bool,
            batch_size: usize,
        ) -> StoreFuture<'_, u64> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                let doomed = take_batch(
                    state
                        .events
                        .values()
                        .filter(|e| e.created_at < cutoff)
                        .filter(|e| !only_completed || e.status == EventStatus::Completed)
                        .filter(|e| scope.contains(e.org_id))
                        .filter(|e| !self.is_locked(e.id))
                        .map(|e| (e.created_at, e.id)),
                    batch_size,
                );

                for event_id in &doomed {
                    state.events.remove(event_id);
                    prune_lock(&self.locks, *event_id);
                }
                state
                    .results
                    .retain(|r| r.association.event_id().is_none_or(|id| !doomed.contains(&id)));

                Ok(doomed.len() as u64)
            })
        }

        fn trim_standalone_results(
            &self,
            scope: OrgScope,
            cutoff: DateTime<Utc>,
            only_success: bool,
            batch_size: usize,
        ) -> StoreFuture<'_, u64> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                let doomed = take_batch(
                    state
                        .results
                        .iter()
                        .filter(|r| r.association.event_id().is_none())
                        .filter(|r| r.created_at < cutoff)
                        .filter(|r| !only_success || r.is_success())
                        .filter(|r| scope.contains(r.org_id))
                        .map(|r| (r.created_at, r.id)),
                    batch_size,
                );

                state.results.retain(|r| !doomed.contains(&r.id));
                Ok(doomed.len() as u64)
            })
        }

        fn try_acquire_sweep<'a>(
            &'a self,
            name: &'a str,
            holder: &'a str,
            now: DateTime<Utc>,
            expires_at: DateTime<Utc>,
        ) -> StoreFuture<'a, bool> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                let claimable = match state.leases.get(name) {
                    Some((current, lease_end)) => current == holder || *lease_end <= now,
                    None => true,
                };
                if claimable {
                    state.leases.insert(name.to_string(), (holder.to_string(), expires_at));
                }
                Ok(claimable)
            })
        }

        fn release_sweep<'a>(
            &'a self,
            name: &'a str,
            holder: &'a str,
            now: DateTime<Utc>,
        ) -> StoreFuture<'a, ()> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                if let Some((current, lease_end)) = state.leases.get_mut(name) {
                    if current == holder {
                        *lease_end = now;
                    }
                }
                Ok(())
            })
        }
    }

}
