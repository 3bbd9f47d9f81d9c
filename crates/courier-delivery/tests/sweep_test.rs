//! Integration tests for the retry and retention sweeps.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use courier_core::{
    models::{
        Association, ClassifierId, DeliveryResult, DeliveryResultId, EndpointConfig, Event,
        EventId, EventStatus, NewDeliveryResult, NewEvent, OrgId, OrgRetention, Subscription,
        SubscriptionId,
    },
    storage::OrgScope,
    time::{Clock, TestClock},
};
use courier_delivery::{
    storage::{EventLock, StoreFuture},
    sweep::{RETENTION_SWEEP, RETRY_SWEEP},
    DeliveryError, DeliveryStore, Dispatcher, InMemoryDeliveryStore, RecordingSender,
    RetentionConfig, RetentionSweep, RetryPolicy, RetrySweep, RetrySweepConfig,
};
use serde_json::json;

const HOUR: u64 = 60 * 60;

struct Harness {
    dispatcher: Arc<Dispatcher>,
    store: InMemoryDeliveryStore,
    sender: RecordingSender,
    clock: TestClock,
}

impl Harness {
    fn new() -> Self {
        let store = InMemoryDeliveryStore::new();
        let sender = RecordingSender::new();
        let clock = TestClock::new();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(sender.clone()),
            RetryPolicy::default(),
            Arc::new(clock.clone()),
        ));
        Self { dispatcher, store, sender, clock }
    }

    fn retry_sweep(&self) -> RetrySweep {
        RetrySweep::new(self.dispatcher.clone(), RetrySweepConfig::default())
    }

    fn retention_sweep(&self, config: RetentionConfig) -> RetentionSweep {
        RetentionSweep::new(Arc::new(self.store.clone()), Arc::new(self.clock.clone()), config)
    }

    fn ago(&self, secs: u64) -> DateTime<Utc> {
        self.clock.now() - chrono::Duration::seconds(i64::try_from(secs).unwrap())
    }

    async fn seed(&self, org_id: OrgId, created_at: DateTime<Utc>, status: EventStatus) -> Event {
        let mut event = NewEvent::for_webhook(
            org_id,
            Some(EndpointConfig::new("https://example.com/hook")),
            json!({"name": "Ben"}),
        )
        .into_event(EventId::new(), created_at);
        event.status = status;
        if status != EventStatus::Pending {
            event.attempt_count = 1;
        }
        self.store.seed_event(event.clone()).await;
        if status != EventStatus::Pending {
            self.store
                .seed_result(result(org_id, Association::Event(event.id), 500, created_at))
                .await;
        }
        event
    }
}

fn result(
    org_id: OrgId,
    association: Association,
    status_code: i32,
    created_at: DateTime<Utc>,
) -> DeliveryResult {
    NewDeliveryResult {
        org_id,
        association,
        status_code,
        body: String::new(),
        request_dump: String::new(),
        response_dump: String::new(),
        latency_ms: 1.0,
    }
    .into_result(DeliveryResultId::new(), created_at)
}

fn retention(all_after_hours: u64) -> RetentionConfig {
    RetentionConfig {
        success_after: Duration::from_secs(all_after_hours * HOUR),
        all_after: Duration::from_secs(all_after_hours * HOUR),
        ..RetentionConfig::default()
    }
}

#[tokio::test]
async fn retry_sweep_dispatches_due_and_abandoned_events() {
    let h = Harness::new();
    let org = OrgId::new();

    let mut due = h.seed(org, h.ago(600), EventStatus::Errored).await;
    due.next_attempt = Some(h.ago(60));
    h.store.seed_event(due.clone()).await;

    let mut not_due = h.seed(org, h.ago(600), EventStatus::Errored).await;
    not_due.next_attempt = Some(h.clock.now() + chrono::Duration::minutes(3));
    h.store.seed_event(not_due.clone()).await;

    let abandoned = h.seed(org, h.ago(6 * 60), EventStatus::Pending).await;
    let fresh = h.seed(org, h.ago(60), EventStatus::Pending).await;
    let completed = h.seed(org, h.ago(HOUR), EventStatus::Completed).await;

    let report = h.retry_sweep().run().await.unwrap();

    assert!(!report.skipped);
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(h.sender.request_count().await, 2);

    let due = h.store.event(due.id).await.unwrap();
    assert_eq!((due.status, due.attempt_count), (EventStatus::Completed, 2));
    let abandoned = h.store.event(abandoned.id).await.unwrap();
    assert_eq!(abandoned.status, EventStatus::Completed);

    assert_eq!(h.store.event(not_due.id).await.unwrap().status, EventStatus::Errored);
    assert_eq!(h.store.event(fresh.id).await.unwrap().status, EventStatus::Pending);
    assert_eq!(h.store.event(completed.id).await.unwrap().attempt_count, 1);
}

#[tokio::test]
async fn retry_sweep_is_idempotent_for_final_events() {
    let h = Harness::new();
    let org = OrgId::new();
    let mut due = h.seed(org, h.ago(600), EventStatus::Errored).await;
    due.next_attempt = Some(h.ago(60));
    h.store.seed_event(due.clone()).await;

    h.retry_sweep().run().await.unwrap();
    let second = h.retry_sweep().run().await.unwrap();

    assert_eq!(second.dispatched, 0);
    assert_eq!(h.sender.request_count().await, 1);
}

#[tokio::test]
async fn retry_sweep_counts_locked_events_as_busy() {
    let h = Harness::new();
    let abandoned = h.seed(OrgId::new(), h.ago(HOUR), EventStatus::Pending).await;

    let _held = h.store.hold_lock(abandoned.id).await;
    let report = h.retry_sweep().run().await.unwrap();

    assert_eq!(report.busy, 1);
    assert_eq!(report.dispatched, 0);
    assert_eq!(h.sender.request_count().await, 0);
}

#[tokio::test]
async fn sweep_is_skipped_while_another_process_holds_the_lease() {
    let h = Harness::new();
    h.seed(OrgId::new(), h.ago(HOUR), EventStatus::Pending).await;

    let now = h.clock.now();
    let claimed = h
        .store
        .try_acquire_sweep(RETRY_SWEEP, "another-process", now, now + chrono::Duration::minutes(10))
        .await
        .unwrap();
    assert!(claimed);

    let report = h.retry_sweep().run().await.unwrap();
    assert!(report.skipped);
    assert_eq!(h.sender.request_count().await, 0);

    h.clock.advance(Duration::from_secs(11 * 60));
    let report = h.retry_sweep().run().await.unwrap();
    assert!(!report.skipped);
    assert_eq!(report.dispatched, 1);
}

#[tokio::test]
async fn retention_deletes_records_past_the_all_tier() {
    let h = Harness::new();
    let org = OrgId::new();
    let old = h.seed(org, h.ago(5 * HOUR), EventStatus::Errored).await;

    let report = h.retention_sweep(retention(12)).run().await.unwrap();
    assert_eq!(report.events_deleted, 0);
    assert!(h.store.event(old.id).await.is_some());
    assert_eq!(h.store.results().await.len(), 1);

    let report = h.retention_sweep(retention(2)).run().await.unwrap();
    assert_eq!(report.events_deleted, 1);
    assert!(h.store.event(old.id).await.is_none());
    assert!(h.store.results().await.is_empty());
}

#[tokio::test]
async fn success_tier_only_removes_completed_events() {
    let h = Harness::new();
    let org = OrgId::new();
    let completed = h.seed(org, h.ago(5 * HOUR), EventStatus::Completed).await;
    let failed = h.seed(org, h.ago(5 * HOUR), EventStatus::Failed).await;

    let config = RetentionConfig {
        success_after: Duration::from_secs(2 * HOUR),
        all_after: Duration::from_secs(48 * HOUR),
        ..RetentionConfig::default()
    };
    let report = h.retention_sweep(config).run().await.unwrap();

    assert_eq!(report.events_deleted, 1);
    assert!(h.store.event(completed.id).await.is_none());
    assert!(h.store.event(failed.id).await.is_some());
}

#[tokio::test]
async fn standalone_logs_follow_the_same_tiers() {
    let h = Harness::new();
    let org = OrgId::new();
    let classifier = Association::Classifier(ClassifierId::new());
    h.store.seed_result(result(org, classifier, 200, h.ago(5 * HOUR))).await;
    h.store.seed_result(result(org, classifier, 500, h.ago(5 * HOUR))).await;
    h.store.seed_result(result(org, Association::None, 200, h.ago(HOUR))).await;

    let config = RetentionConfig {
        success_after: Duration::from_secs(2 * HOUR),
        all_after: Duration::from_secs(48 * HOUR),
        ..RetentionConfig::default()
    };
    let report = h.retention_sweep(config).run().await.unwrap();

    assert_eq!(report.results_deleted, 1);
    let remaining: Vec<i32> = h.store.results().await.iter().map(|r| r.status_code).collect();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.contains(&500));
}

#[tokio::test]
async fn organization_overrides_replace_default_tiers() {
    let h = Harness::new();
    let strict = OrgId::new();
    let default = OrgId::new();
    h.store
        .set_retention(OrgRetention {
            org_id: strict,
            success_after_secs: 3600,
            all_after_secs: 3600,
        })
        .await;

    let strict_event = h.seed(strict, h.ago(5 * HOUR), EventStatus::Errored).await;
    let default_event = h.seed(default, h.ago(5 * HOUR), EventStatus::Errored).await;

    let report = h.retention_sweep(retention(24)).run().await.unwrap();

    assert_eq!(report.events_deleted, 1);
    assert!(h.store.event(strict_event.id).await.is_none());
    assert!(h.store.event(default_event.id).await.is_some());
}

#[tokio::test]
async fn retention_deletes_in_batches_until_done() {
    let h = Harness::new();
    let org = OrgId::new();
    for _ in 0..5 {
        h.seed(org, h.ago(5 * HOUR), EventStatus::Errored).await;
    }

    let config = RetentionConfig { batch_size: 2, ..retention(2) };
    let report = h.retention_sweep(config).run().await.unwrap();

    assert_eq!(report.events_deleted, 5);
    assert!(h.store.events().await.is_empty());
}

#[tokio::test]
async fn retention_skips_events_being_dispatched() {
    let h = Harness::new();
    let org = OrgId::new();
    let in_flight = h.seed(org, h.ago(5 * HOUR), EventStatus::Errored).await;

    let held = h.store.hold_lock(in_flight.id).await;
    let report = h.retention_sweep(retention(2)).run().await.unwrap();
    assert_eq!(report.events_deleted, 0);

    drop(held);
    let report = h.retention_sweep(retention(2)).run().await.unwrap();
    assert_eq!(report.events_deleted, 1);
}

/// Store whose first deleting event trim stalls past the sweep lease, letting
/// another process take it over.
struct StallingStore {
    inner: InMemoryDeliveryStore,
    clock: TestClock,
    stalled: AtomicBool,
}

impl DeliveryStore for StallingStore {
    fn create_event(&self, event: Event) -> StoreFuture<'_, ()> {
        self.inner.create_event(event)
    }

    fn find_event(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>> {
        self.inner.find_event(event_id)
    }

    fn lock_event(&self, event_id: EventId) -> StoreFuture<'_, EventLock> {
        self.inner.lock_event(event_id)
    }

    fn insert_delivery_result(&self, result: DeliveryResult) -> StoreFuture<'_, ()> {
        self.inner.insert_delivery_result(result)
    }

    fn find_delivery_results(&self, event_id: EventId) -> StoreFuture<'_, Vec<DeliveryResult>> {
        self.inner.find_delivery_results(event_id)
    }

    fn find_classifier_results(
        &self,
        classifier_id: ClassifierId,
    ) -> StoreFuture<'_, Vec<DeliveryResult>> {
        self.inner.find_classifier_results(classifier_id)
    }

    fn create_subscription(&self, subscription: Subscription) -> StoreFuture<'_, ()> {
        self.inner.create_subscription(subscription)
    }

    fn active_subscriptions(
        &self,
        org_id: OrgId,
        topic: String,
    ) -> StoreFuture<'_, Vec<Subscription>> {
        self.inner.active_subscriptions(org_id, topic)
    }

    fn deactivate_subscription(&self, subscription_id: SubscriptionId) -> StoreFuture<'_, bool> {
        self.inner.deactivate_subscription(subscription_id)
    }

    fn retry_candidates(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<EventId>> {
        self.inner.retry_candidates(now, pending_before, limit)
    }

    fn retention_overrides(&self) -> StoreFuture<'_, Vec<OrgRetention>> {
        self.inner.retention_overrides()
    }

    fn trim_events(
        &self,
        scope: OrgScope,
        cutoff: DateTime<Utc>,
        only_completed: bool,
        batch_size: usize,
    ) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let deleted =
                self.inner.trim_events(scope, cutoff, only_completed, batch_size).await?;
            if deleted > 0 && !self.stalled.swap(true, Ordering::SeqCst) {
                self.clock.advance(Duration::from_secs(61));
                let now = self.clock.now();
                let taken = self
                    .inner
                    .try_acquire_sweep(
                        RETENTION_SWEEP,
                        "another-process",
                        now,
                        now + chrono::Duration::minutes(10),
                    )
                    .await?;
                assert!(taken);
            }
            Ok(deleted)
        })
    }

    fn trim_standalone_results(
        &self,
        scope: OrgScope,
        cutoff: DateTime<Utc>,
        only_success: bool,
        batch_size: usize,
    ) -> StoreFuture<'_, u64> {
        self.inner.trim_standalone_results(scope, cutoff, only_success, batch_size)
    }

    fn try_acquire_sweep<'a>(
        &'a self,
        name: &'a str,
        holder: &'a str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreFuture<'a, bool> {
        self.inner.try_acquire_sweep(name, holder, now, expires_at)
    }

    fn release_sweep<'a>(
        &'a self,
        name: &'a str,
        holder: &'a str,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, ()> {
        self.inner.release_sweep(name, holder, now)
    }
}

#[tokio::test]
async fn retention_stops_when_its_lease_is_taken_over() {
    let h = Harness::new();
    let org = OrgId::new();
    for _ in 0..3 {
        h.seed(org, h.ago(5 * HOUR), EventStatus::Errored).await;
    }

    let store = StallingStore {
        inner: h.store.clone(),
        clock: h.clock.clone(),
        stalled: AtomicBool::new(false),
    };
    let config = RetentionConfig {
        batch_size: 1,
        lease_duration: Duration::from_secs(60),
        ..retention(2)
    };
    let sweep = RetentionSweep::new(Arc::new(store), Arc::new(h.clock.clone()), config);

    let err = sweep.run().await.unwrap_err();

    assert!(matches!(err, DeliveryError::LeaseLost { ref sweep } if sweep == RETENTION_SWEEP));
    assert_eq!(h.store.events().await.len(), 2);
}

