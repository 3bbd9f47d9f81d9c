//! Event dispatch state machine.
//!
//! Owns the lifecycle of one event across delivery attempts:
//!
//! ```text
//! Pending --attempt--> Completed | Errored | Failed
//! Errored --retry----> Completed | Errored | Failed
//! ```
//!
//! Every attempt runs under the per-event lock. The transport result is
//! recorded through the lock (best-effort), then the retry policy computes the
//! new state, which is committed together with the result. Completed and
//! Failed events are never attempted again.

use std::sync::Arc;

use courier_core::{
    models::{
        validate_topic, BodyEncoding, DeliveryResult, EndpointConfig, Event,
        EventId, EventStatus, EventUpdate, NewEvent, NewSubscription, OrgId, Subscription,
        SubscriptionId,
    },
    time::Clock,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    error::{DeliveryError, Result},
    recorder::ResultRecorder,
    retry::RetryPolicy,
    sender::Sender,
    storage::{DeliveryStore, EventLease, EventLock},
    transport::{RequestBody, TransportRequest, TransportResult},
};

/// Body recorded when an event has nowhere to go.
pub const NO_DESTINATION: &str = "no destination configured";

/// Body prefix recorded when an event's endpoint cannot be used.
pub const INVALID_DESTINATION: &str = "invalid destination";

/// How a dispatch call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A delivery attempt was made, or the event failed for lack of a
    /// destination.
    Attempted,
    /// The event was already Completed or Failed. Nothing changed.
    AlreadyFinal,
    /// Another dispatcher holds the event. Nothing changed.
    Busy,
}

/// Synchronous result of dispatching one event.
///
/// Retry bookkeeping is already persisted when this is returned; callers use
/// it only to react to the endpoint's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// Dispatched event.
    pub event_id: EventId,
    /// Event status after the call.
    pub status: EventStatus,
    /// Status code of this call's attempt, `Some(0)` without a response.
    pub status_code: Option<u16>,
    /// Response body of this call's attempt.
    pub body: Option<String>,
    /// Attempts made so far.
    pub attempt_count: u32,
    /// How the call ended.
    pub disposition: Disposition,
}

impl DispatchOutcome {
    fn unchanged(event: &Event, disposition: Disposition) -> Self {
        Self {
            event_id: event.id,
            status: event.status,
            status_code: None,
            body: None,
            attempt_count: event.attempts(),
            disposition,
        }
    }

    /// Outcome for an event another dispatcher currently holds.
    pub fn busy(event: &Event) -> Self {
        Self::unchanged(event, Disposition::Busy)
    }

    /// Whether the event was skipped because it was locked.
    pub fn is_busy(&self) -> bool {
        self.disposition == Disposition::Busy
    }

    /// Response body parsed as a JSON object or array.
    ///
    /// Scalars and unparsable bodies yield `None`; the delivery status is
    /// unaffected either way.
    pub fn json(&self) -> Option<Value> {
        let body = self.body.as_deref()?;
        match serde_json::from_str::<Value>(body) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
            _ => None,
        }
    }
}

/// Creates events and drives them through delivery attempts.
pub struct Dispatcher {
    store: Arc<dyn DeliveryStore>,
    sender: Arc<dyn Sender>,
    recorder: ResultRecorder,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        sender: Arc<dyn Sender>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let recorder = ResultRecorder::new(store.clone(), clock.clone());
        Self { store, sender, recorder, policy, clock }
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<dyn DeliveryStore> {
        &self.store
    }

    /// Clock used for every timestamp.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Retry policy applied after each attempt.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Registers a subscription.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTopic` for a malformed topic, `Configuration` for a
    /// malformed URL, or `Storage` if persisting fails.
    pub async fn create_subscription(&self, subscription: NewSubscription) -> Result<Subscription> {
        validate_topic(&subscription.topic)
            .map_err(|e| DeliveryError::invalid_topic(&subscription.topic, e.to_string()))?;
        subscription.validate()?;

        let subscription =
            subscription.into_subscription(SubscriptionId::new(), self.clock.now());
        self.store.create_subscription(subscription.clone()).await?;

        info!(
            subscription_id = %subscription.id,
            org_id = %subscription.org_id,
            topic = %subscription.topic,
            "subscription created"
        );
        Ok(subscription)
    }

    /// Soft-deletes a subscription. Returns whether it was active.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the update fails.
    pub async fn deactivate_subscription(&self, subscription_id: SubscriptionId) -> Result<bool> {
        let deactivated = self.store.deactivate_subscription(subscription_id).await?;
        if deactivated {
            info!(subscription_id = %subscription_id, "subscription deactivated");
        }
        Ok(deactivated)
    }

    /// Active subscriptions of an organization for a topic.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the query fails.
    pub async fn active_subscriptions(
        &self,
        org_id: OrgId,
        topic: &str,
    ) -> Result<Vec<Subscription>> {
        Ok(self.store.active_subscriptions(org_id, topic.to_string()).await?)
    }

    /// Results recorded for an event, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the query fails.
    pub async fn delivery_results(&self, event_id: EventId) -> Result<Vec<DeliveryResult>> {
        Ok(self.store.find_delivery_results(event_id).await?)
    }

    /// Creates and dispatches one event per active subscription of `topic`.
    ///
    /// A topic nobody subscribes to produces no events and an empty result.
    /// Subscribers are independent: one whose endpoint is unusable gets a
    /// Failed event with a status-0 result, and one whose event cannot be
    /// stored is logged and left out of the outcomes. Either way the other
    /// subscribers are still served.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTopic` for a malformed topic and `Storage` when the
    /// subscriptions cannot be loaded. Delivery failures are never errors.
    pub async fn fire(
        &self,
        topic: &str,
        org_id: OrgId,
        payload: Value,
    ) -> Result<Vec<DispatchOutcome>> {
        validate_topic(topic).map_err(|e| DeliveryError::invalid_topic(topic, e.to_string()))?;

        let subscriptions = self.store.active_subscriptions(org_id, topic.to_string()).await?;
        if subscriptions.is_empty() {
            debug!(org_id = %org_id, topic, "no active subscriptions, nothing to fire");
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::with_capacity(subscriptions.len());
        for subscription in &subscriptions {
            let event = NewEvent::for_subscription(subscription, payload.clone());
            match self.persist_and_dispatch(event).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(
                    subscription_id = %subscription.id,
                    org_id = %org_id,
                    topic,
                    error = %e,
                    "failed to fire event for subscription"
                ),
            }
        }

        Ok(outcomes)
    }

    /// Creates and dispatches a single event for a directly configured
    /// webhook.
    ///
    /// With no endpoint the event is still recorded, as Failed with one
    /// status-0 audit result.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an invalid endpoint and `Storage` when the
    /// event cannot be persisted.
    pub async fn fire_webhook(
        &self,
        org_id: OrgId,
        endpoint: Option<EndpointConfig>,
        payload: Value,
    ) -> Result<DispatchOutcome> {
        self.dispatch_event(NewEvent::for_webhook(org_id, endpoint, payload)).await
    }

    /// Persists a new event and makes its first attempt.
    ///
    /// If the process dies between the insert and the attempt, the retry
    /// sweep picks the Pending event up after the grace period.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the event is invalid and `Storage` if it
    /// cannot be persisted.
    pub async fn dispatch_event(&self, new_event: NewEvent) -> Result<DispatchOutcome> {
        new_event.validate()?;
        self.persist_and_dispatch(new_event).await
    }

    async fn persist_and_dispatch(&self, new_event: NewEvent) -> Result<DispatchOutcome> {
        let event = new_event.into_event(EventId::new(), self.clock.now());
        let event_id = event.id;
        self.store.create_event(event).await?;

        debug!(event_id = %event_id, "event created");
        self.dispatch(event_id).await
    }

    /// Performs one delivery attempt for an existing event.
    ///
    /// Completed and Failed events are left untouched. An event locked by
    /// another dispatcher is skipped and reported as busy.
    ///
    /// # Errors
    ///
    /// Returns `EventNotFound` for an unknown id and `Storage` if the lock or
    /// the state update fails.
    pub async fn dispatch(&self, event_id: EventId) -> Result<DispatchOutcome> {
        match self.store.lock_event(event_id).await? {
            EventLock::Acquired(lease) => self.attempt(lease).await,
            EventLock::Busy => {
                debug!(event_id = %event_id, "event locked by another dispatcher, skipping");
                let event = self
                    .store
                    .find_event(event_id)
                    .await?
                    .ok_or(DeliveryError::EventNotFound { event_id })?;
                Ok(DispatchOutcome::busy(&event))
            },
            EventLock::Missing => Err(DeliveryError::EventNotFound { event_id }),
        }
    }

    async fn attempt(&self, mut lease: Box<dyn EventLease>) -> Result<DispatchOutcome> {
        let event = lease.event().clone();

        if event.status.is_terminal() {
            info!(
                event_id = %event.id,
                status = event.status.as_str(),
                "event already final, dispatch is a no-op"
            );
            return Ok(DispatchOutcome::unchanged(&event, Disposition::AlreadyFinal));
        }

        let endpoint = match event.endpoint() {
            Some(endpoint) => match endpoint.validate() {
                Ok(()) => endpoint.clone(),
                Err(e) => {
                    let reason = format!("{INVALID_DESTINATION}: {e}");
                    return self.fail_unresolvable(lease, &event, reason).await;
                },
            },
            None => return self.fail_unresolvable(lease, &event, NO_DESTINATION.to_string()).await,
        };

        // 1. Send
        let request = build_request(&endpoint, &event.payload.0);
        let result = self.sender.send(request).await;
        let attempt_count = event.attempts().saturating_add(1);

        // 2. Record, best-effort
        self.recorder.record_attempt(lease.as_mut(), &result).await;

        // 3. Compute and persist the new state
        let now = self.clock.now();
        let update = self.policy.next_state(result.status_code, attempt_count, now);
        lease.commit(update, now).await?;

        if result.status_code == 410 {
            self.deactivate_gone_subscription(&event).await;
        }

        info!(
            event_id = %event.id,
            status_code = result.status_code,
            attempt = attempt_count,
            latency_ms = result.latency_ms,
            status = update.status.as_str(),
            next_attempt = ?update.next_attempt,
            "delivery attempt finished"
        );

        Ok(DispatchOutcome {
            event_id: event.id,
            status: update.status,
            status_code: Some(result.status_code),
            body: Some(result.body),
            attempt_count,
            disposition: Disposition::Attempted,
        })
    }

    async fn fail_unresolvable(
        &self,
        mut lease: Box<dyn EventLease>,
        event: &Event,
        reason: String,
    ) -> Result<DispatchOutcome> {
        let result = TransportResult::no_response(reason, String::new(), 0.0);
        self.recorder.record_attempt(lease.as_mut(), &result).await;

        let update = EventUpdate {
            status: EventStatus::Failed,
            attempt_count: event.attempt_count,
            next_attempt: None,
        };
        lease.commit(update, self.clock.now()).await?;

        warn!(
            event_id = %event.id,
            org_id = %event.org_id,
            reason = %result.body,
            "event destination unusable, marked failed"
        );

        Ok(DispatchOutcome {
            event_id: event.id,
            status: EventStatus::Failed,
            status_code: Some(0),
            body: Some(result.body),
            attempt_count: event.attempts(),
            disposition: Disposition::Attempted,
        })
    }

    async fn deactivate_gone_subscription(&self, event: &Event) {
        let Some(subscription_id) = event.subscription_id else {
            return;
        };

        match self.store.deactivate_subscription(subscription_id).await {
            Ok(true) => info!(
                subscription_id = %subscription_id,
                event_id = %event.id,
                "endpoint answered 410, subscription deactivated"
            ),
            Ok(false) => {},
            Err(e) => warn!(
                subscription_id = %subscription_id,
                error = %e,
                "failed to deactivate subscription after 410"
            ),
        }
    }
}

/// Builds the outbound request for an event.
///
/// GET and DELETE carry no body. Other methods send the payload form-encoded
/// or as JSON according to the endpoint.
pub fn build_request(endpoint: &EndpointConfig, payload: &Value) -> TransportRequest {
    let body = if !endpoint.method.carries_body() {
        RequestBody::Empty
    } else {
        match endpoint.body_encoding {
            BodyEncoding::Form => RequestBody::Form(form_fields(payload)),
            BodyEncoding::Json => RequestBody::Json(payload.clone()),
        }
    };

    let mut request = TransportRequest::new(endpoint.method, endpoint.url.clone()).with_body(body);
    request.headers.clone_from(&endpoint.headers);
    request
}

/// Flattens a payload into form fields.
///
/// Object members become fields; strings are sent bare, null as an empty
/// value and anything else as JSON text. A non-object payload is sent as a
/// single `payload` field.
fn form_fields(payload: &Value) -> Vec<(String, String)> {
    match payload {
        Value::Object(members) => {
            members.iter().map(|(name, value)| (name.clone(), form_value(value))).collect()
        },
        Value::Null => Vec::new(),
        other => vec![("payload".to_string(), other.to_string())],
    }
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
