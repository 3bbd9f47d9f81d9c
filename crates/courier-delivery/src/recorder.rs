//! Persists transport results as immutable delivery results.

use std::sync::Arc;

use courier_core::{
    models::{Association, DeliveryResult, DeliveryResultId, NewDeliveryResult, OrgId},
    time::Clock,
};
use tracing::{debug, warn};

use crate::{
    storage::{DeliveryStore, EventLease},
    transport::TransportResult,
};

/// Turns one transport result into one stored `DeliveryResult`.
///
/// Attempt results go through the event's lease; HTTP logs with no event go
/// straight to the store.
///
/// Recording is best-effort. A storage failure is logged and reported as
/// `None`; it never changes the delivery outcome the caller acts on.
#[derive(Clone)]
pub struct ResultRecorder {
    store: Arc<dyn DeliveryStore>,
    clock: Arc<dyn Clock>,
}

impl ResultRecorder {
    /// Creates a recorder writing to `store`.
    pub fn new(store: Arc<dyn DeliveryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Records `result` under `association`.
    ///
    /// The body is stored as received, whether or not it parses as JSON.
    pub async fn record(
        &self,
        result: &TransportResult,
        association: Association,
        org_id: OrgId,
    ) -> Option<DeliveryResult> {
        let record = self.build(result, association, org_id);
        let stored = self.store.insert_delivery_result(record.clone()).await;
        self.report(record, stored)
    }

    /// Records the result of an attempt on the leased event.
    ///
    /// The row is written through the lease and persists only if the lease
    /// commits.
    pub async fn record_attempt(
        &self,
        lease: &mut dyn EventLease,
        result: &TransportResult,
    ) -> Option<DeliveryResult> {
        let event = lease.event();
        let record = self.build(result, Association::Event(event.id), event.org_id);
        let stored = lease.record(record.clone()).await;
        self.report(record, stored)
    }

    fn build(
        &self,
        result: &TransportResult,
        association: Association,
        org_id: OrgId,
    ) -> DeliveryResult {
        NewDeliveryResult {
            org_id,
            association,
            status_code: i32::from(result.status_code),
            body: result.body.clone(),
            request_dump: result.request_dump.clone(),
            response_dump: result.response_dump.clone(),
            latency_ms: result.latency_ms,
        }
        .into_result(DeliveryResultId::new(), self.clock.now())
    }

    fn report(
        &self,
        record: DeliveryResult,
        stored: courier_core::error::Result<()>,
    ) -> Option<DeliveryResult> {
        match stored {
            Ok(()) => {
                debug!(
                    result_id = %record.id,
                    status_code = record.status_code,
                    latency_ms = record.latency_ms,
                    "delivery result recorded"
                );
                Some(record)
            },
            Err(e) => {
                warn!(
                    org_id = %record.org_id,
                    status_code = record.status_code,
                    error = %e,
                    "failed to record delivery result"
                );
                None
            },
        }
    }
}
