//! Repository for outbound event database operations.
//!
//! Besides plain CRUD this provides the row lock taken before a dispatch
//! attempt, the retry sweep candidate query and batched retention deletes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::OrgScope;
use crate::{
    error::Result,
    models::{Event, EventId, EventUpdate},
};

const EVENT_COLUMNS: &str = "id, org_id, subscription_id, topic, endpoint, payload, status, \
                             attempt_count, next_attempt, created_at, updated_at";

/// Repository for event database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts a new event.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails or constraints are violated.
    pub async fn create(&self, event: &Event) -> Result<EventId> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO events (
                id, org_id, subscription_id, topic, endpoint, payload, status,
                attempt_count, next_attempt, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
            )
            RETURNING id
            "#,
        )
        .bind(event.id)
        .bind(event.org_id)
        .bind(event.subscription_id)
        .bind(&event.topic)
        .bind(&event.endpoint)
        .bind(&event.payload)
        .bind(event.status)
        .bind(event.attempt_count)
        .bind(event.next_attempt)
        .bind(event.created_at)
        .bind(event.updated_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(EventId(id))
    }

    /// Finds an event by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, event_id: EventId) -> Result<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(event_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Locks an event row for the duration of `tx`.
    ///
    /// Uses `FOR NO KEY UPDATE SKIP LOCKED`: a second dispatcher gets `None`
    /// instead of waiting, while inserts of delivery results referencing the
    /// row are not blocked. `None` is also returned when the row is missing.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn lock_for_dispatch_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_id: EventId,
    ) -> Result<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR NO KEY UPDATE SKIP LOCKED"
        ))
        .bind(event_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(event)
    }

    /// Persists the state produced by a dispatch attempt under the event's
    /// lock transaction.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn update_state_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_id: EventId,
        update: &EventUpdate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE events
            SET status = $1, attempt_count = $2, next_attempt = $3, updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(update.status)
        .bind(update.attempt_count)
        .bind(update.next_attempt)
        .bind(now)
        .bind(event_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Finds events the retry sweep should dispatch.
    ///
    /// Selects Errored events whose `next_attempt` has passed and Pending
    /// events created before `pending_before` that were never attempted,
    /// oldest due first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_retry_candidates(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<EventId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM events
            WHERE (status = 'errored' AND next_attempt <= $1)
               OR (status = 'pending' AND created_at <= $2)
            ORDER BY COALESCE(next_attempt, created_at) ASC
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(pending_before)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(ids.into_iter().map(EventId).collect())
    }

    /// Deletes one batch of events created before `cutoff`.
    ///
    /// With `only_completed` only Completed events are removed. Delivery
    /// results cascade with their event. Rows locked by an in-flight
    /// dispatch are skipped and picked up by a later batch.
    ///
    /// # Errors
    ///
    /// Returns error if delete fails.
    pub async fn delete_batch_before(
        &self,
        scope: &OrgScope,
        cutoff: DateTime<Utc>,
        only_completed: bool,
        batch_size: i64,
    ) -> Result<u64> {
        let (only_org, excluded) = scope.bind_values();

        let result = sqlx::query(
            r#"
            WITH doomed AS (
                SELECT id FROM events
                WHERE created_at < $1
                  AND ($2 = FALSE OR status = 'completed')
                  AND ($3::uuid IS NULL OR org_id = $3)
                  AND NOT (org_id = ANY($4))
                ORDER BY created_at ASC
                LIMIT $5
                FOR UPDATE SKIP LOCKED
            )
            DELETE FROM events e USING doomed WHERE e.id = doomed.id
            "#,
        )
        .bind(cutoff)
        .bind(only_completed)
        .bind(only_org)
        .bind(&excluded)
        .bind(batch_size)
        .execute(&*self.pool)
        .await?;

        tracing::debug!(
            deleted = result.rows_affected(),
            %cutoff,
            only_completed,
            "deleted event batch"
        );

        Ok(result.rows_affected())
    }
}
