//! Repository for delivery results and standalone HTTP logs.
//!
//! Rows are immutable: there is no update path, only inserts and the
//! retention deletes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};

use super::OrgScope;
use crate::{
    error::Result,
    models::{ClassifierId, DeliveryResult, DeliveryResultId, EventId},
};

const RESULT_COLUMNS: &str = "id, org_id, event_id, classifier_id, channel_id, status_code, \
                              body, request_dump, response_dump, latency_ms, created_at";

/// Repository for delivery result operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts a delivery result.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails or the owning row does not exist.
    pub async fn create(&self, result: &DeliveryResult) -> Result<DeliveryResultId> {
        self.create_impl(&*self.pool, result).await
    }

    /// Inserts a delivery result within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        result: &DeliveryResult,
    ) -> Result<DeliveryResultId> {
        self.create_impl(&mut **tx, result).await
    }

    async fn create_impl<'e, E>(&self, executor: E, result: &DeliveryResult) -> Result<DeliveryResultId>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO delivery_results (
                id, org_id, event_id, classifier_id, channel_id, status_code,
                body, request_dump, response_dump, latency_ms, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
            )
            RETURNING id
            "#,
        )
        .bind(result.id)
        .bind(result.org_id)
        .bind(result.association.event_id())
        .bind(result.association.classifier_id())
        .bind(result.association.channel_id())
        .bind(result.status_code)
        .bind(&result.body)
        .bind(&result.request_dump)
        .bind(&result.response_dump)
        .bind(result.latency_ms)
        .bind(result.created_at)
        .fetch_one(executor)
        .await?;

        Ok(DeliveryResultId(id))
    }

    /// Finds all results for an event, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_event(&self, event_id: EventId) -> Result<Vec<DeliveryResult>> {
        let results = sqlx::query_as::<_, DeliveryResult>(&format!(
            "SELECT {RESULT_COLUMNS} FROM delivery_results WHERE event_id = $1 \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(event_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(results)
    }

    /// Finds all HTTP logs recorded while syncing a classifier, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_classifier(
        &self,
        classifier_id: ClassifierId,
    ) -> Result<Vec<DeliveryResult>> {
        let results = sqlx::query_as::<_, DeliveryResult>(&format!(
            "SELECT {RESULT_COLUMNS} FROM delivery_results WHERE classifier_id = $1 \
             ORDER BY created_at DESC"
        ))
        .bind(classifier_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(results)
    }

    /// Counts results recorded for an event.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn count_by_event(&self, event_id: EventId) -> Result<i64> {
        let count =
            sqlx::query_scalar("SELECT COUNT(*) FROM delivery_results WHERE event_id = $1")
                .bind(event_id)
                .fetch_one(&*self.pool)
                .await?;

        Ok(count)
    }

    /// Deletes one batch of results without a parent event.
    ///
    /// Results owned by events are removed through the event cascade so an
    /// event never loses part of its history. With `only_success` only 2xx
    /// logs are removed.
    ///
    /// # Errors
    ///
    /// Returns error if delete fails.
    pub async fn delete_standalone_batch_before(
        &self,
        scope: &OrgScope,
        cutoff: DateTime<Utc>,
        only_success: bool,
        batch_size: i64,
    ) -> Result<u64> {
        let (only_org, excluded) = scope.bind_values();

        let result = sqlx::query(
            r#"
            WITH doomed AS (
                SELECT id FROM delivery_results
                WHERE event_id IS NULL
                  AND created_at < $1
                  AND ($2 = FALSE OR status_code BETWEEN 200 AND 299)
                  AND ($3::uuid IS NULL OR org_id = $3)
                  AND NOT (org_id = ANY($4))
                ORDER BY created_at ASC
                LIMIT $5
            )
            DELETE FROM delivery_results r USING doomed WHERE r.id = doomed.id
            "#,
        )
        .bind(cutoff)
        .bind(only_success)
        .bind(only_org)
        .bind(&excluded)
        .bind(batch_size)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
