//! Repository for topic subscriptions.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{OrgId, Subscription, SubscriptionId},
};

/// Repository for subscription operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts a subscription.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn create(&self, subscription: &Subscription) -> Result<SubscriptionId> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO subscriptions (id, org_id, topic, target_url, body_encoding, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.org_id)
        .bind(&subscription.topic)
        .bind(&subscription.target_url)
        .bind(subscription.body_encoding)
        .bind(subscription.is_active)
        .bind(subscription.created_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(SubscriptionId(id))
    }

    /// Finds the active subscriptions of an organization for a topic.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_active(&self, org_id: OrgId, topic: &str) -> Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, org_id, topic, target_url, body_encoding, is_active, created_at
            FROM subscriptions
            WHERE org_id = $1 AND topic = $2 AND is_active
            ORDER BY created_at ASC
            "#,
        )
        .bind(org_id)
        .bind(topic)
        .fetch_all(&*self.pool)
        .await?;

        Ok(subscriptions)
    }

    /// Soft-deletes a subscription. Returns false if it was already inactive
    /// or does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn deactivate(&self, subscription_id: SubscriptionId) -> Result<bool> {
        let result =
            sqlx::query("UPDATE subscriptions SET is_active = FALSE WHERE id = $1 AND is_active")
                .bind(subscription_id)
                .execute(&*self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
