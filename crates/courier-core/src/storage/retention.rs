//! Repository for per-organization retention overrides.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{OrgId, OrgRetention},
};

/// Repository for retention override operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Lists every organization with its own retention tiers.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn list_overrides(&self) -> Result<Vec<OrgRetention>> {
        let overrides = sqlx::query_as::<_, OrgRetention>(
            "SELECT org_id, success_after_secs, all_after_secs FROM org_retention ORDER BY org_id",
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(overrides)
    }

    /// Creates or replaces an override.
    ///
    /// # Errors
    ///
    /// Returns error if the upsert fails.
    pub async fn upsert(&self, retention: &OrgRetention) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO org_retention (org_id, success_after_secs, all_after_secs)
            VALUES ($1, $2, $3)
            ON CONFLICT (org_id) DO UPDATE
            SET success_after_secs = EXCLUDED.success_after_secs,
                all_after_secs = EXCLUDED.all_after_secs
            "#,
        )
        .bind(retention.org_id)
        .bind(retention.success_after_secs)
        .bind(retention.all_after_secs)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Removes an override so the global default applies again.
    ///
    /// # Errors
    ///
    /// Returns error if delete fails.
    pub async fn remove(&self, org_id: OrgId) -> Result<()> {
        sqlx::query("DELETE FROM org_retention WHERE org_id = $1")
            .bind(org_id)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }
}
