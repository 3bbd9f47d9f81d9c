//! Repository for sweep leases.
//!
//! A lease row per sweep kind names the process currently running it and
//! when that claim lapses. A crashed holder blocks the sweep only until its
//! lease expires.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;

/// Repository for sweep lease operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Claims the lease for `name` unless another holder has an unexpired
    /// claim. Returns whether `holder` now owns it.
    ///
    /// # Errors
    ///
    /// Returns error if the upsert fails.
    pub async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO sweep_leases (name, holder, expires_at)
            VALUES ($1, $2, $4)
            ON CONFLICT (name) DO UPDATE
            SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
            WHERE sweep_leases.expires_at <= $3 OR sweep_leases.holder = EXCLUDED.holder
            RETURNING holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&*self.pool)
        .await?;

        if claimed.is_none() {
            tracing::debug!(sweep = name, holder, "sweep lease held elsewhere");
        }

        Ok(claimed.is_some())
    }

    /// Gives the lease back early. A lease held by someone else is untouched.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn release(&self, name: &str, holder: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sweep_leases SET expires_at = $3 WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .bind(now)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }
}
