//! Database access layer implementing the repository pattern.
//!
//! Every repository shares one connection pool. Operations that must run
//! under a caller's transaction (the per-event dispatch lock) come in
//! `x()` / `x_in_tx()` pairs backed by a generic executor helper.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

pub mod delivery_results;
pub mod events;
pub mod retention;
pub mod schema;
pub mod subscriptions;
pub mod sweep_leases;

use crate::{error::Result, models::OrgId};

/// Container for all repository instances.
#[derive(Clone)]
pub struct Storage {
    /// Outbound events and their lifecycle state.
    pub events: Arc<events::Repository>,

    /// Immutable delivery attempt records and HTTP logs.
    pub delivery_results: Arc<delivery_results::Repository>,

    /// Topic subscriptions.
    pub subscriptions: Arc<subscriptions::Repository>,

    /// Per-organization retention overrides.
    pub retention: Arc<retention::Repository>,

    /// Leases that keep sweeps from overlapping across processes.
    pub sweep_leases: Arc<sweep_leases::Repository>,

    pool: Arc<PgPool>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            events: Arc::new(events::Repository::new(pool.clone())),
            delivery_results: Arc::new(delivery_results::Repository::new(pool.clone())),
            subscriptions: Arc::new(subscriptions::Repository::new(pool.clone())),
            retention: Arc::new(retention::Repository::new(pool.clone())),
            sweep_leases: Arc::new(sweep_leases::Repository::new(pool.clone())),
            pool,
        }
    }

    /// Shared connection pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Verifies the database answers a trivial query.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool).await?;
        Ok(())
    }
}

/// Which organizations a bulk operation touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgScope {
    /// A single organization.
    Only(OrgId),
    /// Every organization except the listed ones.
    Except(Vec<OrgId>),
}

impl OrgScope {
    /// Whether `org_id` falls inside this scope.
    pub fn contains(&self, org_id: OrgId) -> bool {
        match self {
            Self::Only(id) => *id == org_id,
            Self::Except(excluded) => !excluded.contains(&org_id),
        }
    }

    /// Bind values for `($n::uuid IS NULL OR org_id = $n) AND NOT (org_id = ANY($m))`.
    pub(crate) fn bind_values(&self) -> (Option<Uuid>, Vec<Uuid>) {
        match self {
            Self::Only(id) => (Some(id.0), Vec::new()),
            Self::Except(excluded) => (None, excluded.iter().map(|id| id.0).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_can_be_created() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let _storage = Storage::new(pool);
    }

    #[test]
    fn org_scope_membership() {
        let a = OrgId::new();
        let b = OrgId::new();

        assert!(OrgScope::Only(a).contains(a));
        assert!(!OrgScope::Only(a).contains(b));
        assert!(OrgScope::Except(vec![a]).contains(b));
        assert!(!OrgScope::Except(vec![a]).contains(a));
    }

    #[test]
    fn org_scope_bind_values() {
        let a = OrgId::new();
        assert_eq!(OrgScope::Only(a).bind_values(), (Some(a.0), Vec::new()));
        assert_eq!(OrgScope::Except(vec![a]).bind_values(), (None, vec![a.0]));
    }
}
