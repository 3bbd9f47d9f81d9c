//! Schema bootstrap.
//!
//! Statements are idempotent and run in order at service start.

use sqlx::PgPool;

use crate::error::Result;

const STATEMENTS: &[(&str, &str)] = &[
    (
        "subscriptions",
        r#"
        CREATE TABLE IF NOT EXISTS subscriptions (
            id UUID PRIMARY KEY,
            org_id UUID NOT NULL,
            topic TEXT NOT NULL,
            target_url TEXT NOT NULL,
            body_encoding TEXT NOT NULL DEFAULT 'form',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "events",
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id UUID PRIMARY KEY,
            org_id UUID NOT NULL,
            subscription_id UUID REFERENCES subscriptions(id),
            topic TEXT,
            endpoint JSONB,
            payload JSONB NOT NULL,
            status TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0 CHECK (attempt_count >= 0),
            next_attempt TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "delivery_results",
        r#"
        CREATE TABLE IF NOT EXISTS delivery_results (
            id UUID PRIMARY KEY,
            org_id UUID NOT NULL,
            event_id UUID REFERENCES events(id) ON DELETE CASCADE,
            classifier_id UUID,
            channel_id UUID,
            status_code INTEGER NOT NULL,
            body TEXT NOT NULL,
            request_dump TEXT NOT NULL,
            response_dump TEXT NOT NULL,
            latency_ms DOUBLE PRECISION NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CHECK (num_nonnulls(event_id, classifier_id, channel_id) <= 1)
        )
        "#,
    ),
    (
        "org_retention",
        r#"
        CREATE TABLE IF NOT EXISTS org_retention (
            org_id UUID PRIMARY KEY,
            success_after_secs BIGINT NOT NULL CHECK (success_after_secs > 0),
            all_after_secs BIGINT NOT NULL CHECK (all_after_secs > 0)
        )
        "#,
    ),
    (
        "sweep_leases",
        r#"
        CREATE TABLE IF NOT EXISTS sweep_leases (
            name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "idx_subscriptions_org_topic",
        r#"
        CREATE INDEX IF NOT EXISTS idx_subscriptions_org_topic
        ON subscriptions(org_id, topic)
        WHERE is_active
        "#,
    ),
    (
        "idx_events_status",
        r#"
        CREATE INDEX IF NOT EXISTS idx_events_status
        ON events(status, next_attempt)
        WHERE status IN ('pending', 'errored')
        "#,
    ),
    (
        "idx_events_created",
        "CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at)",
    ),
    (
        "idx_delivery_results_created",
        "CREATE INDEX IF NOT EXISTS idx_delivery_results_created ON delivery_results(created_at)",
    ),
    (
        "idx_delivery_results_event",
        r#"
        CREATE INDEX IF NOT EXISTS idx_delivery_results_event
        ON delivery_results(event_id, created_at)
        WHERE event_id IS NOT NULL
        "#,
    ),
    (
        "idx_delivery_results_classifier",
        r#"
        CREATE INDEX IF NOT EXISTS idx_delivery_results_classifier
        ON delivery_results(classifier_id, created_at DESC)
        WHERE classifier_id IS NOT NULL
        "#,
    ),
];

/// Creates every table and index that does not exist yet.
///
/// # Errors
///
/// Returns `CoreError::Database` for the first statement that fails.
pub async fn bootstrap(pool: &PgPool) -> Result<()> {
    for (name, statement) in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
        tracing::debug!(object = *name, "schema object ensured");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referenced_tables_are_created_first() {
        let position = |name: &str| STATEMENTS.iter().position(|(n, _)| *n == name);

        assert!(position("subscriptions") < position("events"));
        assert!(position("events") < position("delivery_results"));
    }

    #[test]
    fn statements_are_idempotent() {
        for (name, statement) in STATEMENTS {
            assert!(statement.contains("IF NOT EXISTS"), "{name} is not idempotent");
        }
    }
}
