//! Outbound event delivery with retry scheduling and log retention.
//!
//! This crate takes logical events, performs the outbound HTTP call, records
//! an immutable audit result for every attempt, and schedules retries with
//! exponential backoff until the event completes or exhausts its attempts.
//! Periodic sweeps re-dispatch due events and trim old records.
//!
//! # Architecture
//!
//! Components, leaves first:
//!
//! 1. **Transport** - executes one request, captures the wire-level dump
//! 2. **Recorder** - persists one `DeliveryResult` per attempt, best-effort
//! 3. **Retry policy** - decides Completed, Errored with a next attempt, or
//!    Failed
//! 4. **Dispatcher** - owns the event state machine under a per-event lock
//! 5. **Sweeps** - retry and retention jobs behind a non-overlap guard
//!
//! # Key Features
//!
//! - **Injected sender** - production uses `HttpTransport`, tests use
//!   `RecordingSender`
//! - **Per-event locking** - `FOR NO KEY UPDATE SKIP LOCKED`, a locked event
//!   is reported busy instead of waited on
//! - **Bounded retries** - 3 attempts, 5 minute base delay doubling per
//!   attempt with ±20% jitter
//! - **Batched retention** - two tiers with per-organization overrides
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use courier_core::{models::OrgId, storage::Storage, time::RealClock};
//! use courier_delivery::{
//!     Dispatcher, DeliveryError, HttpTransport, PostgresDeliveryStore, RetryPolicy,
//! };
//! use serde_json::json;
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool, org_id: OrgId) -> std::result::Result<(), DeliveryError> {
//! let store = Arc::new(PostgresDeliveryStore::new(Arc::new(Storage::new(pool))));
//! let sender = Arc::new(HttpTransport::with_defaults()?);
//! let dispatcher =
//!     Dispatcher::new(store, sender, RetryPolicy::default(), Arc::new(RealClock::new()));
//!
//! for outcome in dispatcher.fire("new-contact", org_id, json!({"name": "Ben"})).await? {
//!     if let Some(extra) = outcome.json() {
//!         println!("endpoint returned {extra}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod dispatch;
pub mod error;
pub mod recorder;
pub mod retry;
pub mod scheduler;
pub mod sender;
pub mod storage;
pub mod sweep;
pub mod transport;

pub use classifier::{ClassifierCredentials, ClassifierSync, Intent, IntentProvider, LoggedHttp};
pub use dispatch::{DispatchOutcome, Dispatcher, Disposition};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use recorder::ResultRecorder;
pub use retry::{apply_jitter, RetryDecision, RetryPolicy};
pub use scheduler::{SchedulerConfig, SweepScheduler};
pub use sender::{recording::RecordingSender, Sender};
pub use storage::{memory::InMemoryDeliveryStore, DeliveryStore, PostgresDeliveryStore};
pub use sweep::{
    RetentionConfig, RetentionSweep, RetrySweep, RetrySweepConfig, Sweep, SweepGuard,
    SweepReport,
};
pub use transport::{
    parse_request_dump, HttpTransport, RequestBody, TransportConfig, TransportRequest,
    TransportResult,
};

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Delivery attempts per event, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay before the first retry, in seconds.
pub const RETRY_BASE_DELAY_SECONDS: u64 = 300;

/// Backoff randomization, as a fraction of the delay.
pub const JITTER_FACTOR: f64 = 0.2;

/// Age after which a never-attempted Pending event is picked up by the retry
/// sweep, in seconds.
pub const PENDING_GRACE_SECONDS: u64 = 300;

/// Rows deleted per retention statement.
pub const TRIM_BATCH_SIZE: usize = 1000;
