//! Error types for delivery operations.
//!
//! HTTP failures are not errors here: a refused connection or a 500 response
//! is a delivery condition resolved inside the dispatch state machine and
//! recorded as a result. The variants below are what escapes to callers:
//! persistence failures, misconfiguration and lifecycle problems.

use std::{fmt, time::Duration};

use courier_core::{error::CoreError, models::EventId};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors surfaced by the delivery engine.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Persisting or loading state failed.
    #[error("storage error: {message}")]
    Storage {
        /// Storage error message
        message: String,
    },

    /// Endpoint, subscription or engine configuration is invalid.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// A topic passed to `fire` is not a valid slug.
    #[error("invalid topic {topic:?}: {reason}")]
    InvalidTopic {
        /// Rejected topic
        topic: String,
        /// Why it was rejected
        reason: String,
    },

    /// Dispatch was requested for an event that does not exist.
    #[error("event {event_id} not found")]
    EventNotFound {
        /// Missing event
        event_id: EventId,
    },

    /// A classifier provider failed to return intents.
    #[error("{provider} sync failed: {message}")]
    Sync {
        /// Provider name
        provider: String,
        /// Failure description
        message: String,
    },

    /// Background sweeps did not stop within the shutdown timeout.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },

    /// Another process took over a sweep lease mid-run.
    #[error("sweep {sweep} lost its lease")]
    LeaseLost {
        /// Sweep name
        sweep: String,
    },

    /// A spawned sweep or dispatch task panicked.
    #[error("task {task} panicked: {error}")]
    TaskPanic {
        /// Task name
        task: String,
        /// Join error description
        error: String,
    },

    /// Unexpected internal error.
    #[error("internal delivery error: {message}")]
    Internal {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an invalid topic error.
    pub fn invalid_topic(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTopic { topic: topic.into(), reason: reason.into() }
    }

    /// Creates a classifier sync error.
    pub fn sync(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sync { provider: provider.into(), message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether repeating the same call later may succeed.
    ///
    /// Storage hiccups and provider failures are transient. Bad input and
    /// lifecycle errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage { .. } | Self::Sync { .. } | Self::LeaseLost { .. } => true,

            Self::Configuration { .. }
            | Self::InvalidTopic { .. }
            | Self::EventNotFound { .. }
            | Self::ShutdownTimeout { .. }
            | Self::TaskPanic { .. }
            | Self::Internal { .. } => false,
        }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::InvalidInput(message) => Self::Configuration { message },
            other => Self::Storage { message: other.to_string() },
        }
    }
}

/// Category of delivery error for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Database operations.
    Storage,
    /// Rejected input or configuration.
    Validation,
    /// Third-party provider calls.
    Provider,
    /// Startup and shutdown.
    Lifecycle,
    /// Internal system errors.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::Storage { .. } | DeliveryError::EventNotFound { .. } => Self::Storage,
            DeliveryError::Configuration { .. } | DeliveryError::InvalidTopic { .. } => {
                Self::Validation
            },
            DeliveryError::Sync { .. } => Self::Provider,
            DeliveryError::ShutdownTimeout { .. }
            | DeliveryError::LeaseLost { .. }
            | DeliveryError::TaskPanic { .. } => Self::Lifecycle,
            DeliveryError::Internal { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage => write!(f, "storage"),
            Self::Validation => write!(f, "validation"),
            Self::Provider => write!(f, "provider"),
            Self::Lifecycle => write!(f, "lifecycle"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
