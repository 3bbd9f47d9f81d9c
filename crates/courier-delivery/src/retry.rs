//! Exponential backoff retry scheduling with jitter.
//!
//! Given the status code of the attempt just made and the attempt count
//! including it, the policy decides whether the event is complete, should be
//! retried later, or has exhausted its attempts. Network failures arrive as
//! status code 0 and are treated like any other non-2xx response.

use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_core::models::{EventStatus, EventUpdate};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{JITTER_FACTOR, MAX_ATTEMPTS, RETRY_BASE_DELAY_SECONDS};

/// Retry policy for event delivery.
///
/// The delay before retry `n` is `base_delay * 2^(n-1)`, capped at
/// `max_delay` and randomized by `±jitter_factor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Jitter fraction in `[0.0, 1.0]`.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::from_secs(RETRY_BASE_DELAY_SECONDS),
            max_delay: Duration::from_secs(24 * 60 * 60),
            jitter_factor: JITTER_FACTOR,
        }
    }
}

/// Outcome of applying the policy to one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// The endpoint answered 2xx.
    Complete,
    /// Try again at the given time.
    Retry {
        /// When the next delivery attempt should be made
        next_attempt_at: DateTime<Utc>,
    },
    /// Attempts are exhausted.
    GiveUp {
        /// Reason why the delivery should not be retried
        reason: String,
    },
}

impl RetryPolicy {
    /// Decides what happens after an attempt that answered `status_code`.
    ///
    /// `attempt_count` is the number of attempts made so far, including the
    /// one being evaluated.
    pub fn decide(&self, status_code: u16, attempt_count: u32, now: DateTime<Utc>) -> RetryDecision {
        if (200..300).contains(&status_code) {
            return RetryDecision::Complete;
        }

        if attempt_count >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = apply_jitter(self.backoff(attempt_count), self.jitter_factor);
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp {
                reason: "retry delay duration out of range".to_string(),
            };
        };

        RetryDecision::Retry { next_attempt_at: now + chrono_delay }
    }

    /// State an event moves to after an attempt.
    pub fn next_state(&self, status_code: u16, attempt_count: u32, now: DateTime<Utc>) -> EventUpdate {
        let decision = self.decide(status_code, attempt_count, now);
        let attempt_count = i32::try_from(attempt_count).unwrap_or(i32::MAX);

        match decision {
            RetryDecision::Complete => {
                EventUpdate { status: EventStatus::Completed, attempt_count, next_attempt: None }
            },
            RetryDecision::Retry { next_attempt_at } => EventUpdate {
                status: EventStatus::Errored,
                attempt_count,
                next_attempt: Some(next_attempt_at),
            },
            RetryDecision::GiveUp { .. } => {
                EventUpdate { status: EventStatus::Failed, attempt_count, next_attempt: None }
            },
        }
    }

    /// Delay before the retry following attempt `attempt_count`, without
    /// jitter.
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1).min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let delay = self.base_delay.saturating_mul(multiplier);

        std::cmp::min(delay, self.max_delay)
    }
}

/// Randomizes a delay by `±jitter_factor`.
///
/// With `jitter_factor = 0.2` a 300s delay lands strictly between 240s and
/// 360s. The result never drops below one second, or below `duration` when
/// that is shorter.
pub fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    let floor = duration.as_secs_f64().min(1.0);
    Duration::from_secs_f64(jittered_secs.max(floor))
}
