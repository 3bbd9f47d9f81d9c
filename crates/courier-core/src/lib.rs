//! Core domain models, storage and time primitives.
//!
//! Provides strongly-typed identifiers, the event and delivery result
//! records, typed endpoint configuration and the PostgreSQL repositories the
//! delivery engine persists through. Every other crate builds on these
//! types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    Association, BodyEncoding, ChannelId, ClassifierId, DeliveryResult, DeliveryResultId,
    EndpointConfig, Event, EventId, EventStatus, EventUpdate, HttpMethod, NewDeliveryResult,
    NewEvent, NewSubscription, OrgId, OrgRetention, Subscription, SubscriptionId,
};
pub use storage::{OrgScope, Storage};
pub use time::{Clock, RealClock, TestClock};
