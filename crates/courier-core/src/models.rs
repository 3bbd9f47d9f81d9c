//! Core domain models and strongly-typed identifiers.
//!
//! Defines outbound events, delivery results, subscriptions and the typed
//! endpoint configuration, together with newtype ID wrappers and the
//! database serialization traits they need.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, Result as CoreResult};

type PgDb = sqlx::Postgres;
type PgRow = sqlx::postgres::PgRow;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Longest accepted topic slug.
pub const MAX_TOPIC_LENGTH: usize = 64;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <Uuid as sqlx::Type<PgDb>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
                Ok(Self(uuid))
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

uuid_id!(
    /// Identifier of one logical outbound event.
    ///
    /// Follows the event through every delivery attempt and is the foreign
    /// key of its delivery results.
    EventId
);

uuid_id!(
    /// Identifier of the organization that owns events, results and
    /// subscriptions. Every query is scoped by it.
    OrgId
);

uuid_id!(
    /// Identifier of a topic subscription.
    SubscriptionId
);

uuid_id!(
    /// Identifier of an immutable delivery result.
    DeliveryResultId
);

uuid_id!(
    /// Identifier of an intent classifier whose sync calls are logged.
    ClassifierId
);

uuid_id!(
    /// Identifier of a messaging channel whose outbound calls are logged.
    ChannelId
);

/// Event lifecycle status.
///
/// ```text
/// Pending -> Completed
///         -> Errored -> (retry sweep) -> Completed | Errored | Failed
///         -> Failed
/// ```
///
/// Completed and Failed are terminal. Errored waits for the retry sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Created, no delivery attempt has finished yet.
    Pending,

    /// Delivered with a 2xx response.
    Completed,

    /// Last attempt failed, another attempt is scheduled.
    Errored,

    /// Permanently failed: attempts exhausted or no destination.
    Failed,
}

impl EventStatus {
    /// Returns true for states no transition may leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "errored" => Ok(Self::Errored),
            "failed" => Ok(Self::Failed),
            _ => Err(CoreError::invalid(format!("invalid event status: {s}"))),
        }
    }
}

impl sqlx::Type<PgDb> for EventStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl sqlx::Encode<'_, PgDb> for EventStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// HTTP method used for outbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// HTTP GET method. Sends no body.
    Get,
    /// HTTP POST method (default).
    #[default]
    Post,
    /// HTTP PUT method.
    Put,
    /// HTTP PATCH method.
    Patch,
    /// HTTP DELETE method.
    Delete,
}

impl HttpMethod {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether an event payload is sent as the request body.
    pub fn carries_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(CoreError::invalid(format!("unsupported http method: {s}"))),
        }
    }
}

/// How an event payload is encoded into a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    /// `application/x-www-form-urlencoded` (default).
    #[default]
    Form,
    /// `application/json`.
    Json,
}

impl BodyEncoding {
    /// Database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Form => "form",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for BodyEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BodyEncoding {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "form" => Ok(Self::Form),
            "json" => Ok(Self::Json),
            _ => Err(CoreError::invalid(format!("invalid body encoding: {s}"))),
        }
    }
}

impl sqlx::Type<PgDb> for BodyEncoding {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for BodyEncoding {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl sqlx::Encode<'_, PgDb> for BodyEncoding {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Where and how to deliver an event.
///
/// Validated once when the owning record is written, then passed by
/// reference into dispatch. Headers are passed through verbatim, including
/// `Authorization` when configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Absolute http(s) URL.
    pub url: String,

    /// Request method.
    #[serde(default)]
    pub method: HttpMethod,

    /// Extra request headers, ordered by name.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Payload encoding for methods that carry a body.
    #[serde(default)]
    pub body_encoding: BodyEncoding,
}

impl EndpointConfig {
    /// POST with form encoding and no extra headers.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            headers: BTreeMap::new(),
            body_encoding: BodyEncoding::Form,
        }
    }

    /// Replaces the request method.
    #[must_use]
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Adds or replaces one header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replaces the body encoding.
    #[must_use]
    pub fn with_encoding(mut self, encoding: BodyEncoding) -> Self {
        self.body_encoding = encoding;
        self
    }

    /// Checks the URL and headers.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` when the URL is not an absolute
    /// http(s) URL or a header name/value is not legal on the wire.
    pub fn validate(&self) -> CoreResult<()> {
        validate_url(&self.url)?;

        for (name, value) in &self.headers {
            http::HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| CoreError::invalid(format!("invalid header name: {name:?}")))?;
            http::HeaderValue::from_str(value)
                .map_err(|_| CoreError::invalid(format!("invalid value for header {name}")))?;
        }

        Ok(())
    }
}

/// Accepts only absolute `http://` or `https://` URLs with a host.
///
/// # Errors
///
/// Returns `CoreError::InvalidInput` describing the first problem found.
pub fn validate_url(url: &str) -> CoreResult<()> {
    let uri: http::Uri =
        url.parse().map_err(|e| CoreError::invalid(format!("invalid url {url:?}: {e}")))?;

    match uri.scheme_str() {
        Some("http" | "https") => {},
        Some(other) => return Err(CoreError::invalid(format!("unsupported url scheme: {other}"))),
        None => return Err(CoreError::invalid(format!("url must be absolute: {url:?}"))),
    }

    if uri.host().is_none_or(str::is_empty) {
        return Err(CoreError::invalid(format!("url has no host: {url:?}")));
    }

    Ok(())
}

/// Accepts lowercase slugs of ASCII letters, digits, `-` and `_`.
///
/// # Errors
///
/// Returns `CoreError::InvalidInput` for empty, oversized or non-slug topics.
pub fn validate_topic(topic: &str) -> CoreResult<()> {
    if topic.is_empty() {
        return Err(CoreError::invalid("topic must not be empty"));
    }
    if topic.len() > MAX_TOPIC_LENGTH {
        return Err(CoreError::invalid(format!(
            "topic exceeds {MAX_TOPIC_LENGTH} characters: {topic}"
        )));
    }
    if !topic.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
    {
        return Err(CoreError::invalid(format!("topic is not a slug: {topic:?}")));
    }
    Ok(())
}

/// One logical unit of outbound work.
///
/// `attempt_count` only grows. `next_attempt` is set only while the event is
/// Errored.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: EventId,

    /// Organization that owns this event.
    pub org_id: OrgId,

    /// Subscription that produced this event, if it came from a topic.
    pub subscription_id: Option<SubscriptionId>,

    /// Topic slug the event was fired for.
    pub topic: Option<String>,

    /// Resolved destination. `None` means nothing was resolvable.
    pub endpoint: Option<sqlx::types::Json<EndpointConfig>>,

    /// Structured payload delivered to the endpoint.
    pub payload: sqlx::types::Json<Value>,

    /// Current lifecycle status.
    pub status: EventStatus,

    /// Number of delivery attempts made so far.
    pub attempt_count: i32,

    /// When the retry sweep should attempt delivery again.
    pub next_attempt: Option<DateTime<Utc>>,

    /// When the event was created.
    pub created_at: DateTime<Utc>,

    /// When the event state last changed.
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Destination configuration, if one was resolved.
    pub fn endpoint(&self) -> Option<&EndpointConfig> {
        self.endpoint.as_ref().map(|json| &json.0)
    }

    /// Attempt count as an unsigned number.
    pub fn attempts(&self) -> u32 {
        u32::try_from(self.attempt_count).unwrap_or(0)
    }

    /// Applies a state transition in memory.
    pub fn apply(&mut self, update: &EventUpdate, now: DateTime<Utc>) {
        self.status = update.status;
        self.attempt_count = update.attempt_count;
        self.next_attempt = update.next_attempt;
        self.updated_at = now;
    }
}

/// Input for creating an event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Owning organization.
    pub org_id: OrgId,
    /// Producing subscription, if any.
    pub subscription_id: Option<SubscriptionId>,
    /// Topic slug, if any.
    pub topic: Option<String>,
    /// Destination, `None` when nothing could be resolved.
    pub endpoint: Option<EndpointConfig>,
    /// Payload to deliver.
    pub payload: Value,
}

impl NewEvent {
    /// Event for one active subscription of a topic.
    pub fn for_subscription(subscription: &Subscription, payload: Value) -> Self {
        Self {
            org_id: subscription.org_id,
            subscription_id: Some(subscription.id),
            topic: Some(subscription.topic.clone()),
            endpoint: Some(subscription.endpoint()),
            payload,
        }
    }

    /// Event for a directly configured webhook.
    pub fn for_webhook(org_id: OrgId, endpoint: Option<EndpointConfig>, payload: Value) -> Self {
        Self { org_id, subscription_id: None, topic: None, endpoint, payload }
    }

    /// Validates the topic and endpoint.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if either is malformed.
    pub fn validate(&self) -> CoreResult<()> {
        if let Some(topic) = &self.topic {
            validate_topic(topic)?;
        }
        if let Some(endpoint) = &self.endpoint {
            endpoint.validate()?;
        }
        Ok(())
    }

    /// Materializes a Pending event with zero attempts.
    pub fn into_event(self, id: EventId, now: DateTime<Utc>) -> Event {
        Event {
            id,
            org_id: self.org_id,
            subscription_id: self.subscription_id,
            topic: self.topic,
            endpoint: self.endpoint.map(sqlx::types::Json),
            payload: sqlx::types::Json(self.payload),
            status: EventStatus::Pending,
            attempt_count: 0,
            next_attempt: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// New state for an event after a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventUpdate {
    /// Status after the attempt.
    pub status: EventStatus,
    /// Attempt count after the attempt.
    pub attempt_count: i32,
    /// Next scheduled attempt, only for Errored.
    pub next_attempt: Option<DateTime<Utc>>,
}

/// Durable registration to deliver a topic to a URL.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    /// Unique identifier.
    pub id: SubscriptionId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Topic slug.
    pub topic: String,
    /// Destination URL.
    pub target_url: String,
    /// Payload encoding for deliveries.
    pub body_encoding: BodyEncoding,
    /// Inactive subscriptions are kept but receive nothing.
    pub is_active: bool,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Typed endpoint configuration for this subscription.
    pub fn endpoint(&self) -> EndpointConfig {
        EndpointConfig::new(self.target_url.clone()).with_encoding(self.body_encoding)
    }
}

/// Input for creating a subscription.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    /// Owning organization.
    pub org_id: OrgId,
    /// Topic slug.
    pub topic: String,
    /// Destination URL.
    pub target_url: String,
    /// Payload encoding.
    pub body_encoding: BodyEncoding,
}

impl NewSubscription {
    /// Form-encoded subscription.
    pub fn new(org_id: OrgId, topic: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            org_id,
            topic: topic.into(),
            target_url: target_url.into(),
            body_encoding: BodyEncoding::Form,
        }
    }

    /// Validates the topic and URL.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if either is malformed.
    pub fn validate(&self) -> CoreResult<()> {
        validate_topic(&self.topic)?;
        validate_url(&self.target_url)
    }

    /// Materializes an active subscription.
    pub fn into_subscription(self, id: SubscriptionId, now: DateTime<Utc>) -> Subscription {
        Subscription {
            id,
            org_id: self.org_id,
            topic: self.topic,
            target_url: self.target_url,
            body_encoding: self.body_encoding,
            is_active: true,
            created_at: now,
        }
    }
}

/// What a delivery result belongs to. At most one owner is ever set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Association {
    /// Attempt of an outbound event.
    Event(EventId),
    /// Call made while syncing a classifier.
    Classifier(ClassifierId),
    /// Call made on behalf of a channel.
    Channel(ChannelId),
    /// Standalone HTTP log.
    #[default]
    None,
}

impl Association {
    /// Event owner, if any.
    pub fn event_id(self) -> Option<EventId> {
        match self {
            Self::Event(id) => Some(id),
            _ => None,
        }
    }

    /// Classifier owner, if any.
    pub fn classifier_id(self) -> Option<ClassifierId> {
        match self {
            Self::Classifier(id) => Some(id),
            _ => None,
        }
    }

    /// Channel owner, if any.
    pub fn channel_id(self) -> Option<ChannelId> {
        match self {
            Self::Channel(id) => Some(id),
            _ => None,
        }
    }

    fn from_columns(
        event_id: Option<EventId>,
        classifier_id: Option<ClassifierId>,
        channel_id: Option<ChannelId>,
    ) -> Result<Self, sqlx::Error> {
        match (event_id, classifier_id, channel_id) {
            (Some(id), None, None) => Ok(Self::Event(id)),
            (None, Some(id), None) => Ok(Self::Classifier(id)),
            (None, None, Some(id)) => Ok(Self::Channel(id)),
            (None, None, None) => Ok(Self::None),
            _ => Err(sqlx::Error::Decode("delivery result has more than one owner".into())),
        }
    }
}

/// Immutable record of one outbound HTTP attempt.
///
/// `status_code` is 0 when no response was received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Unique identifier.
    pub id: DeliveryResultId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Event, classifier or channel this attempt belongs to.
    pub association: Association,
    /// HTTP status, 0 for no response.
    pub status_code: i32,
    /// Response body or error description, possibly truncated.
    pub body: String,
    /// Wire-level request text.
    pub request_dump: String,
    /// Wire-level response text, empty without a response.
    pub response_dump: String,
    /// Round-trip latency.
    pub latency_ms: f64,
    /// When the attempt was recorded.
    pub created_at: DateTime<Utc>,
}

impl DeliveryResult {
    /// True for 2xx status codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for DeliveryResult {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let association = Association::from_columns(
            row.try_get("event_id")?,
            row.try_get("classifier_id")?,
            row.try_get("channel_id")?,
        )?;

        Ok(Self {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            association,
            status_code: row.try_get("status_code")?,
            body: row.try_get("body")?,
            request_dump: row.try_get("request_dump")?,
            response_dump: row.try_get("response_dump")?,
            latency_ms: row.try_get("latency_ms")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Input for recording a delivery result.
#[derive(Debug, Clone)]
pub struct NewDeliveryResult {
    /// Owning organization.
    pub org_id: OrgId,
    /// Owner of the attempt.
    pub association: Association,
    /// HTTP status, 0 for no response.
    pub status_code: i32,
    /// Response body or error description.
    pub body: String,
    /// Wire-level request text.
    pub request_dump: String,
    /// Wire-level response text.
    pub response_dump: String,
    /// Round-trip latency.
    pub latency_ms: f64,
}

impl NewDeliveryResult {
    /// Materializes the immutable record.
    pub fn into_result(self, id: DeliveryResultId, now: DateTime<Utc>) -> DeliveryResult {
        DeliveryResult {
            id,
            org_id: self.org_id,
            association: self.association,
            status_code: self.status_code,
            body: self.body,
            request_dump: self.request_dump,
            response_dump: self.response_dump,
            latency_ms: self.latency_ms,
            created_at: now,
        }
    }
}

/// Per-organization retention override, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrgRetention {
    /// Organization the override applies to.
    pub org_id: OrgId,
    /// Age after which successful records are trimmed.
    pub success_after_secs: i64,
    /// Age after which every record is trimmed.
    pub all_after_secs: i64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn event_status_round_trips_through_strings() {
        for status in
            [EventStatus::Pending, EventStatus::Completed, EventStatus::Errored, EventStatus::Failed]
        {
            assert_eq!(status.to_string().parse::<EventStatus>().ok(), Some(status));
        }
        assert!("delivered".parse::<EventStatus>().is_err());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(EventStatus::Completed.is_terminal());
        assert!(EventStatus::Failed.is_terminal());
        assert!(!EventStatus::Pending.is_terminal());
        assert!(!EventStatus::Errored.is_terminal());
    }

    #[test]
    fn endpoint_config_accepts_authorization_header() {
        let endpoint = EndpointConfig::new("https://example.com/hook")
            .with_header("Authorization", "Token abc123")
            .with_encoding(BodyEncoding::Json);
        assert!(endpoint.validate().is_ok());
    }

    #[test]
    fn endpoint_config_rejects_bad_urls() {
        for url in ["", "example.com/hook", "ftp://example.com/file", "/relative/path", "http://"] {
            assert!(EndpointConfig::new(url).validate().is_err(), "accepted {url:?}");
        }
    }

    #[test]
    fn endpoint_config_rejects_bad_headers() {
        let bad_name = EndpointConfig::new("https://example.com").with_header("Bad Header", "x");
        assert!(bad_name.validate().is_err());

        let bad_value = EndpointConfig::new("https://example.com").with_header("X-Token", "a\nb");
        assert!(bad_value.validate().is_err());
    }

    #[test]
    fn endpoint_config_defaults_when_deserialized() {
        let endpoint: EndpointConfig =
            serde_json::from_value(json!({"url": "https://example.com/hook"})).unwrap_or_else(
                |e| panic!("endpoint config should deserialize: {e}"),
            );
        assert_eq!(endpoint.method, HttpMethod::Post);
        assert_eq!(endpoint.body_encoding, BodyEncoding::Form);
        assert!(endpoint.headers.is_empty());
    }

    #[test]
    fn topic_slugs() {
        assert!(validate_topic("new-contact").is_ok());
        assert!(validate_topic("flow_run_2").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("New Contact").is_err());
        assert!(validate_topic(&"a".repeat(MAX_TOPIC_LENGTH + 1)).is_err());
    }

    #[test]
    fn http_method_parsing_is_case_insensitive() {
        assert_eq!("get".parse::<HttpMethod>().ok(), Some(HttpMethod::Get));
        assert_eq!("POST".parse::<HttpMethod>().ok(), Some(HttpMethod::Post));
        assert!("TRACE".parse::<HttpMethod>().is_err());
        assert!(!HttpMethod::Get.carries_body());
        assert!(HttpMethod::Post.carries_body());
    }

    #[test]
    fn new_event_starts_pending_with_zero_attempts() {
        let event = NewEvent::for_webhook(OrgId::new(), None, json!({"a": 1}))
            .into_event(EventId::new(), Utc::now());
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.attempt_count, 0);
        assert!(event.next_attempt.is_none());
        assert!(event.endpoint().is_none());
    }

    #[test]
    fn subscription_events_inherit_topic_and_endpoint() {
        let subscription = NewSubscription::new(OrgId::new(), "new-contact", "https://x.io/hook")
            .into_subscription(SubscriptionId::new(), Utc::now());
        let new_event = NewEvent::for_subscription(&subscription, json!({}));

        assert_eq!(new_event.topic.as_deref(), Some("new-contact"));
        assert_eq!(new_event.subscription_id, Some(subscription.id));
        assert_eq!(
            new_event.endpoint.as_ref().map(|e| e.url.as_str()),
            Some("https://x.io/hook")
        );
        assert!(new_event.validate().is_ok());
    }

    #[test]
    fn association_accessors() {
        let event_id = EventId::new();
        assert_eq!(Association::Event(event_id).event_id(), Some(event_id));
        assert_eq!(Association::Event(event_id).classifier_id(), None);
        assert_eq!(Association::None.channel_id(), None);
        assert!(Association::from_columns(Some(event_id), Some(ClassifierId::new()), None).is_err());
    }
}
