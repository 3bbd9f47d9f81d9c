//! Outbound HTTP transport with wire-level audit capture.
//!
//! Executes exactly one request and always returns a [`TransportResult`].
//! Network failures are folded into the result as status code 0 with a
//! short error description, so callers never branch on `Err` for delivery
//! conditions. The request text is captured from the fully built request,
//! header values included verbatim.

use std::{collections::BTreeMap, time::Duration};

use bytes::Bytes;
use courier_core::models::HttpMethod;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Largest response body kept in a result.
pub const MAX_BODY_SIZE: usize = 64 * 1024;

const TRUNCATION_SUFFIX: &str = "... (truncated)";

/// Configuration for the HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Timeout for the whole request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: concat!("courier/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 5,
        }
    }
}

/// Request body variants.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// Raw bytes sent as-is.
    Raw(Bytes),
    /// `application/x-www-form-urlencoded` pairs, in order.
    Form(Vec<(String, String)>),
    /// `application/json` document.
    Json(Value),
}

/// One outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    /// Request method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Headers, passed through verbatim.
    pub headers: BTreeMap<String, String>,
    /// Body.
    pub body: RequestBody,
}

impl TransportRequest {
    /// Request with no headers and no body.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), headers: BTreeMap::new(), body: RequestBody::Empty }
    }

    /// GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    /// Adds or replaces a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

/// Outcome of one outbound request.
///
/// `status_code` is 0 when no response was received, in which case `body`
/// holds the error description and `response_dump` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportResult {
    /// HTTP status, or 0 for no response.
    pub status_code: u16,
    /// Response body, possibly truncated, or the error description.
    pub body: String,
    /// Request as sent on the wire.
    pub request_dump: String,
    /// Response as received, empty without a response.
    pub response_dump: String,
    /// Round-trip latency.
    pub latency_ms: f64,
}

impl TransportResult {
    /// Result for a request that got no response.
    pub fn no_response(
        error: impl Into<String>,
        request_dump: impl Into<String>,
        latency_ms: f64,
    ) -> Self {
        Self {
            status_code: 0,
            body: error.into(),
            request_dump: request_dump.into(),
            response_dump: String::new(),
            latency_ms,
        }
    }

    /// Whether the status code is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// HTTP transport backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpTransport {
    /// Creates a transport with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a transport with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(TransportConfig::default())
    }

    /// Active configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Executes one request.
    ///
    /// Never fails: connection errors, DNS failures and timeouts produce a
    /// result with status code 0.
    pub async fn execute(&self, request: TransportRequest) -> TransportResult {
        let span = info_span!(
            "outbound_request",
            method = request.method.as_str(),
            url = %request.url,
        );

        async move {
            let started = std::time::Instant::now();

            let http_request = match build_request(&self.client, &request) {
                Ok(http_request) => http_request,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to build outbound request");
                    return TransportResult::no_response(
                        format!("invalid request: {e}"),
                        dump_unsent(&request),
                        0.0,
                    );
                },
            };
            let request_dump = dump_request(&http_request);

            let response = match self.client.execute(http_request).await {
                Ok(response) => response,
                Err(e) => {
                    let latency_ms = elapsed_ms(started);
                    let error = if e.is_timeout() {
                        format!("request timed out after {}s", self.config.timeout.as_secs())
                    } else if e.is_connect() {
                        format!("connection failed: {e}")
                    } else {
                        e.to_string()
                    };
                    tracing::warn!(latency_ms, error = %error, "request failed");
                    return TransportResult::no_response(error, request_dump, latency_ms);
                },
            };

            let status = response.status();
            let mut response_dump = format!(
                "{:?} {} {}\r\n",
                response.version(),
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            );
            push_headers(&mut response_dump, response.headers());
            response_dump.push_str("\r\n");

            let body = match response.bytes().await {
                Ok(bytes) => truncate_body(&bytes),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read response body");
                    format!("[failed to read response body: {e}]")
                },
            };
            response_dump.push_str(&body);

            let latency_ms = elapsed_ms(started);
            tracing::debug!(status_code = status.as_u16(), latency_ms, "received response");

            TransportResult {
                status_code: status.as_u16(),
                body,
                request_dump,
                response_dump,
                latency_ms,
            }
        }
        .instrument(span)
        .await
    }
}

/// Builds a `reqwest::Request` without sending it.
pub(crate) fn build_request(
    client: &reqwest::Client,
    request: &TransportRequest,
) -> std::result::Result<reqwest::Request, reqwest::Error> {
    let mut builder = client.request(to_reqwest_method(request.method), &request.url);

    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder = match &request.body {
        RequestBody::Empty => builder,
        RequestBody::Raw(bytes) => builder.body(bytes.clone()),
        RequestBody::Form(pairs) => builder.form(pairs),
        RequestBody::Json(value) => builder.json(value),
    };

    builder.build()
}

/// Renders a built request as HTTP/1.1 text with an absolute-form target.
pub(crate) fn dump_request(request: &reqwest::Request) -> String {
    let mut dump = format!("{} {} HTTP/1.1\r\n", request.method(), request.url());
    push_headers(&mut dump, request.headers());
    dump.push_str("\r\n");

    if let Some(bytes) = request.body().and_then(reqwest::Body::as_bytes) {
        dump.push_str(&String::from_utf8_lossy(bytes));
    }

    dump
}

/// Best-effort dump of a request that could not be built.
fn dump_unsent(request: &TransportRequest) -> String {
    let mut dump = format!("{} {} HTTP/1.1\r\n", request.method, request.url);
    for (name, value) in &request.headers {
        dump.push_str(&format!("{name}: {value}\r\n"));
    }
    dump.push_str("\r\n");
    dump
}

fn push_headers(dump: &mut String, headers: &reqwest::header::HeaderMap) {
    for (name, value) in headers {
        dump.push_str(name.as_str());
        dump.push_str(": ");
        dump.push_str(&String::from_utf8_lossy(value.as_bytes()));
        dump.push_str("\r\n");
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

fn elapsed_ms(started: std::time::Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn truncate_body(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_BODY_SIZE {
        return String::from_utf8_lossy(bytes).into_owned();
    }

    let keep = MAX_BODY_SIZE - TRUNCATION_SUFFIX.len();
    let truncated = String::from_utf8_lossy(&bytes[..keep]);
    format!("{truncated}{TRUNCATION_SUFFIX}")
}

/// Request recovered from a recorded request dump.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    /// Request method.
    pub method: HttpMethod,
    /// Absolute URL from the request line.
    pub url: String,
    /// Headers, names normalized to lowercase.
    pub headers: HeaderMap,
    /// Body text.
    pub body: String,
}

/// Parses the text stored in a result's `request_dump`.
///
/// # Errors
///
/// Returns `DeliveryError::Configuration` if the request line or a header
/// line is malformed.
pub fn parse_request_dump(dump: &str) -> Result<ParsedRequest> {
    let (head, body) = dump
        .split_once("\r\n\r\n")
        .or_else(|| dump.split_once("\n\n"))
        .unwrap_or((dump, ""));

    let mut lines = head.lines();
    let request_line =
        lines.next().ok_or_else(|| DeliveryError::configuration("empty request dump"))?;

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(url), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(DeliveryError::configuration(format!(
            "malformed request line: {request_line:?}"
        )));
    };
    if !version.starts_with("HTTP/") {
        return Err(DeliveryError::configuration(format!("unknown protocol version: {version}")));
    }
    let method: HttpMethod = method.parse()?;

    let mut headers = HeaderMap::new();
    for line in lines.filter(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| DeliveryError::configuration(format!("malformed header: {line:?}")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| DeliveryError::configuration(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| DeliveryError::configuration(format!("invalid header value: {e}")))?;
        headers.append(name, value);
    }

    Ok(ParsedRequest { method, url: url.to_string(), headers, body: body.to_string() })
}
