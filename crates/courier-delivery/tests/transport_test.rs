//! Integration tests for the HTTP transport against a real local server.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use courier_core::{
    models::{EventStatus, HttpMethod, NewSubscription, OrgId},
    time::TestClock,
};
use courier_delivery::{
    parse_request_dump, transport::MAX_BODY_SIZE, Dispatcher, HttpTransport,
    InMemoryDeliveryStore, RequestBody, RetryPolicy, TransportConfig, TransportRequest,
};
use serde_json::json;
use wiremock::{
    matchers::{body_json, body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn transport_with_timeout(timeout: Duration) -> HttpTransport {
    HttpTransport::new(TransportConfig { timeout, ..TransportConfig::default() })
        .expect("transport should build")
}

#[tokio::test]
async fn form_posts_reach_the_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("name=Ben+Haggerty"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Hello World"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::with_defaults().unwrap();
    let request = TransportRequest::post(format!("{}/hook", server.uri()))
        .with_body(RequestBody::Form(vec![("name".into(), "Ben Haggerty".into())]));

    let result = transport.execute(request).await;

    assert_eq!(result.status_code, 200);
    assert_eq!(result.body, "Hello World");
    assert!(result.latency_ms > 0.0);
    assert!(result.response_dump.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(result.response_dump.ends_with("Hello World"));
}

#[tokio::test]
async fn json_bodies_and_custom_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/hook"))
        .and(header("authorization", "Token secret"))
        .and(body_json(json!({"name": "Ben"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::with_defaults().unwrap();
    let request = TransportRequest::new(HttpMethod::Put, format!("{}/hook", server.uri()))
        .with_header("Authorization", "Token secret")
        .with_body(RequestBody::Json(json!({"name": "Ben"})));

    let result = transport.execute(request).await;

    assert_eq!(result.status_code, 201);
    assert!(result.is_success());
}

#[tokio::test]
async fn error_bodies_are_preserved() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let transport = HttpTransport::with_defaults().unwrap();
    let result = transport.execute(TransportRequest::post(server.uri())).await;

    assert_eq!(result.status_code, 500);
    assert_eq!(result.body, "boom");
    assert!(result.response_dump.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
}

#[tokio::test]
async fn timeouts_yield_status_zero() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let transport = transport_with_timeout(Duration::from_millis(100));
    let result = transport.execute(TransportRequest::post(server.uri())).await;

    assert_eq!(result.status_code, 0);
    assert!(result.body.contains("timed out"), "unexpected body: {}", result.body);
    assert!(result.response_dump.is_empty());
    assert!(!result.request_dump.is_empty());
}

#[tokio::test]
async fn refused_connections_yield_status_zero() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let transport = transport_with_timeout(Duration::from_secs(2));
    let result =
        transport.execute(TransportRequest::post(format!("http://127.0.0.1:{port}/hook"))).await;

    assert_eq!(result.status_code, 0);
    assert!(!result.body.is_empty());
    assert!(result.response_dump.is_empty());
}

#[tokio::test]
async fn oversized_bodies_are_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(MAX_BODY_SIZE * 2)))
        .mount(&server)
        .await;

    let transport = HttpTransport::with_defaults().unwrap();
    let result = transport.execute(TransportRequest::get(server.uri())).await;

    assert_eq!(result.body.len(), MAX_BODY_SIZE);
    assert!(result.body.ends_with("(truncated)"));
}

#[tokio::test]
async fn request_dump_round_trips() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

    let url = format!("{}/hooks/contact", server.uri());
    let transport = HttpTransport::with_defaults().unwrap();
    let request = TransportRequest::post(url.clone())
        .with_header("Authorization", "Token 0123456789abcdef")
        .with_header("X-Org", "acme")
        .with_body(RequestBody::Form(vec![("name".into(), "Ben".into())]));

    let result = transport.execute(request).await;
    let parsed = parse_request_dump(&result.request_dump).unwrap();

    assert_eq!(parsed.method, HttpMethod::Post);
    assert_eq!(parsed.url, url);
    assert_eq!(parsed.headers["authorization"], "Token 0123456789abcdef");
    assert_eq!(parsed.headers["x-org"], "acme");
    assert_eq!(parsed.body, "name=Ben");
}

#[tokio::test]
async fn fire_delivers_through_real_transport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"tier": "gold"}"#))
        .expect(1)
        .mount(&server)
        .await;

    let store = InMemoryDeliveryStore::new();
    let dispatcher = Dispatcher::new(
        Arc::new(store.clone()),
        Arc::new(HttpTransport::with_defaults().unwrap()),
        RetryPolicy::default(),
        Arc::new(TestClock::new()),
    );
    let org = OrgId::new();
    dispatcher
        .create_subscription(NewSubscription::new(org, "new-contact", format!("{}/hook", server.uri())))
        .await
        .unwrap();

    let outcome = dispatcher.fire("new-contact", org, json!({"name": "Ben"})).await.unwrap().remove(0);

    assert_eq!(outcome.status, EventStatus::Completed);
    assert_eq!(outcome.json(), Some(json!({"tier": "gold"})));
    let results = dispatcher.delivery_results(outcome.event_id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].request_dump.contains("name=Ben"));
}
