//! Transparent proxy engine contract tests against a mocked upstream.

use axum::body::Body;
use axum::http::{Request, header};
use serde_json::{Value, json};
use wiremock::matchers::{body_json, header as header_eq, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use elastauth::config::components::ProxyConfig;
use elastauth::credentials::BasicCredentials;
use elastauth::server::proxy::ProxyEngine;

fn engine(target: &str) -> ProxyEngine {
    ProxyEngine::new(&ProxyConfig {
        enabled: true,
        elasticsearch_url: target.to_string(),
        ..Default::default()
    })
    .expect("engine")
}

fn credentials() -> BasicCredentials {
    BasicCredentials {
        username: "bob".into(),
        password: "pw".into(),
    }
}

/// Method, path, query, and body are preserved; the injected credential
/// replaces whatever the client sent.
#[tokio::test]
async fn request_is_forwarded_with_injected_credential() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/index/_doc/1"))
        .and(query_param("refresh", "true"))
        .and(body_json(json!({"field": "value"})))
        .and(header_eq("authorization", "Basic Ym9iOnB3"))
        .and(header_eq("x-opaque-id", "trace-42"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"result": "created"})))
        .expect(1)
        .mount(&upstream)
        .await;

    let req = Request::builder()
        .method("POST")
        .uri("/index/_doc/1?refresh=true")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-opaque-id", "trace-42")
        // The client's own credential must never reach the upstream.
        .header(header::AUTHORIZATION, "Basic ZXZpbDpjcmVkcw==")
        .body(Body::from(r#"{"field": "value"}"#))
        .unwrap();

    let resp = engine(&upstream.uri()).forward(&credentials(), req).await;
    assert_eq!(resp.status(), 201);

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["result"], "created");
}

/// Upstream 401/403 pass through unchanged: a mis-provisioned user is an
/// operator problem, not a client one.
#[tokio::test]
async fn upstream_auth_failures_pass_through() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_search"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"type": "security_exception"}
        })))
        .mount(&upstream)
        .await;

    let req = Request::builder()
        .method("GET")
        .uri("/_search")
        .body(Body::empty())
        .unwrap();
    let resp = engine(&upstream.uri()).forward(&credentials(), req).await;
    assert_eq!(resp.status(), 403);

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["type"], "security_exception");
}

/// A dead upstream is a 502 with the local JSON error shape.
#[tokio::test]
async fn unreachable_upstream_is_502() {
    let req = Request::builder()
        .method("GET")
        .uri("/_search")
        .body(Body::empty())
        .unwrap();
    let resp = engine("http://127.0.0.1:1").forward(&credentials(), req).await;
    assert_eq!(resp.status(), 502);

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "upstream_unavailable");
    assert!(body["timestamp"].as_str().is_some());
}

/// Requests violating the input safety filter are rejected locally with a
/// 400 and never reach the upstream.
#[tokio::test]
async fn unsafe_input_is_rejected_before_forwarding() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let req = Request::builder()
        .method("GET")
        .uri("/_search")
        .header("x-huge", "h".repeat(17 * 1024))
        .body(Body::empty())
        .unwrap();
    let resp = engine(&upstream.uri()).forward(&credentials(), req).await;
    assert_eq!(resp.status(), 400);

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "proxy_input_unsafe");
}

/// Upstream response status and custom headers survive the passage.
#[tokio::test]
async fn upstream_headers_are_preserved() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-elastic-product", "Elasticsearch")
                .set_body_json(json!({"tagline": "You Know, for Search"})),
        )
        .mount(&upstream)
        .await;

    let req = Request::builder()
        .method("GET")
        .uri("/")
        .body(Body::empty())
        .unwrap();
    let resp = engine(&upstream.uri()).forward(&credentials(), req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("x-elastic-product").unwrap(),
        "Elasticsearch"
    );
}
