//! End-to-end forward-auth behavior against a mocked Elasticsearch.

use axum::body::Body;
use axum::http::{Request, header};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use std::collections::HashMap;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use elastauth::config::components::{ElasticsearchConfig, RolesConfig};
use elastauth::config::{ElastauthConfig, OperationMode};
use elastauth::crypto::{self, SecretKey};
use elastauth::server::service::build_router;
use elastauth::state::GatewayState;

const SECRET_KEY: &str = "abababababababababababababababababababababababababababababababab";

fn forward_config(es_url: &str) -> ElastauthConfig {
    ElastauthConfig {
        operation_mode: Some(OperationMode::ForwardAuth),
        secret_key: SECRET_KEY.to_string(),
        elasticsearch: ElasticsearchConfig {
            hosts: vec![es_url.to_string()],
            username: "elastic".into(),
            password: "changeme".into(),
            ..Default::default()
        },
        roles: RolesConfig {
            default_roles: vec!["kibana_user".into()],
            group_mappings: HashMap::from([("admin".to_string(), vec!["superuser".to_string()])]),
        },
        ..Default::default()
    }
}

async fn router_for(es_url: &str) -> (axum::Router, std::sync::Arc<GatewayState>) {
    let state = GatewayState::build(forward_config(es_url))
        .await
        .expect("state");
    (build_router(state.clone()), state)
}

/// Happy path: well-formed headers produce a 200 with a Basic credential
/// for the header-named user, and Elasticsearch receives the upsert with
/// the derived role set.
#[tokio::test]
async fn forward_auth_happy_path() {
    let es = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/_security/user/alice"))
        .and(body_partial_json(json!({
            "roles": ["kibana_user", "superuser"],
            "email": "a@e.x",
            "full_name": "Alice"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"created": true})))
        .expect(1)
        .mount(&es)
        .await;

    let (router, state) = router_for(&es.uri()).await;

    let req = Request::builder()
        .method("GET")
        .uri("/")
        .header("Remote-User", "alice")
        .header("Remote-Groups", "admin,users")
        .header("Remote-Email", "a@e.x")
        .header("Remote-Name", "Alice")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.expect("resp");
    assert_eq!(resp.status(), 200);

    // The Authorization header Basic-decodes to alice:<password>.
    let auth = resp
        .headers()
        .get(header::AUTHORIZATION)
        .expect("authorization header")
        .to_str()
        .unwrap()
        .to_string();
    let decoded = STANDARD
        .decode(auth.strip_prefix("Basic ").expect("basic scheme"))
        .unwrap();
    let decoded = String::from_utf8(decoded).unwrap();
    let (user, password) = decoded.split_once(':').expect("user:password");
    assert_eq!(user, "alice");
    assert!(!password.is_empty());

    // The body names the user.
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["user"], "alice");

    // The password decrypts from the cache entry keyed by the username.
    let key = SecretKey::from_hex(SECRET_KEY).unwrap();
    let cache_key = state.credentials.cache_key("alice");
    let sealed = state
        .cache
        .get(&cache_key)
        .await
        .expect("cache read")
        .expect("cache entry");
    assert_eq!(crypto::open_hex(&key, &sealed).unwrap(), password);
}

/// Two requests inside the TTL see the same credential plaintext, and the
/// upsert happens only once.
#[tokio::test]
async fn forward_auth_reuses_cached_credential() {
    let es = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/_security/user/carol"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"created": true})))
        .expect(1)
        .mount(&es)
        .await;

    let (router, _state) = router_for(&es.uri()).await;

    let mut passwords = Vec::new();
    for _ in 0..2 {
        let req = Request::builder()
            .method("GET")
            .uri("/")
            .header("Remote-User", "carol")
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(req).await.expect("resp");
        assert_eq!(resp.status(), 200);
        let auth = resp
            .headers()
            .get(header::AUTHORIZATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        passwords.push(auth);
    }
    assert_eq!(passwords[0], passwords[1]);
}

/// A request without the username header is a 401 naming the header, and
/// no upsert reaches Elasticsearch.
#[tokio::test]
async fn forward_auth_missing_username_is_401() {
    let es = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&es)
        .await;

    let (router, _state) = router_for(&es.uri()).await;

    let req = Request::builder()
        .method("GET")
        .uri("/")
        .header("Remote-Groups", "admin")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.expect("resp");
    assert_eq!(resp.status(), 401);

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "identity_missing");
    assert_eq!(body["mode"], "forward-auth");
    assert!(body["message"].as_str().unwrap().contains("Remote-User"));
    assert!(body["timestamp"].as_str().is_some());
}

/// An unreachable cluster surfaces as 502, and nothing is cached.
#[tokio::test]
async fn forward_auth_unreachable_cluster_is_502() {
    // Point at a closed port.
    let (router, state) = router_for("http://127.0.0.1:1").await;

    let req = Request::builder()
        .method("GET")
        .uri("/")
        .header("Remote-User", "dave")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.expect("resp");
    assert_eq!(resp.status(), 502);

    let cache_key = state.credentials.cache_key("dave");
    assert!(state.cache.get(&cache_key).await.unwrap().is_none());
}

/// Control-plane endpoints answer locally in forward-auth mode too.
#[tokio::test]
async fn control_plane_endpoints_answer_locally() {
    let es = MockServer::start().await;
    let (router, _state) = router_for(&es.uri()).await;

    for endpoint in ["/elastauth/health", "/elastauth/live"] {
        let req = Request::builder()
            .method("GET")
            .uri(endpoint)
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(req).await.expect("resp");
        assert_eq!(resp.status(), 200, "endpoint {endpoint}");
    }

    // /config masks secrets and reports the active mode.
    let req = Request::builder()
        .method("GET")
        .uri("/elastauth/config")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.expect("resp");
    assert_eq!(resp.status(), 200);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["operation_mode"], "forward-auth");
    assert_eq!(body["secret_key"], "*****");
    assert_eq!(body["elasticsearch"]["password"], "*****");
}

/// Readiness reports per-dependency status: 200 once the lifecycle is
/// ready and Elasticsearch answers, 503 with the dead dependency named
/// otherwise.
#[tokio::test]
async fn ready_reflects_dependency_health() {
    let es = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tagline": "ok"})))
        .mount(&es)
        .await;

    let (router, state) = router_for(&es.uri()).await;
    state.set_state(elastauth::state::ApplicationState::Ready);

    let req = Request::builder()
        .method("GET")
        .uri("/elastauth/ready")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.expect("resp");
    assert_eq!(resp.status(), 200);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["dependencies"]["elasticsearch"], true);
    assert_eq!(body["dependencies"]["cache"], true);

    // Dead cluster: 503 naming elasticsearch.
    let (router, state) = router_for("http://127.0.0.1:1").await;
    state.set_state(elastauth::state::ApplicationState::Ready);
    let req = Request::builder()
        .method("GET")
        .uri("/elastauth/ready")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.expect("resp");
    assert_eq!(resp.status(), 503);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "not ready");
    assert!(
        body["down"]
            .as_array()
            .unwrap()
            .iter()
            .any(|d| d == "elasticsearch")
    );
}

/// The file cache backend works through the whole credential path.
#[tokio::test]
async fn file_cache_backend_end_to_end() {
    use elastauth::config::components::{CacheBackend, FileCacheConfig};

    let es = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/_security/user/frank"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"created": true})))
        .expect(1)
        .mount(&es)
        .await;

    let cache_dir = tempfile::tempdir().expect("tmpdir");
    let mut config = forward_config(&es.uri());
    config.cache.backend = CacheBackend::File;
    config.cache.file = Some(FileCacheConfig {
        path: cache_dir.path().to_str().unwrap().to_string(),
    });

    let state = GatewayState::build(config).await.expect("state");
    let router = build_router(state.clone());

    let mut passwords = Vec::new();
    for _ in 0..2 {
        let req = Request::builder()
            .method("GET")
            .uri("/")
            .header("Remote-User", "frank")
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(req).await.expect("resp");
        assert_eq!(resp.status(), 200);
        passwords.push(
            resp.headers()
                .get(header::AUTHORIZATION)
                .unwrap()
                .to_str()
                .unwrap()
                .to_string(),
        );
    }
    assert_eq!(passwords[0], passwords[1]);

    // The entry landed on disk, as ciphertext.
    let entries: Vec<_> = std::fs::read_dir(cache_dir.path())
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(entries.len(), 1);
    let contents = std::fs::read_to_string(entries[0].path()).unwrap();
    let (_, password) = decode_basic(&passwords[0]);
    assert!(!contents.contains(&password), "plaintext password on disk");
}

fn decode_basic(header_value: &str) -> (String, String) {
    let decoded = STANDARD
        .decode(header_value.strip_prefix("Basic ").unwrap())
        .unwrap();
    let decoded = String::from_utf8(decoded).unwrap();
    let (user, password) = decoded.split_once(':').unwrap();
    (user.to_string(), password.to_string())
}

/// Non-GET methods on control-plane paths are not treated as user
/// traffic; they answer locally with 405.
#[tokio::test]
async fn control_plane_paths_never_become_user_traffic() {
    let es = MockServer::start().await;
    let (router, _state) = router_for(&es.uri()).await;

    let req = Request::builder()
        .method("POST")
        .uri("/elastauth/health")
        .header("Remote-User", "alice")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.expect("resp");
    assert_eq!(resp.status(), 405);
    assert!(resp.headers().get(header::AUTHORIZATION).is_none());
}

/// Failover: the first host refuses connections, the second serves the
/// upsert.
#[tokio::test]
async fn es_client_fails_over_to_next_host() {
    let es = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/_security/user/erin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"created": true})))
        .expect(1)
        .mount(&es)
        .await;

    let mut config = forward_config("http://127.0.0.1:1");
    config.elasticsearch.hosts = vec!["http://127.0.0.1:1".into(), es.uri()];
    let state = GatewayState::build(config).await.expect("state");
    let router = build_router(state.clone());

    let req = Request::builder()
        .method("GET")
        .uri("/")
        .header("Remote-User", "erin")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.expect("resp");
    assert_eq!(resp.status(), 200);
}
