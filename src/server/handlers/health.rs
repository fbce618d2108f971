//! Health check handlers.
//!
//! # Endpoints
//!
//! - `GET {base_path}/health` and `{base_path}/live` - 200 if the process
//!   is live; no dependency checks
//! - `GET {base_path}/ready` - 200 iff every declared startup dependency
//!   answers; otherwise 503 with a JSON body naming the ones that are down
//!
//! Control-plane requests are always handled locally and never proxied to
//! Elasticsearch.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse, response::Response};
use serde_json::json;

use crate::config::OperationMode;
use crate::state::GatewayState;

/// Liveness handler, shared by `/health` and `/live`.
///
/// # Returns
/// - 200 OK with `{"status": "ok"}` while the process is live
/// - 503 with `{"status": "terminating"}` once shutdown began
pub async fn health(State(state): State<Arc<GatewayState>>) -> Response {
    tracing::debug!("health handler invoked");

    if state.is_alive() {
        (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "terminating" })),
        )
            .into_response()
    }
}

/// Readiness handler.
///
/// Probes the dependencies declared at startup: the Elasticsearch admin
/// endpoint, the cache backend, and (in direct-auth) OIDC discovery.
///
/// # Returns
/// - 200 OK with per-dependency status when everything answers
/// - 503 with the same body shape, listing the dependencies that are down
pub async fn ready(State(state): State<Arc<GatewayState>>) -> Response {
    tracing::debug!("ready handler invoked");

    let es_up = state.es.ping().await;
    let cache_up = state.cache.healthy().await;

    let mut dependencies = serde_json::Map::new();
    dependencies.insert("elasticsearch".into(), json!(es_up));
    dependencies.insert("cache".into(), json!(cache_up));

    let mut all_up = es_up && cache_up && state.is_ready();

    if state.mode() == OperationMode::DirectAuth {
        let discovery = state
            .discovery_ok
            .load(std::sync::atomic::Ordering::Relaxed);
        dependencies.insert("oidc_discovery".into(), json!(discovery));
        all_up = all_up && discovery;
    }

    let down: Vec<String> = dependencies
        .iter()
        .filter(|(_, up)| !up.as_bool().unwrap_or(false))
        .map(|(name, _)| name.clone())
        .collect();

    let status = if all_up {
        StatusCode::OK
    } else {
        tracing::debug!(?down, "readiness probe failed");
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": if all_up { "ready" } else { "not ready" },
        "dependencies": dependencies,
        "down": down,
    });

    (status, Json(body)).into_response()
}
