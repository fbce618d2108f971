//! Effective-configuration handler.
//!
//! Returns the merged configuration with every sensitive field (admin
//! password, OIDC client secret, secret key, cache connection URL)
//! replaced by a fixed masking sentinel. Useful for checking what a
//! running instance actually loaded without exposing its secrets.

use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse, response::Response};

use crate::state::GatewayState;

/// `GET {base_path}/config`
pub async fn config_view(State(state): State<Arc<GatewayState>>) -> Response {
    tracing::debug!("config handler invoked");
    Json(state.config.masked()).into_response()
}
