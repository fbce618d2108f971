//! Forward-auth user-traffic handler.
//!
//! The upstream reverse proxy has already authenticated the user and
//! forwards the identity headers. This handler resolves credentials for
//! that identity and answers with the `Authorization` header the proxy
//! injects into the original request towards Elasticsearch.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::errors::GatewayError;
use crate::identity::IdentityError;
use crate::state::GatewayState;

/// Any-method fallback for non-control-plane paths in forward-auth mode.
pub async fn user_traffic(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Response {
    let mode = state.mode().as_str();

    let user = match state.provider.identify(&headers).await {
        Ok(user) => user,
        Err(e) => {
            tracing::debug!(error = %e, "identity extraction failed");
            crate::metrics::record_request(mode, "unauthorized");
            return classify(e).with_mode(mode).into_response();
        }
    };

    let credentials = match state.credentials.credentials_for(&user).await {
        Ok(credentials) => credentials,
        Err(e) => {
            crate::metrics::record_request(mode, "error");
            return e.with_mode(mode).into_response();
        }
    };

    let header_value = match HeaderValue::from_str(&credentials.header_value()) {
        Ok(value) => value,
        Err(e) => {
            crate::metrics::record_request(mode, "error");
            return GatewayError::Internal(format!("credential header unusable: {e}"))
                .with_mode(mode)
                .into_response();
        }
    };

    crate::metrics::record_request(mode, "ok");
    let mut response = (
        StatusCode::OK,
        Json(json!({ "user": credentials.username })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::AUTHORIZATION, header_value);
    response
}

/// Map identity failures onto the gateway taxonomy.
pub(crate) fn classify(error: IdentityError) -> GatewayError {
    match error {
        IdentityError::MissingCredentials(msg) => GatewayError::IdentityMissing(msg),
        IdentityError::InvalidCredentials(msg) => GatewayError::IdentityInvalid(msg),
        IdentityError::ProviderUnavailable(msg) => GatewayError::IdPUnavailable(msg),
        IdentityError::Internal(msg) => GatewayError::Internal(msg),
    }
}
