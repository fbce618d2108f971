//! Direct-auth handlers: user traffic, the OIDC callback, and logout.
//!
//! User traffic either rides an authenticated session straight into the
//! transparent proxy, or gets bounced into the OIDC login flow. The
//! session state machine for one browser is:
//!
//! `UNAUTHENTICATED` -> (login initiation, transient cookie with state and
//! PKCE verifier) -> `PENDING` -> (callback success) -> `AUTHENTICATED` ->
//! (cookie expiry or max-age) -> `UNAUTHENTICATED`. Any callback whose
//! state does not match discards the transient session and returns to
//! `UNAUTHENTICATED`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::forward::classify;
use crate::errors::GatewayError;
use crate::identity::{IdentityError, Transport};
use crate::state::GatewayState;

/// Any-method fallback for non-control-plane paths in direct-auth mode.
pub async fn user_traffic(State(state): State<Arc<GatewayState>>, req: Request) -> Response {
    let mode = state.mode().as_str();
    let headers = req.headers().clone();

    match state.provider.identify(&headers).await {
        Ok(user) => {
            let credentials = match state.credentials.credentials_for(&user).await {
                Ok(credentials) => credentials,
                Err(e) => {
                    crate::metrics::record_request(mode, "error");
                    return e.with_mode(mode).into_response();
                }
            };

            let Some(proxy) = state.proxy.as_ref() else {
                crate::metrics::record_request(mode, "error");
                return GatewayError::Internal("proxy engine not constructed".into())
                    .with_mode(mode)
                    .into_response();
            };

            crate::metrics::record_request(mode, "ok");
            proxy.forward(&credentials, req).await
        }
        Err(IdentityError::MissingCredentials(msg)) => {
            // Only a provider that works off a browser session gets the
            // redirect treatment; anything else is a plain 401.
            if !state.provider.recognizes(Transport::SessionCookie) {
                crate::metrics::record_request(mode, "unauthorized");
                return GatewayError::IdentityMissing(msg)
                    .with_mode(mode)
                    .into_response();
            }
            crate::metrics::record_request(mode, "redirect");
            let original_url = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string());
            begin_login(&state, &original_url).await
        }
        Err(e) => {
            crate::metrics::record_request(mode, "error");
            classify(e).with_mode(mode).into_response()
        }
    }
}

/// Start the OIDC authorization-code flow for a browser.
async fn begin_login(state: &Arc<GatewayState>, original_url: &str) -> Response {
    let mode = state.mode().as_str();
    let (Some(oidc), Some(sessions)) = (state.oidc.as_ref(), state.sessions.as_ref()) else {
        return GatewayError::Internal("OIDC provider not constructed".into())
            .with_mode(mode)
            .into_response();
    };

    let (redirect_url, pending) = match oidc.begin_login(original_url).await {
        Ok(result) => result,
        Err(e) => return e.with_mode(mode).into_response(),
    };

    let cookie = match sessions.seal(&pending) {
        Ok(cookie) => cookie,
        Err(e) => {
            return GatewayError::Internal(format!("session sealing failed: {e}"))
                .with_mode(mode)
                .into_response();
        }
    };

    redirect_with_cookie(&redirect_url, &cookie)
}

/// `GET {base_path}/callback` - complete the authorization-code exchange.
pub async fn callback(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mode = state.mode().as_str();
    let (Some(oidc), Some(sessions)) = (state.oidc.as_ref(), state.sessions.as_ref()) else {
        return GatewayError::Internal("OIDC provider not constructed".into())
            .with_mode(mode)
            .into_response();
    };

    if let Some(error) = query.get("error") {
        tracing::warn!(%error, "identity provider reported a callback error");
    }

    let (Some(code), Some(state_param)) = (query.get("code"), query.get("state")) else {
        return with_cleared_session(
            GatewayError::CallbackMalformed("missing code or state parameter".into())
                .with_mode(mode)
                .into_response(),
            sessions.clear(),
        );
    };

    let session = sessions.open(&headers);
    match oidc.handle_callback(code, state_param, session).await {
        Ok((user, redirect_to)) => {
            let authenticated = crate::session::SessionPayload::authenticated(&user);
            match sessions.seal(&authenticated) {
                Ok(cookie) => redirect_with_cookie(&redirect_to, &cookie),
                Err(e) => GatewayError::Internal(format!("session sealing failed: {e}"))
                    .with_mode(mode)
                    .into_response(),
            }
        }
        Err(e) => {
            // Whatever went wrong, the transient session is spent.
            with_cleared_session(e.with_mode(mode).into_response(), sessions.clear())
        }
    }
}

/// `GET {base_path}/logout` - drop the session cookie.
pub async fn logout(State(state): State<Arc<GatewayState>>) -> Response {
    let Some(sessions) = state.sessions.as_ref() else {
        return Json(json!({"status": "ok"})).into_response();
    };

    let mut response = Json(json!({"status": "ok"})).into_response();
    if let Ok(value) = sessions.clear().parse() {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

/// 302 with a session cookie attached.
fn redirect_with_cookie(location: &str, cookie: &str) -> Response {
    let builder = Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .header(header::SET_COOKIE, cookie);
    builder
        .body(Body::empty())
        .unwrap_or_else(|e| {
            GatewayError::Internal(format!("redirect assembly failed: {e}")).into_response()
        })
}

/// Attach a cookie-clearing header to an error response.
fn with_cleared_session(mut response: Response, clear_cookie: String) -> Response {
    if let Ok(value) = clear_cookie.parse() {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}
