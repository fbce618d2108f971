//! Gateway error taxonomy and HTTP mappings.
//!
//! Every error that can cross the HTTP boundary is classified here so the
//! handlers map failures to stable status codes and JSON bodies. Startup
//! errors are separate: they are only ever reported once, to the operator,
//! before the process exits.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Errors that abort the process before it starts serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("OIDC discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("TLS material invalid: {0}")]
    TlsInvalid(String),

    #[error("Cache backend unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Other startup error: {0}")]
    Other(String),
}

/// Request-scoped failures, classified per the external error contract.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No credentials were presented where some were required.
    #[error("missing credentials: {0}")]
    IdentityMissing(String),

    /// Credentials were presented but failed validation.
    #[error("invalid credentials: {0}")]
    IdentityInvalid(String),

    /// The OIDC callback request itself was malformed (state mismatch,
    /// missing parameters, undecodable transient session).
    #[error("malformed callback: {0}")]
    CallbackMalformed(String),

    /// The identity provider could not be reached.
    #[error("identity provider unavailable: {0}")]
    IdPUnavailable(String),

    /// Elasticsearch could not be reached.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Elasticsearch did not answer within the configured deadline.
    #[error("upstream timed out")]
    UpstreamTimeout,

    /// The request tripped the proxy input safety filter.
    #[error("unsafe request input: {0}")]
    ProxyInputUnsafe(String),

    /// A bug, not an operational condition.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code included in the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::IdentityMissing(_) => "identity_missing",
            GatewayError::IdentityInvalid(_) => "identity_invalid",
            GatewayError::CallbackMalformed(_) => "callback_malformed",
            GatewayError::IdPUnavailable(_) => "idp_unavailable",
            GatewayError::UpstreamUnavailable(_) => "upstream_unavailable",
            GatewayError::UpstreamTimeout => "upstream_timeout",
            GatewayError::ProxyInputUnsafe(_) => "proxy_input_unsafe",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// HTTP status for this error class.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::IdentityMissing(_) => StatusCode::UNAUTHORIZED,
            GatewayError::IdentityInvalid(_) => StatusCode::UNAUTHORIZED,
            GatewayError::CallbackMalformed(_) => StatusCode::BAD_REQUEST,
            GatewayError::IdPUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::ProxyInputUnsafe(_) => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Attach the active operation mode to the response body.
    pub fn with_mode(self, mode: &str) -> ModedError {
        ModedError {
            error: self,
            mode: Some(mode.to_string()),
        }
    }
}

/// JSON error body returned on every non-2xx response produced locally.
///
/// Proxied upstream responses are passed through verbatim and do not use
/// this shape.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: &'static str,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl ErrorBody {
    pub fn new(error: &GatewayError, mode: Option<String>) -> Self {
        Self {
            message: error.to_string(),
            code: error.code(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            mode,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody::new(&self, None);
        (status, Json(body)).into_response()
    }
}

/// A gateway error annotated with the operation mode for the JSON body.
#[derive(Debug)]
pub struct ModedError {
    pub error: GatewayError,
    pub mode: Option<String>,
}

impl IntoResponse for ModedError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let body = ErrorBody::new(&self.error, self.mode);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(
            GatewayError::IdentityMissing("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::CallbackMalformed("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::UpstreamUnavailable("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::UpstreamTimeout.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn body_carries_code_and_mode() {
        let err = GatewayError::IdentityMissing("no username header".into());
        let body = ErrorBody::new(&err, Some("forward-auth".into()));
        assert_eq!(body.code, "identity_missing");
        assert_eq!(body.mode.as_deref(), Some("forward-auth"));
        assert!(body.message.contains("no username header"));
    }
}
