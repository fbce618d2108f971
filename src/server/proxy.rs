//! Transparent proxy engine for direct-auth mode.
//!
//! Forwards the client's request to the configured Elasticsearch URL with
//! the method, path, query, body and non-hop-by-hop headers preserved. The
//! client's own `Authorization` header is always stripped and replaced
//! with the Basic credential minted for this request. Bodies stream in
//! both directions; nothing is buffered whole.
//!
//! Upstream 401/403 answers pass through untouched: they indicate a
//! mis-provisioned user, not a client mistake, and hiding them would only
//! obscure the operator's signal.

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, header},
    response::{IntoResponse, Response},
};
use std::time::{Duration, Instant};
use url::Url;

use crate::config::components::ProxyConfig;
use crate::credentials::BasicCredentials;
use crate::errors::{GatewayError, StartupError};
use crate::es::apply_tls;

/// Cap on the combined size of all request header names and values.
const MAX_HEADER_TOTAL: usize = 64 * 1024;
/// Cap on a single header value.
const MAX_HEADER_VALUE: usize = 16 * 1024;
/// Cap on the raw query string.
const MAX_QUERY: usize = 8 * 1024;

/// Hop-by-hop headers are connection-scoped and never forwarded, in
/// either direction (RFC 9110 §7.6.1).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub struct ProxyEngine {
    http: reqwest::Client,
    target: Url,
}

impl ProxyEngine {
    pub fn new(config: &ProxyConfig) -> Result<Self, StartupError> {
        let target = Url::parse(&config.elasticsearch_url)
            .map_err(|e| StartupError::ConfigError(format!("bad proxy target URL: {e}")))?;

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(config.idle_pool_size)
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_seconds));
        builder = apply_tls(builder, config.tls.as_ref())?;

        let http = builder
            .build()
            .map_err(|e| StartupError::Other(format!("Failed to create proxy client: {e}")))?;

        Ok(Self { http, target })
    }

    /// Forward one request with the injected credential, streaming the
    /// upstream answer back.
    pub async fn forward(&self, credentials: &BasicCredentials, req: Request) -> Response {
        let started = Instant::now();
        let (parts, body) = req.into_parts();

        if let Err(e) = check_request_safety(&parts.headers, parts.uri.query()) {
            return e.into_response();
        }

        let mut url = self.target.clone();
        url.set_path(parts.uri.path());
        url.set_query(parts.uri.query());

        let mut headers = filter_headers(&parts.headers);
        // Never trust a client-supplied credential; ours or nothing.
        headers.remove(header::AUTHORIZATION);
        headers.remove(header::HOST);
        // reqwest frames the streamed body itself.
        headers.remove(header::CONTENT_LENGTH);
        match HeaderValue::from_str(&credentials.header_value()) {
            Ok(value) => {
                headers.insert(header::AUTHORIZATION, value);
            }
            Err(e) => {
                return GatewayError::Internal(format!("credential header unusable: {e}"))
                    .into_response();
            }
        }

        let upstream = self
            .http
            .request(parts.method, url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;

        let upstream = match upstream {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::warn!(error = %e, "proxy upstream timed out");
                crate::metrics::record_proxy(504, elapsed_ms(started));
                return GatewayError::UpstreamTimeout.into_response();
            }
            Err(e) => {
                tracing::warn!(error = %e, "proxy upstream unreachable");
                crate::metrics::record_proxy(502, elapsed_ms(started));
                return GatewayError::UpstreamUnavailable(e.to_string()).into_response();
            }
        };

        let status = upstream.status();
        crate::metrics::record_proxy(status.as_u16(), elapsed_ms(started));

        let mut builder = Response::builder().status(status);
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name) {
                builder = builder.header(name, value);
            }
        }

        builder
            .body(Body::from_stream(upstream.bytes_stream()))
            .unwrap_or_else(|e| {
                GatewayError::Internal(format!("response assembly failed: {e}")).into_response()
            })
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Copy the forwardable subset of the client's headers.
fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            filtered.append(name, value.clone());
        }
    }
    filtered
}

/// Minimal, uniform input safety filter: no control bytes in header
/// values, bounded header and query sizes. Not Elasticsearch-aware.
fn check_request_safety(headers: &HeaderMap, query: Option<&str>) -> Result<(), GatewayError> {
    let mut total = 0usize;
    for (name, value) in headers {
        let bytes = value.as_bytes();
        total += name.as_str().len() + bytes.len();

        if bytes.len() > MAX_HEADER_VALUE {
            return Err(GatewayError::ProxyInputUnsafe(format!(
                "header '{name}' exceeds {MAX_HEADER_VALUE} bytes"
            )));
        }
        if bytes.iter().any(|b| matches!(b, b'\r' | b'\n' | b'\0')) {
            return Err(GatewayError::ProxyInputUnsafe(format!(
                "header '{name}' contains forbidden control bytes"
            )));
        }
    }
    if total > MAX_HEADER_TOTAL {
        return Err(GatewayError::ProxyInputUnsafe(format!(
            "headers exceed {MAX_HEADER_TOTAL} bytes in total"
        )));
    }
    if let Some(query) = query
        && query.len() > MAX_QUERY
    {
        return Err(GatewayError::ProxyInputUnsafe(format!(
            "query string exceeds {MAX_QUERY} bytes"
        )));
    }
    Ok(())
}
