//! HTTP service implementation - router assembly and server startup.

use anyhow::{Context, bail};
use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::{fs, net::SocketAddr, sync::Arc, time::Duration};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::{
    config::OperationMode,
    server::handlers::{config as config_handler, direct, forward, health},
    state::{ApplicationState, GatewayState},
};

/// Assemble the router: control-plane routes under the base path, the
/// OIDC callback and logout in direct-auth, and everything else dispatched
/// as user traffic according to the operation mode.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let base = state.config.base_path.clone();

    let mut router = Router::new()
        .route(&format!("{base}/health"), get(health::health))
        .route(&format!("{base}/live"), get(health::health))
        .route(&format!("{base}/ready"), get(health::ready))
        .route(&format!("{base}/config"), get(config_handler::config_view));

    #[cfg(feature = "prometheus")]
    {
        router = router.route(&format!("{base}/metrics"), get(metrics_handler));
    }

    router = match state.mode() {
        OperationMode::ForwardAuth => router.fallback(forward::user_traffic),
        OperationMode::DirectAuth => router
            .route(&format!("{base}/callback"), get(direct::callback))
            .route(&format!("{base}/logout"), get(direct::logout))
            .fallback(direct::user_traffic),
    };

    router
        .layer(middleware::from_fn(with_request_id))
        .with_state(state)
}

/// Handler for the Prometheus metrics endpoint.
///
/// Thin adapter over the process-wide recorder; only mounted when the
/// `prometheus` feature is enabled.
#[cfg(feature = "prometheus")]
pub async fn metrics_handler() -> axum::response::Response {
    use http_body_util::BodyExt;

    let hyper_response = crate::metrics::handler::make_metrics_response();

    // Convert hyper response to axum response
    let (parts, body) = hyper_response.into_parts();
    let body_bytes = body.collect().await.unwrap().to_bytes();

    Response::builder()
        .status(parts.status)
        .header(
            "content-type",
            parts
                .headers
                .get("content-type")
                .unwrap_or(&"text/plain".parse().unwrap()),
        )
        .body(axum::body::Body::from(body_bytes))
        .unwrap()
}

/// Middleware attaching a request id to every log line of a request.
///
/// The id is minted here, not taken from the client, so it cannot be
/// spoofed into unrelated log streams.
async fn with_request_id(req: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!(
        "request",
        id = %request_id,
        method = %req.method(),
        path = %req.uri().path()
    );

    async move {
        let response = next.run(req).await;
        tracing::debug!(status = %response.status(), "request complete");
        response
    }
    .instrument(span)
    .await
}

/// TLS certificate and key material.
struct TlsMaterial {
    /// PEM-encoded certificate chain.
    certs: Vec<u8>,
    /// PEM-encoded private key.
    key: Vec<u8>,
}

/// Loads inbound TLS material from configuration, if configured.
fn get_tls_key_material(state: &GatewayState) -> anyhow::Result<TlsMaterial> {
    let Some(tls) = state.config.server.tls.as_ref() else {
        bail!("No TLS configuration");
    };

    let cert_bytes =
        fs::read(&tls.cert).context(format!("Failed to read cert file {}", tls.cert))?;
    let key_bytes = fs::read(&tls.key).context(format!("Failed to read key file {}", tls.key))?;

    if cert_bytes.is_empty() || key_bytes.is_empty() {
        bail!("Key or cert is empty")
    }

    Ok(TlsMaterial {
        certs: cert_bytes,
        key: key_bytes,
    })
}

/// Build a TLS acceptor from the configured material, or `None` for plain
/// HTTP.
fn build_tls_acceptor(state: &GatewayState) -> anyhow::Result<Option<Arc<TlsAcceptor>>> {
    if state.config.server.tls.is_none() {
        return Ok(None);
    }

    let material = get_tls_key_material(state)?;
    let certs = rustls_pemfile::certs(&mut material.certs.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to parse certificates")?;
    let key = rustls_pemfile::private_key(&mut material.key.as_slice())
        .context("Failed to parse private key")?
        .context("No private key found")?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Failed to build TLS config")?;

    Ok(Some(Arc::new(TlsAcceptor::from(Arc::new(config)))))
}

/// Main entry point for serving: binds the listener, runs until a
/// shutdown signal, then grants in-flight requests the configured grace
/// period before forcing termination.
pub async fn start(state: Arc<GatewayState>) -> anyhow::Result<()> {
    state.set_state(ApplicationState::StartingNetwork);

    let router = build_router(state.clone());
    let bind_address = state.config.server.bind_address.clone();
    let grace = Duration::from_secs(state.config.server.shutdown_grace_seconds);
    let tls_acceptor = build_tls_acceptor(&state)?;

    let shutdown = CancellationToken::new();
    let server_token = shutdown.clone();
    let server_state = state.clone();
    let mut handle = tokio::spawn(async move {
        if let Err(e) = run_server(router, bind_address, tls_acceptor, server_token, server_state).await
        {
            tracing::error!("Server error: {:?}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            state.set_state(ApplicationState::Terminating);
            shutdown.cancel();
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                tracing::warn!("Grace period elapsed; aborting in-flight requests");
                handle.abort();
                let _ = handle.await;
            }
        }
        res = &mut handle => {
            match res {
                Ok(()) => tracing::debug!("Server exited normally"),
                Err(e) => tracing::error!("Server task panicked: {:?}", e),
            }
        }
    }

    Ok(())
}

/// Runs the listener loop, with TLS when configured.
async fn run_server(
    router: Router,
    addr: String,
    tls_acceptor: Option<Arc<TlsAcceptor>>,
    shutdown: CancellationToken,
    state: Arc<GatewayState>,
) -> anyhow::Result<()> {
    let sock_addr = resolve_bind_addr(&addr)?;

    // Add tracing layer for request logging
    let app = router.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(sock_addr).await?;

    if let Some(acceptor) = tls_acceptor {
        state.set_state(ApplicationState::Ready);
        tracing::info!("Starting TLS server on https://{}", sock_addr);

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, _) = accepted?;
            let acceptor = acceptor.clone();
            let app = app.clone();

            tokio::spawn(async move {
                let tls_stream = match acceptor.accept(stream).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!("TLS accept failed: {}", e);
                        return;
                    }
                };
                let service = TowerToHyperService::new(app);
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(tls_stream), service)
                    .await;
            });
        }
        Ok(())
    } else {
        state.set_state(ApplicationState::Ready);
        tracing::info!("Starting plain HTTP server on http://{}", sock_addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}

/// Resolve a "host:port" string to a SocketAddr, allowing hostnames like
/// "localhost:8080".
fn resolve_bind_addr(addr: &str) -> anyhow::Result<SocketAddr> {
    use std::net::ToSocketAddrs;
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow::anyhow!("No address found for {}", addr))
}
