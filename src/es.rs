//! Elasticsearch admin client.
//!
//! Talks to the security API with the configured admin account. Hosts are
//! tried in declared order with a bounded per-host timeout: connection
//! class failures fail over to the next host, HTTP-level answers do not
//! (the cluster spoke; retrying elsewhere would only repeat the answer).

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::components::{ClientTlsConfig, ElasticsearchConfig};
use crate::errors::StartupError;

/// The user object written to `_security/user/{username}`.
#[derive(Debug, Clone, Serialize)]
pub struct EsUser {
    #[serde(skip)]
    pub username: String,
    pub password: String,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// Admin surface failures.
#[derive(Debug, Error)]
pub enum EsError {
    /// No configured host could be reached.
    #[error("elasticsearch unreachable: {0}")]
    Unavailable(String),

    /// Elasticsearch answered with a non-success status.
    #[error("elasticsearch rejected the request: status {0}")]
    Rejected(u16),
}

pub struct EsClient {
    hosts: Vec<String>,
    username: String,
    password: String,
    http: reqwest::Client,
}

impl EsClient {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self, StartupError> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.timeout_seconds));
        builder = apply_tls(builder, config.tls.as_ref())?;
        let http = builder
            .build()
            .map_err(|e| StartupError::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            hosts: config
                .hosts
                .iter()
                .map(|h| h.trim_end_matches('/').to_string())
                .collect(),
            username: config.username.clone(),
            password: config.password.clone(),
            http,
        })
    }

    /// Idempotent upsert of a managed user.
    ///
    /// The same logical user record converges to the same Elasticsearch
    /// state; only the password rotates with the cache TTL.
    pub async fn put_user(&self, user: &EsUser) -> Result<(), EsError> {
        let encoded_name = urlencoding::encode(&user.username);
        let mut last_error = String::new();

        for host in &self.hosts {
            let url = format!("{host}/_security/user/{encoded_name}");
            let result = self
                .http
                .put(&url)
                .basic_auth(&self.username, Some(&self.password))
                .json(user)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(user = %user.username, host = %host, "user upsert succeeded");
                    return Ok(());
                }
                Ok(response) => {
                    // The cluster answered; failing over would repeat it.
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    tracing::error!(
                        user = %user.username,
                        host = %host,
                        %status,
                        body = %truncate(&body, 256),
                        "user upsert rejected"
                    );
                    return Err(EsError::Rejected(status.as_u16()));
                }
                Err(e) => {
                    tracing::warn!(host = %host, error = %e, "host unreachable, failing over");
                    last_error = e.to_string();
                }
            }
        }

        Err(EsError::Unavailable(format!(
            "all {} host(s) failed, last error: {last_error}",
            self.hosts.len()
        )))
    }

    /// Whether any configured host currently answers. Feeds readiness.
    pub async fn ping(&self) -> bool {
        for host in &self.hosts {
            let result = self
                .http
                .get(host)
                .basic_auth(&self.username, Some(&self.password))
                .send()
                .await;
            if result.is_ok() {
                return true;
            }
        }
        false
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Apply outbound TLS options to a client builder. Shared with the proxy
/// engine, which carries its own pool settings.
pub(crate) fn apply_tls(
    mut builder: reqwest::ClientBuilder,
    tls: Option<&ClientTlsConfig>,
) -> Result<reqwest::ClientBuilder, StartupError> {
    let Some(tls) = tls.filter(|t| t.enabled) else {
        return Ok(builder);
    };

    if let Some(ca_path) = tls.ca_cert.as_ref() {
        let pem = std::fs::read(ca_path)
            .map_err(|e| StartupError::TlsInvalid(format!("cannot read {ca_path}: {e}")))?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| StartupError::TlsInvalid(format!("bad CA certificate {ca_path}: {e}")))?;
        builder = builder.add_root_certificate(cert);
    }

    if let (Some(cert_path), Some(key_path)) = (tls.client_cert.as_ref(), tls.client_key.as_ref())
    {
        let mut pem = std::fs::read(cert_path)
            .map_err(|e| StartupError::TlsInvalid(format!("cannot read {cert_path}: {e}")))?;
        let key = std::fs::read(key_path)
            .map_err(|e| StartupError::TlsInvalid(format!("cannot read {key_path}: {e}")))?;
        pem.extend_from_slice(&key);
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| StartupError::TlsInvalid(format!("bad client identity: {e}")))?;
        builder = builder.identity(identity);
    }

    if tls.insecure_skip_verify {
        tracing::warn!("certificate verification disabled; local development only");
        builder = builder.danger_accept_invalid_certs(true);
    }

    Ok(builder)
}
