/// Elastauth configuration components module.
///
/// This module defines user-facing configuration structures and enums for
/// the gateway. It provides the building blocks for the root
/// `ElastauthConfig` in `mod.rs`; cross-field rules live in `validate.rs`.
use super::defaults;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported operation modes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationMode {
    /// An upstream reverse proxy authenticates; the gateway answers with an
    /// `Authorization` header for the proxy to inject downstream.
    ForwardAuth,
    /// The gateway authenticates via OIDC and transparently proxies to
    /// Elasticsearch itself.
    DirectAuth,
}

impl OperationMode {
    /// Canonical kebab-case name as used in configuration and responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMode::ForwardAuth => "forward-auth",
            OperationMode::DirectAuth => "direct-auth",
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the gateway listener.
    #[serde(default = "defaults::default_bind_address")]
    pub bind_address: String,

    /// Optional inbound TLS material (PEM paths). Absent means plain HTTP.
    #[serde(default)]
    pub tls: Option<ServerTlsConfig>,

    /// Seconds granted to in-flight requests after a shutdown signal.
    #[serde(default = "defaults::default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: defaults::default_bind_address(),
            tls: None,
            shutdown_grace_seconds: defaults::default_shutdown_grace(),
        }
    }
}

/// Inbound TLS certificate and key file paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTlsConfig {
    pub cert: String,
    pub key: String,
}

/// Elasticsearch admin connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    /// Hosts tried in declared order on connection-class failures.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Admin account used for the security API.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,

    /// Per-host request timeout.
    #[serde(default = "defaults::default_es_timeout")]
    pub timeout_seconds: u64,

    /// Outbound TLS options for the admin surface.
    #[serde(default)]
    pub tls: Option<ClientTlsConfig>,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            username: String::new(),
            password: String::new(),
            timeout_seconds: defaults::default_es_timeout(),
            tls: None,
        }
    }
}

/// Outbound TLS options shared by the admin client and the proxy engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientTlsConfig {
    #[serde(default = "defaults::default_false")]
    pub enabled: bool,

    /// Path to a PEM CA bundle to trust in addition to system roots.
    #[serde(default)]
    pub ca_cert: Option<String>,

    /// Client certificate and key, both or neither.
    #[serde(default)]
    pub client_cert: Option<String>,
    #[serde(default)]
    pub client_key: Option<String>,

    /// Disable certificate verification. Local development only.
    #[serde(default = "defaults::default_false")]
    pub insecure_skip_verify: bool,
}

/// Credential cache backend selection.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// In-process map. Single instance deployments only.
    #[default]
    Memory,
    /// One ciphertext file per key under `cache.file.path`.
    File,
    /// Shared key-value store (Redis protocol).
    Distributed,
}

/// Credential cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default, rename = "type")]
    pub backend: CacheBackend,

    /// TTL for cached credentials, in seconds.
    #[serde(default = "defaults::default_cache_expiration")]
    pub expiration_seconds: u64,

    /// Rewrite entries with a fresh TTL on every hit (sliding expiry).
    /// Off by default: an always-active user should still re-provision.
    #[serde(default = "defaults::default_false")]
    pub extend_cache: bool,

    /// Namespace prefix so multiple tenants can share a backend.
    #[serde(default = "defaults::default_key_prefix")]
    pub key_prefix: String,

    /// File backend settings, required when `type = file`.
    #[serde(default)]
    pub file: Option<FileCacheConfig>,

    /// Distributed backend settings, required when `type = distributed`.
    #[serde(default)]
    pub distributed: Option<DistributedCacheConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            expiration_seconds: defaults::default_cache_expiration(),
            extend_cache: defaults::default_false(),
            key_prefix: defaults::default_key_prefix(),
            file: None,
            distributed: None,
        }
    }
}

/// File cache backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCacheConfig {
    /// Directory holding one ciphertext file per cache key.
    pub path: String,
}

/// Distributed cache backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedCacheConfig {
    /// Connection URL, e.g. `redis://cache.internal:6379/0`.
    #[serde(default)]
    pub url: String,
}

/// Trusted header names set by the upstream authenticating proxy.
///
/// The defaults match what Authelia forwards. The gateway trusts these
/// unconditionally; network isolation of the listener is the deployer's
/// responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutheliaConfig {
    #[serde(default = "defaults::default_header_username")]
    pub header_username: String,
    #[serde(default = "defaults::default_header_groups")]
    pub header_groups: String,
    #[serde(default = "defaults::default_header_email")]
    pub header_email: String,
    #[serde(default = "defaults::default_header_name")]
    pub header_name: String,
}

impl Default for AutheliaConfig {
    fn default() -> Self {
        Self {
            header_username: defaults::default_header_username(),
            header_groups: defaults::default_header_groups(),
            header_email: defaults::default_header_email(),
            header_name: defaults::default_header_name(),
        }
    }
}

/// OIDC provider configuration for direct-auth mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Issuer base URL; discovery is fetched from its well-known endpoint.
    #[serde(default)]
    pub issuer: String,

    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,

    /// Redirect URL registered with the provider; must resolve to the
    /// gateway's `{base_path}/callback`.
    #[serde(default)]
    pub redirect_url: String,

    /// Scopes requested during login.
    #[serde(default = "defaults::default_scopes")]
    pub scopes: Vec<String>,

    /// Claim paths (dotted) into the ID token for each user field.
    #[serde(default)]
    pub claim_mappings: ClaimMappings,

    /// Optional explicit endpoints, each overriding discovery when set.
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: String::new(),
            scopes: defaults::default_scopes(),
            claim_mappings: ClaimMappings::default(),
            authorization_endpoint: None,
            token_endpoint: None,
            userinfo_endpoint: None,
            jwks_uri: None,
        }
    }
}

/// Dotted claim paths used to build the user record from token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimMappings {
    #[serde(default = "defaults::default_claim_username")]
    pub username: String,
    #[serde(default = "defaults::default_claim_email")]
    pub email: String,
    #[serde(default = "defaults::default_claim_name")]
    pub name: String,
    #[serde(default = "defaults::default_claim_groups")]
    pub groups: String,
}

impl Default for ClaimMappings {
    fn default() -> Self {
        Self {
            username: defaults::default_claim_username(),
            email: defaults::default_claim_email(),
            name: defaults::default_claim_name(),
            groups: defaults::default_claim_groups(),
        }
    }
}

/// Session cookie configuration (direct-auth only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime; enforced by cookie Max-Age and again at read time.
    #[serde(default = "defaults::default_session_duration")]
    pub duration_seconds: u64,

    #[serde(default = "defaults::default_session_cookie_name")]
    pub cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_seconds: defaults::default_session_duration(),
            cookie_name: defaults::default_session_cookie_name(),
        }
    }
}

/// Role derivation settings: every user gets `default_roles`, plus the
/// union of `group_mappings` entries for each group they carry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    #[serde(default)]
    pub default_roles: Vec<String>,
    #[serde(default)]
    pub group_mappings: HashMap<String, Vec<String>>,
}

/// Transparent proxy configuration for direct-auth mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "defaults::default_false")]
    pub enabled: bool,

    /// Elasticsearch URL all user traffic is rewritten to.
    #[serde(default)]
    pub elasticsearch_url: String,

    /// End-to-end deadline for a proxied request.
    #[serde(default = "defaults::default_proxy_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Idle connection pool size per upstream host.
    #[serde(default = "defaults::default_proxy_idle_pool")]
    pub idle_pool_size: usize,

    /// Idle connection timeout.
    #[serde(default = "defaults::default_proxy_idle_timeout")]
    pub idle_timeout_seconds: u64,

    /// Outbound TLS options for the proxy surface.
    #[serde(default)]
    pub tls: Option<ClientTlsConfig>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::default_false(),
            elasticsearch_url: String::new(),
            request_timeout_seconds: defaults::default_proxy_request_timeout(),
            idle_pool_size: defaults::default_proxy_idle_pool(),
            idle_timeout_seconds: defaults::default_proxy_idle_timeout(),
            tls: None,
        }
    }
}
