/// Elastauth configuration defaults module.
///
/// Default value helpers for serde deserialization in config structs.
/// Keeping them in one place ensures consistent defaulting across
/// `components.rs` and `mod.rs`, including when entire config blocks are
/// missing from the configuration file.

/// Default gateway bind address.
pub(crate) fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

/// Default base path for control-plane endpoints.
pub(crate) fn default_base_path() -> String {
    "/elastauth".to_string()
}

/// Default false value.
pub(crate) fn default_false() -> bool {
    false
}

/// Default shutdown grace period, seconds.
pub(crate) fn default_shutdown_grace() -> u64 {
    10
}

/// Default Elasticsearch per-host timeout, seconds.
pub(crate) fn default_es_timeout() -> u64 {
    10
}

/// Default credential cache TTL, seconds.
pub(crate) fn default_cache_expiration() -> u64 {
    3600
}

/// Default cache key namespace prefix.
pub(crate) fn default_key_prefix() -> String {
    "elastauth".to_string()
}

// ----------------- Forward-auth header defaults -----------------
// These match the headers Authelia sets on forwarded requests.

pub(crate) fn default_header_username() -> String {
    "Remote-User".to_string()
}

pub(crate) fn default_header_groups() -> String {
    "Remote-Groups".to_string()
}

pub(crate) fn default_header_email() -> String {
    "Remote-Email".to_string()
}

pub(crate) fn default_header_name() -> String {
    "Remote-Name".to_string()
}

// ----------------- OIDC / session defaults -----------------

pub(crate) fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "profile".to_string(),
        "email".to_string(),
        "groups".to_string(),
    ]
}

pub(crate) fn default_claim_username() -> String {
    "preferred_username".to_string()
}

pub(crate) fn default_claim_email() -> String {
    "email".to_string()
}

pub(crate) fn default_claim_name() -> String {
    "name".to_string()
}

pub(crate) fn default_claim_groups() -> String {
    "groups".to_string()
}

pub(crate) fn default_session_duration() -> u64 {
    3600
}

pub(crate) fn default_session_cookie_name() -> String {
    "elastauth_session".to_string()
}

// ----------------- Proxy defaults -----------------

pub(crate) fn default_proxy_request_timeout() -> u64 {
    60
}

pub(crate) fn default_proxy_idle_pool() -> usize {
    32
}

pub(crate) fn default_proxy_idle_timeout() -> u64 {
    90
}
