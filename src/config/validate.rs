//! Post-merge configuration validation.
//!
//! One pass, run once at startup, after all sources are merged. The first
//! violated rule aborts with a message naming the offending field and the
//! rule. Nothing here is recoverable at runtime.

use super::components::{CacheBackend, ClientTlsConfig, OperationMode};
use super::{ConfigError, ElastauthConfig};
use std::path::Path;
use url::Url;

/// Validate the merged configuration.
///
/// Rules are exhaustive for the gateway core: operation mode, base path
/// shape, secret key format, Elasticsearch connection, cache backend
/// completeness, and the mode-gated subtrees.
pub fn validate(cfg: &ElastauthConfig) -> Result<(), ConfigError> {
    let mode = match cfg.operation_mode {
        Some(mode) => mode,
        None => {
            return Err(invalid(
                "operation_mode",
                "required; must be one of forward-auth, direct-auth",
            ));
        }
    };

    validate_base_path(&cfg.base_path)?;
    validate_secret_key(&cfg.secret_key)?;
    validate_elasticsearch(cfg)?;
    validate_cache(cfg)?;

    match mode {
        OperationMode::ForwardAuth => validate_forward_auth(cfg)?,
        OperationMode::DirectAuth => validate_direct_auth(cfg)?,
    }

    if let Some(tls) = cfg.elasticsearch.tls.as_ref() {
        validate_client_tls("elasticsearch.tls", tls)?;
    }
    if let Some(tls) = cfg.server.tls.as_ref() {
        require_readable_file("server.tls.cert", &tls.cert)?;
        require_readable_file("server.tls.key", &tls.key)?;
    }

    Ok(())
}

fn invalid(field: &str, rule: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        rule: rule.to_string(),
    }
}

fn validate_base_path(base_path: &str) -> Result<(), ConfigError> {
    if !base_path.starts_with('/') {
        return Err(invalid("base_path", "must start with '/'"));
    }
    if base_path.ends_with('/') {
        return Err(invalid("base_path", "must not end with '/'"));
    }
    if base_path.contains("//") {
        return Err(invalid("base_path", "must not contain '//'"));
    }
    Ok(())
}

fn validate_secret_key(secret_key: &str) -> Result<(), ConfigError> {
    let hex_lower = secret_key
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    if secret_key.len() != 64 || !hex_lower {
        return Err(invalid(
            "secret_key",
            "must be exactly 64 lowercase hex characters (32 bytes)",
        ));
    }
    Ok(())
}

fn validate_elasticsearch(cfg: &ElastauthConfig) -> Result<(), ConfigError> {
    let es = &cfg.elasticsearch;
    if es.hosts.is_empty() {
        return Err(invalid("elasticsearch.hosts", "must list at least one host"));
    }
    for host in &es.hosts {
        require_absolute_url("elasticsearch.hosts", host)?;
    }
    if es.username.is_empty() {
        return Err(invalid("elasticsearch.username", "must not be empty"));
    }
    if es.password.is_empty() {
        return Err(invalid("elasticsearch.password", "must not be empty"));
    }
    Ok(())
}

fn validate_cache(cfg: &ElastauthConfig) -> Result<(), ConfigError> {
    match cfg.cache.backend {
        CacheBackend::Memory => Ok(()),
        CacheBackend::File => {
            let file = cfg
                .cache
                .file
                .as_ref()
                .ok_or_else(|| invalid("cache.file.path", "required when cache.type = file"))?;
            if file.path.is_empty() {
                return Err(invalid("cache.file.path", "must not be empty"));
            }
            Ok(())
        }
        CacheBackend::Distributed => {
            let dist = cfg.cache.distributed.as_ref().ok_or_else(|| {
                invalid(
                    "cache.distributed.url",
                    "required when cache.type = distributed",
                )
            })?;
            if dist.url.is_empty() {
                return Err(invalid("cache.distributed.url", "must not be empty"));
            }
            require_url_with_schemes("cache.distributed.url", &dist.url, &["redis", "rediss"])?;
            Ok(())
        }
    }
}

fn validate_forward_auth(cfg: &ElastauthConfig) -> Result<(), ConfigError> {
    let headers = [
        ("authelia.header_username", &cfg.authelia.header_username),
        ("authelia.header_groups", &cfg.authelia.header_groups),
        ("authelia.header_email", &cfg.authelia.header_email),
        ("authelia.header_name", &cfg.authelia.header_name),
    ];
    for (field, value) in headers {
        if value.is_empty() {
            return Err(invalid(field, "must not be empty in forward-auth mode"));
        }
    }
    Ok(())
}

fn validate_direct_auth(cfg: &ElastauthConfig) -> Result<(), ConfigError> {
    let oidc = cfg
        .oidc
        .as_ref()
        .ok_or_else(|| invalid("oidc", "required in direct-auth mode"))?;

    require_absolute_url("oidc.issuer", &oidc.issuer)?;
    if oidc.client_id.is_empty() {
        return Err(invalid("oidc.client_id", "must not be empty"));
    }
    if oidc.client_secret.is_empty() {
        return Err(invalid("oidc.client_secret", "must not be empty"));
    }
    if oidc.redirect_url.is_empty() {
        return Err(invalid("oidc.redirect_url", "must not be empty"));
    }
    if oidc.scopes.is_empty() {
        return Err(invalid("oidc.scopes", "must list at least one scope"));
    }

    let mappings = [
        ("oidc.claim_mappings.username", &oidc.claim_mappings.username),
        ("oidc.claim_mappings.email", &oidc.claim_mappings.email),
        ("oidc.claim_mappings.name", &oidc.claim_mappings.name),
        ("oidc.claim_mappings.groups", &oidc.claim_mappings.groups),
    ];
    for (field, value) in mappings {
        if value.is_empty() {
            return Err(invalid(field, "must not be empty"));
        }
    }

    let proxy = cfg
        .proxy
        .as_ref()
        .ok_or_else(|| invalid("proxy", "required in direct-auth mode"))?;
    if !proxy.enabled {
        return Err(invalid(
            "proxy.enabled",
            "must be true in direct-auth mode",
        ));
    }
    require_absolute_url("proxy.elasticsearch_url", &proxy.elasticsearch_url)?;

    if let Some(tls) = proxy.tls.as_ref() {
        validate_client_tls("proxy.tls", tls)?;
    }

    Ok(())
}

/// Validate an outbound TLS block: referenced files must exist and be
/// readable, certificates must parse, and a client cert/key pair must be
/// complete.
fn validate_client_tls(prefix: &str, tls: &ClientTlsConfig) -> Result<(), ConfigError> {
    if !tls.enabled {
        return Ok(());
    }

    match (tls.client_cert.as_ref(), tls.client_key.as_ref()) {
        (Some(_), None) | (None, Some(_)) => {
            return Err(invalid(
                &format!("{prefix}.client_cert"),
                "client_cert and client_key must be both present or both absent",
            ));
        }
        _ => {}
    }

    if let Some(ca) = tls.ca_cert.as_ref() {
        require_parseable_cert(&format!("{prefix}.ca_cert"), ca)?;
    }
    if let Some(cert) = tls.client_cert.as_ref() {
        require_parseable_cert(&format!("{prefix}.client_cert"), cert)?;
    }
    if let Some(key) = tls.client_key.as_ref() {
        require_readable_file(&format!("{prefix}.client_key"), key)?;
    }

    Ok(())
}

fn require_absolute_url(field: &str, value: &str) -> Result<(), ConfigError> {
    require_url_with_schemes(field, value, &["http", "https"])
}

fn require_url_with_schemes(
    field: &str,
    value: &str,
    schemes: &[&str],
) -> Result<(), ConfigError> {
    let parsed = Url::parse(value)
        .map_err(|e| invalid(field, &format!("must be an absolute URL ({e})")))?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(invalid(
            field,
            &format!("must use one of these schemes: {}", schemes.join(", ")),
        ));
    }
    if parsed.host_str().is_none() {
        return Err(invalid(field, "must include a host"));
    }
    Ok(())
}

fn require_readable_file(field: &str, path: &str) -> Result<(), ConfigError> {
    let p = Path::new(path);
    if !p.is_file() {
        return Err(invalid(field, &format!("file not found: {path}")));
    }
    std::fs::read(p).map_err(|e| invalid(field, &format!("unreadable file {path}: {e}")))?;
    Ok(())
}

/// Read and parse a PEM certificate file so misconfigured TLS fails at
/// startup instead of on the first request.
fn require_parseable_cert(field: &str, path: &str) -> Result<(), ConfigError> {
    let bytes = {
        let p = Path::new(path);
        if !p.is_file() {
            return Err(invalid(field, &format!("file not found: {path}")));
        }
        std::fs::read(p).map_err(|e| invalid(field, &format!("unreadable file {path}: {e}")))?
    };

    let (_, pem) = x509_parser::pem::parse_x509_pem(&bytes)
        .map_err(|e| invalid(field, &format!("not a PEM certificate: {e}")))?;
    pem.parse_x509()
        .map_err(|e| invalid(field, &format!("not a valid X.509 certificate: {e}")))?;
    Ok(())
}
