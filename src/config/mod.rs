pub use components::OperationMode;
use serde::{Deserialize, Serialize};
/**
 * Elastauth configuration root module.
 *
 * - Defines the root configuration struct (`ElastauthConfig`) and loading.
 * - Merges, in increasing precedence: struct defaults, config file,
 *   `ELASTAUTH_*` environment variables, CLI overrides.
 * - Uses `components.rs` for types, `defaults.rs` for default helpers and
 *   `validate.rs` for the single post-merge validation pass.
 */
use std::path::PathBuf;
use thiserror::Error;

use components::{
    AutheliaConfig, CacheConfig, ElasticsearchConfig, OidcConfig, ProxyConfig, RolesConfig,
    ServerConfig, SessionConfig,
};

pub mod components;
pub mod defaults;
pub mod validate;

/// Fixed masking sentinel used by the `/config` endpoint.
pub const MASKED: &str = "*****";

// Root configuration for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElastauthConfig {
    /// Selected operation mode. Required; there is no default.
    #[serde(default)]
    pub operation_mode: Option<OperationMode>,

    /// Absolute path prefix for control-plane endpoints.
    #[serde(default = "defaults::default_base_path")]
    pub base_path: String,

    /// 32-byte symmetric key, hex-encoded (64 characters).
    #[serde(default)]
    pub secret_key: String,

    /// Skip Elasticsearch upserts while still minting credentials.
    #[serde(default = "defaults::default_false")]
    pub dry_run: bool,

    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Elasticsearch admin connection.
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,

    /// Credential cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Trusted header names (forward-auth).
    #[serde(default)]
    pub authelia: AutheliaConfig,

    /// OIDC provider settings (direct-auth).
    #[serde(default)]
    pub oidc: Option<OidcConfig>,

    /// Session cookie settings (direct-auth).
    #[serde(default)]
    pub session: SessionConfig,

    /// Role derivation settings.
    #[serde(default)]
    pub roles: RolesConfig,

    /// Transparent proxy settings (direct-auth).
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
}

/// Explicit defaults matching the serde helpers, so a config built in
/// code behaves like one deserialized from empty sources.
impl Default for ElastauthConfig {
    fn default() -> Self {
        Self {
            operation_mode: None,
            base_path: defaults::default_base_path(),
            secret_key: String::new(),
            dry_run: defaults::default_false(),
            server: ServerConfig::default(),
            elasticsearch: ElasticsearchConfig::default(),
            cache: CacheConfig::default(),
            authelia: AutheliaConfig::default(),
            oidc: None,
            session: SessionConfig::default(),
            roles: RolesConfig::default(),
            proxy: None,
        }
    }
}

impl ElastauthConfig {
    /// Compute the default configuration file path.
    pub fn default_path() -> PathBuf {
        PathBuf::from("/")
            .join("etc")
            .join("elastauth")
            .join("config.yaml")
    }

    /// Load config by merging file, environment, and CLI overrides.
    ///
    /// The file is optional; the environment source recognizes variables of
    /// the form `ELASTAUTH_<SECTION>__<FIELD>` (double underscore between
    /// path segments, e.g. `ELASTAUTH_ELASTICSEARCH__PASSWORD`). List-typed
    /// fields accept comma-separated values.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to the configuration file. Uses the
    ///   default path if None.
    /// * `operation_mode` - CLI mode override (highest precedence).
    /// * `bind_address` - CLI listener override.
    /// * `dry_run` - CLI dry-run flag; only overrides when set.
    ///
    /// # Returns
    /// The merged configuration, not yet validated.
    pub fn load_with_overrides(
        config_path: Option<PathBuf>,
        operation_mode: Option<OperationMode>,
        bind_address: Option<String>,
        dry_run: bool,
    ) -> Result<Self, ConfigError> {
        let path = config_path.unwrap_or_else(Self::default_path);

        let mut builder = config::Config::builder();
        if path.exists() {
            tracing::debug!("Reading from configuration file {:?}", path);
            builder = builder.add_source(
                config::File::from(path.clone())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            );
        } else {
            tracing::warn!(
                "No configuration file (checked {:?}), using environment and defaults",
                path
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ELASTAUTH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("elasticsearch.hosts")
                .with_list_parse_key("oidc.scopes")
                .with_list_parse_key("roles.default_roles"),
        );

        let mut cfg: Self = builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        // Apply CLI overrides (highest precedence)
        if let Some(mode) = operation_mode {
            cfg.operation_mode = Some(mode);
        }
        if let Some(addr) = bind_address {
            cfg.server.bind_address = addr;
        }
        if dry_run {
            cfg.dry_run = true;
        }

        Ok(cfg)
    }

    /// Resolved operation mode. Only call after validation.
    pub fn mode(&self) -> OperationMode {
        self.operation_mode
            .expect("operation_mode validated at startup")
    }

    /// Effective configuration with sensitive fields masked, for `/config`.
    ///
    /// Masks every field whose name is known to carry a secret, wherever it
    /// occurs in the tree.
    pub fn masked(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        mask_sensitive(&mut value);
        value
    }
}

/// Field names whose string values are replaced by the masking sentinel.
const SENSITIVE_FIELDS: &[&str] = &["secret_key", "password", "client_secret", "url"];

fn mask_sensitive(value: &mut serde_json::Value) {
    if let serde_json::Value::Object(map) = value {
        for (key, entry) in map.iter_mut() {
            let sensitive = SENSITIVE_FIELDS.contains(&key.as_str());
            match entry {
                serde_json::Value::String(s) if sensitive && !s.is_empty() => {
                    *s = MASKED.to_string();
                }
                other => mask_sensitive(other),
            }
        }
    } else if let serde_json::Value::Array(items) = value {
        for item in items.iter_mut() {
            mask_sensitive(item);
        }
    }
}

// Errors during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or parse configuration sources.
    #[error("Failed to load configuration: {0}")]
    Load(String),

    /// A post-merge validation rule was violated.
    ///
    /// Fields:
    /// - `field`: dotted path of the offending option
    /// - `rule`: human-readable statement of the violated rule
    #[error("Invalid configuration: {field}: {rule}")]
    Invalid { field: String, rule: String },
}
