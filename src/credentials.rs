//! Credential lifecycle manager.
//!
//! Turns a canonical user record into an HTTP Basic credential for the
//! same username: on a cache hit the stored ciphertext is decrypted, on a
//! miss a fresh ephemeral password is minted, the Elasticsearch user is
//! upserted with the derived role set, and the encrypted password is
//! cached for the TTL window.
//!
//! Concurrent requests for the same username may each mint a password and
//! upsert independently; the last writer wins at Elasticsearch and in the
//! cache, and every requester receives credentials matching what it wrote
//! or read. Upserts are idempotent and the TTL bounds churn, so no
//! cross-process lock is taken.
//!
//! TODO: an in-process per-key single-flight would trim the duplicate
//! upserts a cold-start thundering herd produces.

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::CredentialCache;
use crate::config::components::{CacheConfig, RolesConfig};
use crate::crypto::{self, SecretKey};
use crate::errors::GatewayError;
use crate::es::{EsClient, EsError, EsUser};
use crate::identity::UserRecord;

/// Basic credential pair handed back to the router or proxy.
#[derive(Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// The password stays out of `{:?}` output no matter who logs it.
impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl BasicCredentials {
    /// The full `Authorization` header value.
    pub fn header_value(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

pub struct CredentialManager {
    cache: Arc<dyn CredentialCache>,
    es: Arc<EsClient>,
    key: SecretKey,
    roles: RolesConfig,
    key_prefix: String,
    ttl: Duration,
    extend_cache: bool,
    dry_run: bool,
}

impl CredentialManager {
    pub fn new(
        cache: Arc<dyn CredentialCache>,
        es: Arc<EsClient>,
        key: SecretKey,
        roles: RolesConfig,
        cache_config: &CacheConfig,
        dry_run: bool,
    ) -> Self {
        Self {
            cache,
            es,
            key,
            roles,
            key_prefix: cache_config.key_prefix.clone(),
            ttl: Duration::from_secs(cache_config.expiration_seconds),
            extend_cache: cache_config.extend_cache,
            dry_run,
        }
    }

    /// Cache key for a username: namespace prefix plus a stable URL-safe
    /// encoding, so arbitrary usernames stay filename- and key-safe and
    /// tenants can share a backend.
    pub fn cache_key(&self, username: &str) -> String {
        format!("{}-{}", self.key_prefix, URL_SAFE_NO_PAD.encode(username))
    }

    /// Derive the role set: `default_roles` plus the union of mapped roles
    /// for each of the user's groups. Deterministic, order-preserving,
    /// duplicate-free; unmapped groups contribute nothing.
    pub fn roles_for(&self, user: &UserRecord) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut roles = Vec::new();

        for role in &self.roles.default_roles {
            if seen.insert(role.clone()) {
                roles.push(role.clone());
            }
        }
        for group in &user.groups {
            if let Some(mapped) = self.roles.group_mappings.get(group) {
                for role in mapped {
                    if seen.insert(role.clone()) {
                        roles.push(role.clone());
                    }
                }
            }
        }
        roles
    }

    /// Resolve credentials for a user, provisioning on cache miss.
    pub async fn credentials_for(
        &self,
        user: &UserRecord,
    ) -> Result<BasicCredentials, GatewayError> {
        let cache_key = self.cache_key(&user.username);

        if let Some(password) = self.cached_password(&cache_key).await {
            crate::metrics::record_credential_cache("hit");
            if self.extend_cache {
                if let Ok(sealed) = crypto::seal_hex(&self.key, &password)
                    && let Err(e) = self.cache.extend_ttl(&cache_key, &sealed, self.ttl).await
                {
                    tracing::warn!(error = %e, "cache TTL extension failed");
                }
            }
            return Ok(BasicCredentials {
                username: user.username.clone(),
                password,
            });
        }
        crate::metrics::record_credential_cache("miss");

        // Fresh provisioning: mint, upsert, then cache. The cache write
        // comes last so a present entry always implies a completed upsert.
        let password = crypto::generate_password();
        let roles = self.roles_for(user);

        if self.dry_run {
            tracing::info!(user = %user.username, "dry run: skipping user upsert");
        } else {
            self.es
                .put_user(&EsUser {
                    username: user.username.clone(),
                    password: password.clone(),
                    roles,
                    email: user.email.clone(),
                    full_name: user.full_name.clone(),
                })
                .await
                .map_err(|e| match e {
                    EsError::Unavailable(msg) => GatewayError::UpstreamUnavailable(msg),
                    EsError::Rejected(status) => GatewayError::Internal(format!(
                        "elasticsearch rejected the user upsert with status {status}"
                    )),
                })?;
            crate::metrics::record_user_provisioned();
        }

        match crypto::seal_hex(&self.key, &password) {
            Ok(sealed) => {
                // Write errors degrade to a miss on the next request; the
                // current request still succeeds.
                if let Err(e) = self.cache.set(&cache_key, &sealed, self.ttl).await {
                    tracing::warn!(error = %e, "credential cache write failed");
                    crate::metrics::record_cache_degraded();
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "credential encryption failed; not caching");
            }
        }

        Ok(BasicCredentials {
            username: user.username.clone(),
            password,
        })
    }

    /// Read and decrypt the cached password, treating every failure mode
    /// (backend error, undecryptable entry) as a miss.
    async fn cached_password(&self, cache_key: &str) -> Option<String> {
        let sealed = match self.cache.get(cache_key).await {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(error = %e, "cache read failed; continuing degraded");
                crate::metrics::record_cache_degraded();
                return None;
            }
        };

        match crypto::open_hex(&self.key, &sealed) {
            Ok(password) => Some(password),
            Err(e) => {
                // A rotated secret key lands here; re-provision.
                tracing::warn!(error = %e, "cached credential undecryptable; re-provisioning");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::components::ElasticsearchConfig;
    use std::collections::HashMap;

    fn manager(roles: RolesConfig, dry_run: bool) -> CredentialManager {
        let es = EsClient::new(&ElasticsearchConfig {
            hosts: vec!["http://127.0.0.1:1".into()],
            username: "elastic".into(),
            password: "pw".into(),
            ..Default::default()
        })
        .expect("es client");

        CredentialManager::new(
            Arc::new(MemoryCache::new()),
            Arc::new(es),
            SecretKey::from_bytes([9u8; 32]),
            roles,
            &CacheConfig::default(),
            dry_run,
        )
    }

    fn user(groups: &[&str]) -> UserRecord {
        UserRecord {
            username: "alice".into(),
            email: Some("a@e.x".into()),
            full_name: Some("Alice".into()),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    fn roles_config() -> RolesConfig {
        RolesConfig {
            default_roles: vec!["kibana_user".into()],
            group_mappings: HashMap::from([
                ("admin".into(), vec!["superuser".into()]),
                ("ops".into(), vec!["monitoring_user".into(), "kibana_user".into()]),
            ]),
        }
    }

    #[test]
    fn roles_union_default_and_mapped() {
        let mgr = manager(roles_config(), true);
        assert_eq!(
            mgr.roles_for(&user(&["admin", "users"])),
            vec!["kibana_user", "superuser"]
        );
    }

    #[test]
    fn roles_empty_groups_yield_defaults() {
        let mgr = manager(roles_config(), true);
        assert_eq!(mgr.roles_for(&user(&[])), vec!["kibana_user"]);
    }

    #[test]
    fn roles_deduplicate_mapped_defaults() {
        let mgr = manager(roles_config(), true);
        assert_eq!(
            mgr.roles_for(&user(&["ops"])),
            vec!["kibana_user", "monitoring_user"]
        );
    }

    #[test]
    fn roles_unmapped_group_contributes_nothing() {
        let mgr = manager(roles_config(), true);
        assert_eq!(mgr.roles_for(&user(&["strangers"])), vec!["kibana_user"]);
    }

    #[test]
    fn cache_key_is_stable_and_prefixed() {
        let mgr = manager(RolesConfig::default(), true);
        let key = mgr.cache_key("alice");
        assert_eq!(key, mgr.cache_key("alice"));
        assert!(key.starts_with("elastauth-"));
        assert!(!key.contains("alice"), "raw username must not leak into the key");
    }

    #[tokio::test]
    async fn repeated_requests_share_the_cached_password() {
        let mgr = manager(RolesConfig::default(), true);
        let first = mgr.credentials_for(&user(&[])).await.expect("first");
        let second = mgr.credentials_for(&user(&[])).await.expect("second");
        assert_eq!(first.password, second.password);
        assert_eq!(first.username, "alice");
    }

    #[tokio::test]
    async fn dry_run_skips_upsert_but_mints_credentials() {
        // The ES host points at a closed port; only dry_run keeps this
        // from failing, proving no upsert was attempted.
        let mgr = manager(roles_config(), true);
        let creds = mgr.credentials_for(&user(&["admin"])).await.expect("creds");
        assert_eq!(creds.password.len(), 43);
    }

    #[tokio::test]
    async fn unreachable_cluster_is_upstream_unavailable() {
        let mgr = manager(roles_config(), false);
        let err = mgr.credentials_for(&user(&[])).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable(_)));
    }

    #[test]
    fn header_value_is_basic_base64() {
        let creds = BasicCredentials {
            username: "alice".into(),
            password: "pw".into(),
        };
        assert_eq!(creds.header_value(), "Basic YWxpY2U6cHc=");
    }
}
