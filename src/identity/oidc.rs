//! OIDC identity provider for direct-auth mode.
//!
//! Implements the OAuth2 authorization-code flow with PKCE and OpenID
//! Connect ID-token validation:
//!
//! - **Discovery** at startup resolves the authorization, token, userinfo
//!   and JWKS endpoints from the issuer's well-known document; explicit
//!   configuration overrides any of them. Startup discovery failure is
//!   fatal at the call site.
//! - **JWKS** keys are fetched lazily, cached behind a reader-preferring
//!   lock, and refreshed when a token references an unknown key id, with a
//!   rate limit to prevent refresh amplification.
//! - **Login initiation** mints `state` and a PKCE verifier, stores them in
//!   the transient session, and redirects to the authorization endpoint.
//! - **Callback handling** validates `state`, exchanges the code, verifies
//!   the ID token, and maps claims into the canonical user record.
//!
//! On ordinary authenticated requests no network I/O happens at all; the
//! user record comes straight from the sealed session cookie.

use axum::http::HeaderMap;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use openidconnect::{CsrfToken, PkceCodeChallenge};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use super::{IdentityError, IdentityProvider, Transport, UserRecord, normalize_groups};
use crate::config::components::OidcConfig;
use crate::errors::{GatewayError, StartupError};
use crate::session::{SessionPayload, SessionStore};

/// Minimum spacing between JWKS refreshes triggered by unknown key ids.
const JWKS_REFRESH_MIN_INTERVAL: Duration = Duration::from_secs(30);

/// Accepted clock skew for the `iat` claim, seconds.
const IAT_SKEW_SECONDS: i64 = 60;

/// Endpoints resolved from discovery and configuration overrides.
#[derive(Debug, Clone, Default)]
struct Endpoints {
    authorization: Option<String>,
    token: Option<String>,
    userinfo: Option<String>,
    jwks: Option<String>,
}

/// The subset of the discovery document the gateway consumes.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
    userinfo_endpoint: Option<String>,
    jwks_uri: Option<String>,
    #[serde(default)]
    id_token_signing_alg_values_supported: Vec<String>,
}

/// Response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
    access_token: Option<String>,
}

/// The OIDC identity provider.
pub struct OidcIdentity {
    config: OidcConfig,
    http: reqwest::Client,
    sessions: SessionStore,
    endpoints: RwLock<Endpoints>,
    jwks: RwLock<Option<JwkSet>>,
    jwks_refreshed: Mutex<Option<Instant>>,
    /// Signing algorithms the issuer published; empty means unpublished.
    allowed_algs: RwLock<Vec<Algorithm>>,
}

impl OidcIdentity {
    pub fn new(config: OidcConfig, sessions: SessionStore) -> Result<Self, StartupError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StartupError::Other(format!("Failed to create HTTP client: {e}")))?;

        let endpoints = Endpoints {
            authorization: config.authorization_endpoint.clone(),
            token: config.token_endpoint.clone(),
            userinfo: config.userinfo_endpoint.clone(),
            jwks: config.jwks_uri.clone(),
        };

        Ok(Self {
            config,
            http,
            sessions,
            endpoints: RwLock::new(endpoints),
            jwks: RwLock::new(None),
            jwks_refreshed: Mutex::new(None),
            allowed_algs: RwLock::new(Vec::new()),
        })
    }

    /// Fetch the issuer's discovery document and fill in any endpoint not
    /// already pinned by configuration.
    ///
    /// Called once at startup; a failure there is fatal. Per-request JWKS
    /// refreshes handle later endpoint churn.
    pub async fn discover(&self) -> Result<(), StartupError> {
        let well_known = format!(
            "{}/.well-known/openid-configuration",
            self.config.issuer.trim_end_matches('/')
        );

        tracing::debug!(url = %well_known, "fetching OIDC discovery document");
        let doc: DiscoveryDocument = self
            .http
            .get(&well_known)
            .send()
            .await
            .map_err(|e| StartupError::DiscoveryFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| StartupError::DiscoveryFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| StartupError::DiscoveryFailed(format!("invalid document: {e}")))?;

        {
            let mut endpoints = self.endpoints.write().await;
            if endpoints.authorization.is_none() {
                endpoints.authorization = doc.authorization_endpoint;
            }
            if endpoints.token.is_none() {
                endpoints.token = doc.token_endpoint;
            }
            if endpoints.userinfo.is_none() {
                endpoints.userinfo = doc.userinfo_endpoint;
            }
            if endpoints.jwks.is_none() {
                endpoints.jwks = doc.jwks_uri;
            }

            if endpoints.authorization.is_none() {
                return Err(StartupError::DiscoveryFailed(
                    "issuer did not publish an authorization_endpoint".into(),
                ));
            }
            if endpoints.token.is_none() {
                return Err(StartupError::DiscoveryFailed(
                    "issuer did not publish a token_endpoint".into(),
                ));
            }
            if endpoints.jwks.is_none() {
                return Err(StartupError::DiscoveryFailed(
                    "issuer did not publish a jwks_uri".into(),
                ));
            }
        }

        let algs: Vec<Algorithm> = doc
            .id_token_signing_alg_values_supported
            .iter()
            .filter_map(|name| {
                serde_json::from_value(serde_json::Value::String(name.clone())).ok()
            })
            .collect();
        *self.allowed_algs.write().await = algs;

        tracing::info!(issuer = %self.config.issuer, "OIDC discovery complete");
        Ok(())
    }

    /// Begin a login: mint state and PKCE material, and return the
    /// authorization redirect URL plus the transient session to set.
    pub async fn begin_login(
        &self,
        original_url: &str,
    ) -> Result<(String, SessionPayload), GatewayError> {
        let authz = self
            .endpoints
            .read()
            .await
            .authorization
            .clone()
            .ok_or_else(|| GatewayError::Internal("authorization endpoint unresolved".into()))?;

        let state = CsrfToken::new_random();
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();

        let scopes = self.config.scopes.join(" ");
        let url = format!(
            "{}?response_type=code&client_id={}&scope={}&redirect_uri={}&state={}&code_challenge={}&code_challenge_method=S256",
            authz,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&scopes),
            urlencoding::encode(&self.config.redirect_url),
            urlencoding::encode(state.secret()),
            urlencoding::encode(challenge.as_str()),
        );

        let pending = SessionPayload::pending(
            state.secret().clone(),
            verifier.secret().clone(),
            sanitize_return_url(original_url).to_string(),
        );

        tracing::debug!("initiating OIDC login");
        Ok((url, pending))
    }

    /// Complete a callback: validate state, exchange the code, verify the
    /// ID token, and map claims. Returns the user and the post-login
    /// redirect target.
    pub async fn handle_callback(
        &self,
        code: &str,
        state: &str,
        session: Option<SessionPayload>,
    ) -> Result<(UserRecord, String), GatewayError> {
        let session = session.filter(|s| !s.authenticated).ok_or_else(|| {
            GatewayError::CallbackMalformed("no login in progress for this browser".into())
        })?;

        let expected_state = session
            .state
            .as_deref()
            .ok_or_else(|| GatewayError::CallbackMalformed("session carries no state".into()))?;
        if expected_state != state {
            tracing::warn!("OIDC callback state mismatch");
            return Err(GatewayError::CallbackMalformed("state mismatch".into()));
        }

        let verifier = session.pkce_verifier.as_deref().ok_or_else(|| {
            GatewayError::CallbackMalformed("session carries no PKCE verifier".into())
        })?;

        let tokens = self.exchange_code(code, verifier).await?;
        let id_token = tokens.id_token.as_deref().ok_or_else(|| {
            GatewayError::IdentityInvalid("token response carried no id_token".into())
        })?;

        let mut claims = self.verify_id_token(id_token).await?;

        let user = match self.map_claims(&claims) {
            Ok(user) => user,
            Err(IdentityError::MissingCredentials(_)) => {
                // The username claim may only be available from userinfo
                // (e.g. minimal ID tokens). Fetch once and retry.
                self.merge_userinfo(&mut claims, tokens.access_token.as_deref())
                    .await;
                self.map_claims(&claims)
                    .map_err(|e| GatewayError::IdentityInvalid(e.to_string()))?
            }
            Err(e) => return Err(GatewayError::IdentityInvalid(e.to_string())),
        };

        let redirect_to = session
            .original_url
            .as_deref()
            .map(sanitize_return_url)
            .unwrap_or("/")
            .to_string();

        tracing::info!(user = %user.username, "OIDC login complete");
        Ok((user, redirect_to))
    }

    /// Exchange the authorization code at the token endpoint, presenting
    /// the PKCE verifier. Non-2xx answers are invalid-credential failures;
    /// transport errors mean the IdP is unavailable.
    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<TokenResponse, GatewayError> {
        let token_url = self
            .endpoints
            .read()
            .await
            .token
            .clone()
            .ok_or_else(|| GatewayError::Internal("token endpoint unresolved".into()))?;

        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", self.config.redirect_url.as_str());
        params.insert("client_id", self.config.client_id.as_str());
        params.insert("client_secret", self.config.client_secret.as_str());
        params.insert("code_verifier", pkce_verifier);

        let response = self
            .http
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| GatewayError::IdPUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(%status, "token endpoint rejected the code exchange");
            return Err(GatewayError::IdentityInvalid(format!(
                "token endpoint answered {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::IdentityInvalid(format!("invalid token response: {e}")))
    }

    /// Verify an ID token's signature and standard claims, returning the
    /// full claim set for mapping.
    async fn verify_id_token(&self, id_token: &str) -> Result<serde_json::Value, GatewayError> {
        let header = decode_header(id_token)
            .map_err(|e| GatewayError::IdentityInvalid(format!("undecodable token: {e}")))?;

        // The algorithm comes from the JWT header, constrained to what the
        // issuer published. Symmetric algorithms are always rejected: there
        // is no shared secret in this flow.
        if matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(GatewayError::IdentityInvalid(
                "symmetric token algorithms are not accepted".into(),
            ));
        }
        {
            let allowed = self.allowed_algs.read().await;
            if !allowed.is_empty() && !allowed.contains(&header.alg) {
                return Err(GatewayError::IdentityInvalid(format!(
                    "token algorithm {:?} not published by issuer",
                    header.alg
                )));
            }
        }

        let kid = header.kid.as_deref().ok_or_else(|| {
            GatewayError::IdentityInvalid("token header carries no key id".into())
        })?;
        let jwk = self.key_for_kid(kid).await?;
        let decoding_key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| GatewayError::IdentityInvalid(format!("unusable JWK: {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[self.config.client_id.as_str()]);
        validation.set_issuer(&[self.config.issuer.as_str()]);

        let data = decode::<serde_json::Value>(id_token, &decoding_key, &validation)
            .map_err(|e| GatewayError::IdentityInvalid(format!("token validation failed: {e}")))?;
        let claims = data.claims;

        let now = chrono::Utc::now().timestamp();
        if let Some(nbf) = claims.get("nbf").and_then(|v| v.as_i64())
            && nbf > now
        {
            return Err(GatewayError::IdentityInvalid("token not yet valid".into()));
        }
        if let Some(iat) = claims.get("iat").and_then(|v| v.as_i64())
            && iat > now + IAT_SKEW_SECONDS
        {
            return Err(GatewayError::IdentityInvalid(
                "token issued in the future".into(),
            ));
        }

        Ok(claims)
    }

    /// Find the JWK for a key id, refreshing the cached set when the id is
    /// unknown. Refreshes are rate-limited so a flood of bad tokens cannot
    /// hammer the issuer.
    async fn key_for_kid(&self, kid: &str) -> Result<jsonwebtoken::jwk::Jwk, GatewayError> {
        if let Some(jwk) = self.cached_key(kid).await {
            return Ok(jwk);
        }

        self.refresh_jwks().await?;

        self.cached_key(kid).await.ok_or_else(|| {
            GatewayError::IdentityInvalid(format!("no JWK published for key id '{kid}'"))
        })
    }

    async fn cached_key(&self, kid: &str) -> Option<jsonwebtoken::jwk::Jwk> {
        let jwks = self.jwks.read().await;
        jwks.as_ref().and_then(|set| {
            set.keys
                .iter()
                .find(|k| k.common.key_id.as_deref() == Some(kid))
                .cloned()
        })
    }

    /// Fetch the JWKS if the rate limit allows; otherwise keep the cached
    /// set. The refresh timestamp is recorded even on failure so an
    /// unreachable issuer is not retried in a tight loop.
    async fn refresh_jwks(&self) -> Result<(), GatewayError> {
        let mut refreshed = self.jwks_refreshed.lock().await;
        if let Some(last) = *refreshed
            && last.elapsed() < JWKS_REFRESH_MIN_INTERVAL
        {
            tracing::debug!("JWKS refresh suppressed by rate limit");
            return Ok(());
        }
        *refreshed = Some(Instant::now());

        let jwks_uri = self
            .endpoints
            .read()
            .await
            .jwks
            .clone()
            .ok_or_else(|| GatewayError::Internal("JWKS endpoint unresolved".into()))?;

        tracing::debug!(url = %jwks_uri, "refreshing JWKS");
        let set: JwkSet = self
            .http
            .get(&jwks_uri)
            .send()
            .await
            .map_err(|e| GatewayError::IdPUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| GatewayError::IdPUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| GatewayError::IdPUnavailable(format!("invalid JWKS: {e}")))?;

        *self.jwks.write().await = Some(set);
        Ok(())
    }

    /// Fetch the userinfo endpoint and merge its claims under the ID-token
    /// claims (ID-token values win). Best effort; failures leave the claim
    /// set untouched.
    async fn merge_userinfo(&self, claims: &mut serde_json::Value, access_token: Option<&str>) {
        let (Some(userinfo_url), Some(token)) =
            (self.endpoints.read().await.userinfo.clone(), access_token)
        else {
            return;
        };

        let fetched: Result<serde_json::Value, _> = async {
            self.http
                .get(&userinfo_url)
                .bearer_auth(token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
        }
        .await;

        match fetched {
            Ok(serde_json::Value::Object(extra)) => {
                if let serde_json::Value::Object(base) = claims {
                    for (key, value) in extra {
                        base.entry(key).or_insert(value);
                    }
                }
            }
            Ok(_) => tracing::warn!("userinfo endpoint returned a non-object"),
            Err(e) => tracing::warn!(error = %e, "userinfo fetch failed"),
        }
    }

    /// Map verified claims into the canonical user record using the
    /// configured dotted claim paths.
    fn map_claims(&self, claims: &serde_json::Value) -> Result<UserRecord, IdentityError> {
        let mappings = &self.config.claim_mappings;

        let username = lookup_claim(claims, &mappings.username)?
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                IdentityError::MissingCredentials(format!(
                    "claim '{}' absent or empty",
                    mappings.username
                ))
            })?
            .to_string();

        let email = lookup_claim(claims, &mappings.email)?
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let full_name = lookup_claim(claims, &mappings.name)?
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let groups = match lookup_claim(claims, &mappings.groups)? {
            Some(value) => groups_from_claim(value)?,
            None => Vec::new(),
        };

        Ok(UserRecord {
            username,
            email,
            full_name,
            groups,
        })
    }
}

#[async_trait::async_trait]
impl IdentityProvider for OidcIdentity {
    async fn identify(&self, headers: &HeaderMap) -> Result<UserRecord, IdentityError> {
        let session = self
            .sessions
            .open(headers)
            .filter(|s| s.authenticated)
            .ok_or_else(|| {
                IdentityError::MissingCredentials("no authenticated session".into())
            })?;

        let username = session
            .username
            .filter(|u| !u.is_empty())
            .ok_or_else(|| IdentityError::Internal("session carries no username".into()))?;

        Ok(UserRecord {
            username,
            email: session.email,
            full_name: session.full_name,
            groups: session.groups,
        })
    }

    fn recognizes(&self, transport: Transport) -> bool {
        matches!(transport, Transport::SessionCookie)
    }
}

/// Resolve a dotted claim path. Intermediate segments must be objects;
/// anything else is a provider misconfiguration reported as invalid.
fn lookup_claim<'a>(
    claims: &'a serde_json::Value,
    path: &str,
) -> Result<Option<&'a serde_json::Value>, IdentityError> {
    let mut current = claims;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        let object = current.as_object().ok_or_else(|| {
            IdentityError::InvalidCredentials(format!(
                "claim path '{path}': segment before '{segment}' is not an object"
            ))
        })?;
        match object.get(segment) {
            Some(value) => {
                if segments.peek().is_none() {
                    return Ok(Some(value));
                }
                current = value;
            }
            None => return Ok(None),
        }
    }
    Ok(None)
}

/// Extract group names from the three accepted claim shapes: an array of
/// strings, a single string, or an array of objects with a `name` field.
/// Every other shape is rejected explicitly rather than coerced, so a
/// misconfigured provider surfaces instead of silently yielding no groups.
fn groups_from_claim(value: &serde_json::Value) -> Result<Vec<String>, IdentityError> {
    match value {
        serde_json::Value::String(s) => Ok(normalize_groups([s.as_str()])),
        serde_json::Value::Array(items) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    serde_json::Value::String(s) => names.push(s.clone()),
                    serde_json::Value::Object(obj) => {
                        let name = obj.get("name").and_then(|v| v.as_str()).ok_or_else(|| {
                            IdentityError::InvalidCredentials(
                                "groups claim object lacks a string 'name' field".into(),
                            )
                        })?;
                        names.push(name.to_string());
                    }
                    other => {
                        return Err(IdentityError::InvalidCredentials(format!(
                            "unsupported groups claim element: {other}"
                        )));
                    }
                }
            }
            Ok(normalize_groups(names))
        }
        other => Err(IdentityError::InvalidCredentials(format!(
            "unsupported groups claim shape: {other}"
        ))),
    }
}

/// Restrict post-login redirects to same-host relative URLs.
fn sanitize_return_url(url: &str) -> &str {
    if url.starts_with('/') && !url.starts_with("//") {
        url
    } else {
        "/"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_resolves_dotted_paths() {
        let claims = json!({"realm": {"access": {"user": "alice"}}});
        let found = lookup_claim(&claims, "realm.access.user").unwrap();
        assert_eq!(found.unwrap().as_str(), Some("alice"));
    }

    #[test]
    fn lookup_missing_leaf_is_none() {
        let claims = json!({"realm": {}});
        assert!(lookup_claim(&claims, "realm.user").unwrap().is_none());
        assert!(lookup_claim(&claims, "other.user").unwrap().is_none());
    }

    #[test]
    fn lookup_through_non_object_is_invalid() {
        let claims = json!({"realm": "flat"});
        assert!(lookup_claim(&claims, "realm.user").is_err());
    }

    #[test]
    fn groups_accept_string_array() {
        let groups = groups_from_claim(&json!(["dev", "ops", "dev"])).unwrap();
        assert_eq!(groups, vec!["dev", "ops"]);
    }

    #[test]
    fn groups_accept_single_string() {
        let groups = groups_from_claim(&json!("dev")).unwrap();
        assert_eq!(groups, vec!["dev"]);
    }

    #[test]
    fn groups_accept_object_array_with_name() {
        let groups = groups_from_claim(&json!([{"name": "dev"}, {"name": "ops"}])).unwrap();
        assert_eq!(groups, vec!["dev", "ops"]);
    }

    #[test]
    fn groups_reject_other_shapes() {
        assert!(groups_from_claim(&json!(42)).is_err());
        assert!(groups_from_claim(&json!([42])).is_err());
        assert!(groups_from_claim(&json!([{"id": "dev"}])).is_err());
        assert!(groups_from_claim(&json!({"name": "dev"})).is_err());
    }

    #[test]
    fn return_urls_are_confined_to_relative_paths() {
        assert_eq!(sanitize_return_url("/search?q=1"), "/search?q=1");
        assert_eq!(sanitize_return_url("https://evil.example"), "/");
        assert_eq!(sanitize_return_url("//evil.example"), "/");
        assert_eq!(sanitize_return_url(""), "/");
    }
}
