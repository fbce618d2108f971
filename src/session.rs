//! Encrypted cookie sessions for the direct-auth browser flow.
//!
//! The only session state is the cookie itself: the payload is serialized,
//! sealed under the process secret key (AEAD), and base64url-encoded. Any
//! decryption, integrity, or schema error on read is treated as "no
//! session", which sends the browser back through login. All instances
//! sharing the secret key can read each other's cookies, so horizontal
//! scaling needs no session table.

use axum::http::{HeaderMap, header};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::components::SessionConfig;
use crate::crypto::{self, SecretKey};

/// Cookie payload. Two scopes share this shape and the cookie name but
/// never coexist populated: a pre-auth transient session (`state`,
/// `pkce_verifier`, `original_url`) and a post-auth user session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionPayload {
    #[serde(default)]
    pub authenticated: bool,

    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,

    /// Login-flow CSRF token; cleared once the callback completes.
    #[serde(default)]
    pub state: Option<String>,
    /// PKCE code verifier; cleared once the callback completes.
    #[serde(default)]
    pub pkce_verifier: Option<String>,
    /// Where to send the browser after a successful callback.
    #[serde(default)]
    pub original_url: Option<String>,

    /// Unix seconds at issuance; checked against the session duration on
    /// every read as defense-in-depth beyond the cookie Max-Age.
    #[serde(default)]
    pub issued_at: i64,
}

impl SessionPayload {
    /// Build the transient pre-auth session for a login in flight.
    pub fn pending(state: String, pkce_verifier: String, original_url: String) -> Self {
        Self {
            state: Some(state),
            pkce_verifier: Some(pkce_verifier),
            original_url: Some(original_url),
            issued_at: Utc::now().timestamp(),
            ..Default::default()
        }
    }

    /// Build the authenticated session for a verified user, with the
    /// transient login fields cleared.
    pub fn authenticated(user: &crate::identity::UserRecord) -> Self {
        Self {
            authenticated: true,
            username: Some(user.username.clone()),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            groups: user.groups.clone(),
            issued_at: Utc::now().timestamp(),
            ..Default::default()
        }
    }
}

/// Seals and opens the session cookie.
#[derive(Clone)]
pub struct SessionStore {
    key: SecretKey,
    cookie_name: String,
    duration_seconds: u64,
}

impl SessionStore {
    pub fn new(key: SecretKey, config: &SessionConfig) -> Self {
        Self {
            key,
            cookie_name: config.cookie_name.clone(),
            duration_seconds: config.duration_seconds,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Serialize and seal a payload into a full `Set-Cookie` value.
    pub fn seal(&self, payload: &SessionPayload) -> Result<String, crate::crypto::CryptoError> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| crate::crypto::CryptoError::EncryptionFailed(e.to_string()))?;
        let value = crypto::seal_b64(&self.key, &bytes)?;
        Ok(format!(
            "{}={}; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age={}",
            self.cookie_name, value, self.duration_seconds
        ))
    }

    /// A `Set-Cookie` value that deletes the session cookie.
    pub fn clear(&self) -> String {
        format!(
            "{}=deleted; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=0",
            self.cookie_name
        )
    }

    /// Read the session from the request, if any.
    ///
    /// Returns `None` for absent cookies, undecryptable or tampered values,
    /// schema mismatches, and authenticated sessions past their duration.
    pub fn open(&self, headers: &HeaderMap) -> Option<SessionPayload> {
        let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
        let value = cookie_header
            .split(';')
            .find_map(|pair| pair.trim().strip_prefix(&format!("{}=", self.cookie_name)))?;

        let bytes = crypto::open_b64(&self.key, value).ok()?;
        let payload: SessionPayload = serde_json::from_slice(&bytes).ok()?;

        // Server-side expiry check; the cookie Max-Age is advisory once the
        // value has left our hands.
        if payload.authenticated {
            let age = Utc::now().timestamp() - payload.issued_at;
            if age < 0 || age as u64 >= self.duration_seconds {
                tracing::debug!("session expired at read time");
                return None;
            }
        }

        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UserRecord;
    use axum::http::HeaderValue;

    fn store() -> SessionStore {
        SessionStore::new(SecretKey::from_bytes([3u8; 32]), &SessionConfig::default())
    }

    fn request_with_cookie(set_cookie: &str) -> HeaderMap {
        // Turn a Set-Cookie value into the Cookie header a browser would send.
        let pair = set_cookie.split(';').next().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(pair).unwrap());
        headers
    }

    fn test_user() -> UserRecord {
        UserRecord {
            username: "bob".into(),
            email: Some("b@e.x".into()),
            full_name: Some("Bob".into()),
            groups: vec!["dev".into()],
        }
    }

    #[test]
    fn roundtrip_authenticated_session() {
        let store = store();
        let sealed = store.seal(&SessionPayload::authenticated(&test_user())).unwrap();
        assert!(sealed.contains("HttpOnly"));
        assert!(sealed.contains("Secure"));
        assert!(sealed.contains("SameSite=Lax"));

        let opened = store.open(&request_with_cookie(&sealed)).expect("session");
        assert!(opened.authenticated);
        assert_eq!(opened.username.as_deref(), Some("bob"));
        assert_eq!(opened.groups, vec!["dev"]);
        assert!(opened.state.is_none());
        assert!(opened.pkce_verifier.is_none());
    }

    #[test]
    fn roundtrip_pending_session() {
        let store = store();
        let pending = SessionPayload::pending("st".into(), "ver".into(), "/orig?q=1".into());
        let sealed = store.seal(&pending).unwrap();
        let opened = store.open(&request_with_cookie(&sealed)).expect("session");
        assert!(!opened.authenticated);
        assert_eq!(opened.state.as_deref(), Some("st"));
        assert_eq!(opened.pkce_verifier.as_deref(), Some("ver"));
        assert_eq!(opened.original_url.as_deref(), Some("/orig?q=1"));
    }

    #[test]
    fn tampered_cookie_reads_as_no_session() {
        let store = store();
        let sealed = store.seal(&SessionPayload::authenticated(&test_user())).unwrap();
        let pair = sealed.split(';').next().unwrap();
        let mut tampered = pair.to_string();
        tampered.pop();
        tampered.push('A');

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(&tampered).unwrap());
        assert!(store.open(&headers).is_none());
    }

    #[test]
    fn wrong_key_reads_as_no_session() {
        let sealed = store().seal(&SessionPayload::authenticated(&test_user())).unwrap();
        let other = SessionStore::new(SecretKey::from_bytes([4u8; 32]), &SessionConfig::default());
        assert!(other.open(&request_with_cookie(&sealed)).is_none());
    }

    #[test]
    fn expired_session_reads_as_no_session() {
        let store = store();
        let mut payload = SessionPayload::authenticated(&test_user());
        payload.issued_at = Utc::now().timestamp() - 7200;
        let sealed = store.seal(&payload).unwrap();
        assert!(store.open(&request_with_cookie(&sealed)).is_none());
    }

    #[test]
    fn absent_cookie_is_none() {
        assert!(store().open(&HeaderMap::new()).is_none());
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let clear = store().clear();
        assert!(clear.contains("Max-Age=0"));
        assert!(clear.starts_with("elastauth_session="));
    }
}
