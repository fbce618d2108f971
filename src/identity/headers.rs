//! Header-trusting identity provider for forward-auth deployments.
//!
//! Reads the user record from headers set by the upstream authenticating
//! proxy (Authelia by default). The headers are trusted unconditionally;
//! the deployment must ensure the listener is reachable only by that proxy,
//! because a directly exposed forward-auth port is a full bypass. No
//! network I/O, no state.

use axum::http::HeaderMap;

use super::{IdentityError, IdentityProvider, Transport, UserRecord, normalize_groups};
use crate::config::components::AutheliaConfig;

/// Extracts the canonical user from four configured header names.
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    config: AutheliaConfig,
}

impl HeaderIdentity {
    pub fn new(config: AutheliaConfig) -> Self {
        Self { config }
    }

    fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
        headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[async_trait::async_trait]
impl IdentityProvider for HeaderIdentity {
    async fn identify(&self, headers: &HeaderMap) -> Result<UserRecord, IdentityError> {
        let username = Self::header_str(headers, &self.config.header_username)
            .map(str::trim)
            .unwrap_or("");
        if username.is_empty() {
            return Err(IdentityError::MissingCredentials(format!(
                "header {} absent or empty",
                self.config.header_username
            )));
        }

        // Groups header is comma-separated; empty tokens are discarded,
        // order preserved, duplicates removed at first occurrence.
        let groups = Self::header_str(headers, &self.config.header_groups)
            .map(|raw| normalize_groups(raw.split(',')))
            .unwrap_or_default();

        let email = Self::header_str(headers, &self.config.header_email)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let full_name = Self::header_str(headers, &self.config.header_name)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        tracing::debug!(user = %username, groups = groups.len(), "identity from trusted headers");

        Ok(UserRecord {
            username: username.to_string(),
            email,
            full_name,
            groups,
        })
    }

    fn recognizes(&self, transport: Transport) -> bool {
        matches!(transport, Transport::Headers)
    }
}
