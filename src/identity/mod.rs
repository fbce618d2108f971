//! Identity extraction layer.
//!
//! An identity provider turns an incoming request into a canonical user
//! record, or fails with a classified error. Exactly one provider is
//! constructed at startup, selected by the operation mode: the
//! header-trusting provider for forward-auth deployments, the OIDC provider
//! for direct-auth.

use axum::http::HeaderMap;
use thiserror::Error;

pub mod headers;
pub mod oidc;

/// The normalized identity tuple produced by any provider.
///
/// Created fresh on each request, never persisted; it drives the derived
/// Elasticsearch credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Elasticsearch account name and cache key input. Never empty.
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    /// Ordered, duplicate-free group names.
    pub groups: Vec<String>,
}

/// Classified identity extraction failures.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("internal identity error: {0}")]
    Internal(String),
}

/// Request transports a provider can recognize credentials on.
///
/// The router consults this only for the direct-auth redirect decision:
/// a provider that recognizes session cookies gets a login redirect rather
/// than a bare 401 when nothing usable is present.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transport {
    Headers,
    BearerToken,
    SessionCookie,
}

/// The provider contract: request headers in, canonical user out.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Extract the canonical user record from the request, or classify why
    /// that is not possible.
    async fn identify(&self, headers: &HeaderMap) -> Result<UserRecord, IdentityError>;

    /// Whether this provider reads credentials from the given transport.
    fn recognizes(&self, transport: Transport) -> bool;
}

/// Normalize a group list: trim entries, drop empties, and de-duplicate
/// while preserving first-occurrence order.
pub(crate) fn normalize_groups<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut groups = Vec::new();
    for item in raw {
        let trimmed = item.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            groups.push(trimmed.to_string());
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_are_trimmed_deduped_and_ordered() {
        let groups = normalize_groups(["admin", " users ", "", "admin", "ops"]);
        assert_eq!(groups, vec!["admin", "users", "ops"]);
    }
}
