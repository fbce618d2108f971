//! Credential cache abstraction.
//!
//! Values are opaque ciphertext produced by the credential manager; no
//! backend interprets them. Absence is always distinguishable from an
//! empty value. Backend errors surface to the caller, which treats read
//! errors as misses and write errors as non-fatal (degraded mode).

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::components::{CacheBackend, CacheConfig};
use crate::errors::StartupError;

mod distributed;
mod file;
mod memory;

pub use distributed::DistributedCache;
pub use file::FileCache;
pub use memory::MemoryCache;

/// Backend failures. Never fatal for a request.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Keyed ciphertext storage with TTL.
#[async_trait::async_trait]
pub trait CredentialCache: Send + Sync {
    /// Fetch an entry. `Ok(None)` means the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store an entry with the given TTL, replacing any previous value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Rewrite an entry with a fresh TTL (sliding expiry). The default is
    /// just a `set`; backends with a cheaper native expire may override.
    async fn extend_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.set(key, value, ttl).await
    }

    /// Whether the backend currently answers. Feeds the readiness probe.
    async fn healthy(&self) -> bool;
}

/// Construct the configured backend.
///
/// The distributed backend connects eagerly so a bad cache URL fails at
/// startup rather than on the first credential request.
pub async fn build(config: &CacheConfig) -> Result<Arc<dyn CredentialCache>, StartupError> {
    match config.backend {
        CacheBackend::Memory => {
            tracing::debug!("using in-memory credential cache");
            Ok(Arc::new(MemoryCache::new()))
        }
        CacheBackend::File => {
            let file = config.file.as_ref().ok_or_else(|| {
                StartupError::ConfigError("cache.file missing for file backend".into())
            })?;
            tracing::debug!(path = %file.path, "using file credential cache");
            Ok(Arc::new(FileCache::new(&file.path)?))
        }
        CacheBackend::Distributed => {
            let dist = config.distributed.as_ref().ok_or_else(|| {
                StartupError::ConfigError("cache.distributed missing for distributed backend".into())
            })?;
            tracing::debug!("using distributed credential cache");
            Ok(Arc::new(DistributedCache::connect(&dist.url).await?))
        }
    }
}
