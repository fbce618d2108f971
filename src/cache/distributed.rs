//! Distributed credential cache over the Redis protocol.
//!
//! All gateway instances sharing this backend must share the secret key,
//! since the stored values are ciphertext under that key. Expiry is
//! delegated to the server via per-key TTLs.

use fred::prelude::*;
use fred::types::Expiration;
use std::time::Duration;

use super::{CacheError, CredentialCache};
use crate::errors::StartupError;

pub struct DistributedCache {
    client: Client,
}

impl DistributedCache {
    /// Connect eagerly so a bad URL or unreachable server fails startup.
    pub async fn connect(url: &str) -> Result<Self, StartupError> {
        let config = fred::types::config::Config::from_url(url)
            .map_err(|e| StartupError::CacheUnavailable(format!("invalid cache URL: {e}")))?;
        let client = Client::new(config, None, None, None);
        client.connect();
        client
            .wait_for_connect()
            .await
            .map_err(|e| StartupError::CacheUnavailable(e.to_string()))?;

        tracing::info!("connected to distributed credential cache");
        Ok(Self { client })
    }

    fn ttl_seconds(ttl: Duration) -> i64 {
        // A zero TTL would mean "no expiry" to the server; clamp up so an
        // entry can never outlive its window.
        (ttl.as_secs().max(1)) as i64
    }
}

#[async_trait::async_trait]
impl CredentialCache for DistributedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value: Option<String> = self
            .client
            .get(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let _: () = self
            .client
            .set(
                key,
                value,
                Some(Expiration::EX(Self::ttl_seconds(ttl))),
                None,
                false,
            )
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn healthy(&self) -> bool {
        // Any cheap round-trip works as a liveness probe.
        let probe: Result<i64, _> = self.client.exists("elastauth-healthcheck").await;
        probe.is_ok()
    }
}
