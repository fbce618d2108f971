//! File-backed credential cache.
//!
//! One file per key under the configured directory; contents are a small
//! JSON envelope of ciphertext plus an absolute expiry. Keys are produced
//! by the credential manager and are filename-safe by construction
//! (namespace prefix plus base64url). The directory and files are
//! restricted to the owning user.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{CacheError, CredentialCache};
use crate::errors::StartupError;

#[derive(Serialize, Deserialize)]
struct Envelope {
    value: String,
    /// Unix seconds after which the entry is dead.
    expires_at: i64,
}

pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Create the cache directory if needed and harden its permissions.
    pub fn new(path: &str) -> Result<Self, StartupError> {
        let dir = PathBuf::from(path);
        std::fs::create_dir_all(&dir).map_err(|e| {
            StartupError::CacheUnavailable(format!("cannot create {}: {e}", dir.display()))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&dir, perms).map_err(|e| {
                StartupError::CacheUnavailable(format!(
                    "cannot restrict {}: {e}",
                    dir.display()
                ))
            })?;
        }

        Ok(Self { dir })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn write_entry(path: &Path, envelope: &Envelope) -> Result<(), CacheError> {
        let bytes =
            serde_json::to_vec(envelope).map_err(|e| CacheError::Backend(e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| CacheError::Backend(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms)
                .map_err(|e| CacheError::Backend(e.to_string()))?;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl CredentialCache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.entry_path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Backend(e.to_string())),
        };

        let envelope: Envelope =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::Backend(e.to_string()))?;

        if envelope.expires_at <= chrono::Utc::now().timestamp() {
            // Stale entry; best-effort removal.
            let _ = std::fs::remove_file(&path);
            return Ok(None);
        }

        Ok(Some(envelope.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let envelope = Envelope {
            value: value.to_string(),
            expires_at: chrono::Utc::now().timestamp() + ttl.as_secs() as i64,
        };
        Self::write_entry(&self.entry_path(key), &envelope)
    }

    async fn healthy(&self) -> bool {
        self.dir.is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, FileCache) {
        let td = tempfile::tempdir().expect("tmpdir");
        let cache = FileCache::new(td.path().to_str().unwrap()).expect("cache");
        (td, cache)
    }

    #[tokio::test]
    async fn set_get_roundtrip() {
        let (_td, cache) = cache();
        cache
            .set("elastauth-YWxpY2U", "ciphertext", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get("elastauth-YWxpY2U").await.unwrap().as_deref(),
            Some("ciphertext")
        );
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let (_td, cache) = cache();
        assert_eq!(cache.get("elastauth-bm9wZQ").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entry_is_removed() {
        let (_td, cache) = cache();
        cache
            .set("elastauth-Ym9i", "v", Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(cache.get("elastauth-Ym9i").await.unwrap(), None);
        assert!(!cache.entry_path("elastauth-Ym9i").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn entries_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let (_td, cache) = cache();
        cache
            .set("elastauth-YQ", "v", Duration::from_secs(60))
            .await
            .unwrap();
        let mode = std::fs::metadata(cache.entry_path("elastauth-YQ"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_backend_error() {
        let (_td, cache) = cache();
        std::fs::write(cache.entry_path("elastauth-YmFk"), b"not json").unwrap();
        assert!(cache.get("elastauth-YmFk").await.is_err());
    }
}
