//! Symmetric encryption and random-secret helpers.
//!
//! One 32-byte key, loaded once from configuration, protects both the
//! cached ephemeral passwords and the session cookie. The AEAD layout is
//! `nonce(12) || ciphertext || tag(16)`; cache entries carry it hex-encoded,
//! cookies carry it base64url-encoded. Tampered or truncated input fails
//! closed.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use thiserror::Error;

/// GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Encryption errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid secret key (expected 64 hex characters)")]
    InvalidKey,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid encrypted data format")]
    InvalidFormat,
}

/// The process-wide 32-byte symmetric key.
///
/// Deliberately does not implement `Debug`, `Display`, or `Serialize`;
/// the raw bytes never leave this module.
#[derive(Clone)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Parse a key from its 64-hex-character configuration form.
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_key).map_err(|_| CryptoError::InvalidKey)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self(arr))
    }

    #[cfg(test)]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt `plaintext`, returning `nonce || ciphertext || tag`.
pub fn seal(key: &SecretKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut combined = nonce.to_vec();
    combined.extend_from_slice(&ciphertext);
    Ok(combined)
}

/// Decrypt a `nonce || ciphertext || tag` buffer produced by [`seal`].
pub fn open(key: &SecretKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_LEN {
        return Err(CryptoError::InvalidFormat);
    }
    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Encrypt a UTF-8 string and hex-encode the result for cache storage.
pub fn seal_hex(key: &SecretKey, plaintext: &str) -> Result<String, CryptoError> {
    Ok(hex::encode(seal(key, plaintext.as_bytes())?))
}

/// Decrypt a hex-encoded cache entry back into a UTF-8 string.
pub fn open_hex(key: &SecretKey, encoded: &str) -> Result<String, CryptoError> {
    let data = hex::decode(encoded).map_err(|_| CryptoError::InvalidFormat)?;
    let plaintext = open(key, &data)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidFormat)
}

/// Encrypt arbitrary bytes and base64url-encode the result for cookies.
pub fn seal_b64(key: &SecretKey, plaintext: &[u8]) -> Result<String, CryptoError> {
    Ok(URL_SAFE_NO_PAD.encode(seal(key, plaintext)?))
}

/// Decrypt a base64url cookie value back into bytes.
pub fn open_b64(key: &SecretKey, encoded: &str) -> Result<Vec<u8>, CryptoError> {
    let data = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| CryptoError::InvalidFormat)?;
    open(key, &data)
}

/// Mint an ephemeral password: 32 random bytes, base64url-encoded (43 chars).
pub fn generate_password() -> String {
    random_urlsafe(&mut rand::rng(), 32)
}

/// Generates a URL-safe random string from `bytes` bytes of CSPRNG output.
pub fn random_urlsafe(rng: &mut impl RngCore, bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SecretKey {
        SecretKey::from_bytes([7u8; 32])
    }

    #[test]
    fn hex_roundtrip() {
        let key = test_key();
        let sealed = seal_hex(&key, "hunter2-but-43-chars").expect("seal");
        let opened = open_hex(&key, &sealed).expect("open");
        assert_eq!(opened, "hunter2-but-43-chars");
    }

    #[test]
    fn b64_roundtrip() {
        let key = test_key();
        let sealed = seal_b64(&key, b"{\"authenticated\":true}").expect("seal");
        let opened = open_b64(&key, &sealed).expect("open");
        assert_eq!(opened, b"{\"authenticated\":true}");
    }

    #[test]
    fn wrong_key_fails_closed() {
        let sealed = seal_hex(&test_key(), "secret").expect("seal");
        let other = SecretKey::from_bytes([8u8; 32]);
        assert!(open_hex(&other, &sealed).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let key = test_key();
        let sealed = seal(&key, b"secret").expect("seal");
        let mut tampered = sealed.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(open(&key, &tampered).is_err());
    }

    #[test]
    fn truncated_input_is_invalid_format() {
        let key = test_key();
        assert!(matches!(
            open(&key, &[0u8; 4]),
            Err(CryptoError::InvalidFormat)
        ));
    }

    #[test]
    fn nonce_randomizes_ciphertext() {
        let key = test_key();
        let a = seal_hex(&key, "same").expect("seal");
        let b = seal_hex(&key, "same").expect("seal");
        assert_ne!(a, b);
        assert_eq!(open_hex(&key, &a).unwrap(), open_hex(&key, &b).unwrap());
    }

    #[test]
    fn key_parsing_enforces_length() {
        assert!(SecretKey::from_hex(&"ab".repeat(32)).is_ok());
        assert!(SecretKey::from_hex("abcd").is_err());
        assert!(SecretKey::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn generated_passwords_are_long_and_unique() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
    }
}
