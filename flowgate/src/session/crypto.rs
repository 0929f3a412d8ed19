//! Symmetric payload encryption for agent traffic
//!
//! Both session frames and flow uploads may arrive wrapped in an
//! `{encrypted: true, data}` envelope. The key is derived from the
//! node's secret by SHA-256; the cipher is AES-256-GCM with a fresh
//! 12-byte IV per message. Wire format: `base64(iv || ciphertext || tag)`.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::SessionError;

const IV_LEN: usize = 12;

/// Wire-level envelope for encrypted payloads
#[derive(Debug, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub encrypted: bool,
    pub data: String,
}

/// AES-256-GCM cipher bound to one node secret
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Derive the cipher from a node secret. Empty secrets carry no key
    /// material and are rejected.
    pub fn new(secret: &str) -> Result<Self, SessionError> {
        if secret.is_empty() {
            return Err(SessionError::Codec("empty secret".to_string()));
        }

        let key: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| SessionError::Codec(format!("key derivation: {e}")))?;

        Ok(Self { cipher })
    }

    /// Encrypt a payload; returns `base64(iv || ciphertext || tag)`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, SessionError> {
        if plaintext.is_empty() {
            return Err(SessionError::Codec("empty plaintext".to_string()));
        }

        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| SessionError::Codec("encryption failed".to_string()))?;

        let mut wire = Vec::with_capacity(IV_LEN + ciphertext.len());
        wire.extend_from_slice(&iv);
        wire.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(wire))
    }

    /// Decrypt `base64(iv || ciphertext || tag)`
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, SessionError> {
        let wire = BASE64
            .decode(encoded)
            .map_err(|e| SessionError::Codec(format!("base64 decode: {e}")))?;

        if wire.len() <= IV_LEN {
            return Err(SessionError::Codec("ciphertext too short".to_string()));
        }

        let (iv, ciphertext) = wire.split_at(IV_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| SessionError::Codec("decryption failed".to_string()))
    }

    /// Seal a frame into the wire envelope
    pub fn seal_envelope(&self, plaintext: &str) -> Result<String, SessionError> {
        let envelope = EncryptedEnvelope {
            encrypted: true,
            data: self.encrypt(plaintext.as_bytes())?,
        };
        serde_json::to_string(&envelope).map_err(|e| SessionError::Codec(e.to_string()))
    }
}

/// Process-wide cache of derived ciphers, keyed by secret.
///
/// Entries grow monotonically with the set of distinct secrets and are
/// invalidated when a node's secret rotates.
#[derive(Default)]
pub struct CipherCache {
    inner: DashMap<String, Arc<SecretCipher>>,
}

impl CipherCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or derive the cipher for a secret
    pub fn get_or_create(&self, secret: &str) -> Result<Arc<SecretCipher>, SessionError> {
        if let Some(cipher) = self.inner.get(secret) {
            return Ok(cipher.clone());
        }

        // entry() re-checks under the shard lock so two racing callers
        // derive the key at most once
        let entry = self
            .inner
            .entry(secret.to_string())
            .or_try_insert_with(|| SecretCipher::new(secret).map(Arc::new))?;
        Ok(entry.clone())
    }

    /// Drop the entry for a rotated secret
    pub fn invalidate(&self, secret: &str) {
        self.inner.remove(secret);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Unwrap a possibly-encrypted payload.
///
/// When the body parses as an `{encrypted: true, data}` envelope it is
/// decrypted with the secret's cipher; otherwise it is returned as-is.
pub fn open_payload(body: &[u8], ciphers: &CipherCache, secret: &str) -> Result<Vec<u8>, SessionError> {
    if let Ok(envelope) = serde_json::from_slice::<EncryptedEnvelope>(body) {
        if envelope.encrypted {
            let cipher = ciphers.get_or_create(secret)?;
            return cipher.decrypt(&envelope.data);
        }
    }
    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cipher = SecretCipher::new("s").unwrap();
        let sealed = cipher.encrypt(b"{\"n\":\"1_2_3\",\"u\":10,\"d\":20}").unwrap();
        let opened = cipher.decrypt(&sealed).unwrap();
        assert_eq!(opened, b"{\"n\":\"1_2_3\",\"u\":10,\"d\":20}");
    }

    #[test]
    fn test_distinct_ivs() {
        let cipher = SecretCipher::new("s").unwrap();
        let a = cipher.encrypt(b"same payload").unwrap();
        let b = cipher.encrypt(b"same payload").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(SecretCipher::new("").is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = SecretCipher::new("one").unwrap();
        let other = SecretCipher::new("two").unwrap();
        let sealed = cipher.encrypt(b"payload").unwrap();
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let cipher = SecretCipher::new("s").unwrap();
        let short = BASE64.encode([0u8; IV_LEN]);
        assert!(cipher.decrypt(&short).is_err());
    }

    #[test]
    fn test_cache_reuse_and_invalidation() {
        let cache = CipherCache::new();
        let a = cache.get_or_create("secret").unwrap();
        let b = cache.get_or_create("secret").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        cache.invalidate("secret");
        assert!(cache.is_empty());
        let c = cache.get_or_create("secret").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_open_payload_plaintext_passthrough() {
        let cache = CipherCache::new();
        let body = br#"{"n":"1_2_0","u":1,"d":2}"#;
        let opened = open_payload(body, &cache, "s").unwrap();
        assert_eq!(opened, body);
    }

    #[test]
    fn test_open_payload_envelope() {
        let cache = CipherCache::new();
        let cipher = cache.get_or_create("s").unwrap();
        let sealed = cipher.seal_envelope(r#"{"n":"1_2_3","u":10,"d":20}"#).unwrap();
        let opened = open_payload(sealed.as_bytes(), &cache, "s").unwrap();
        assert_eq!(opened, br#"{"n":"1_2_3","u":10,"d":20}"#);
    }
}
