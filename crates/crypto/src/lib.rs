//! `bloodwork-crypto` — authenticated encryption of uploaded payloads.
//!
//! AES-256-GCM with a fresh 96-bit random nonce per call. Tokens are
//! `base64(nonce ‖ ciphertext‖tag)`. The 256-bit key is loaded once at
//! process start (URL-safe base64 in configuration) and injected into the
//! codec constructor; components receive the codec by reference and never
//! re-read the key themselves.
//!
//! No associated data is bound to the ciphertext. That is a known
//! limitation: a token can be replayed against a different job record.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use thiserror::Error;

/// Key length after base64 decoding, in bytes.
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material was not URL-safe base64 or did not decode to 256 bits.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encryption,

    /// Malformed token, failed tag verification, or wrong key. Never yields
    /// partial plaintext.
    #[error("decryption failed")]
    Decryption,
}

/// Stateless codec over a process-wide symmetric key.
///
/// Cheap to clone; safe for concurrent use by arbitrarily many callers.
#[derive(Clone)]
pub struct PayloadCodec {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for PayloadCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug output.
        f.debug_struct("PayloadCodec").finish_non_exhaustive()
    }
}

impl PayloadCodec {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Build a codec from a URL-safe base64 key, the wire format used by the
    /// `ENCRYPTION_KEY` configuration value.
    pub fn from_base64_key(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("not URL-safe base64: {e}")))?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
            CryptoError::InvalidKey(format!("key must decode to {KEY_LEN} bytes, got {}", v.len()))
        })?;
        Ok(Self::new(key))
    }

    /// Generate a fresh random key (dev/test bootstrap; production deployments
    /// provision the key out of band and share it across processes).
    pub fn generate_key() -> [u8; KEY_LEN] {
        Aes256Gcm::generate_key(&mut OsRng).into()
    }

    /// Encode a fresh key in the configuration wire format.
    pub fn encode_key(key: &[u8; KEY_LEN]) -> String {
        URL_SAFE.encode(key)
    }

    /// Encrypt arbitrary bytes into a transportable token.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encryption)?;

        let mut buf = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        buf.extend_from_slice(&nonce);
        buf.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(buf))
    }

    /// Decrypt a token produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>, CryptoError> {
        let data = STANDARD.decode(token).map_err(|_| CryptoError::Decryption)?;
        if data.len() < NONCE_LEN {
            return Err(CryptoError::Decryption);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_codec() -> PayloadCodec {
        PayloadCodec::new([7u8; KEY_LEN])
    }

    #[test]
    fn round_trip() {
        let codec = test_codec();
        let plaintext = b"Hemoglobin 9.2 Reference Range 13-17 g/dL";
        let token = codec.encrypt(plaintext).unwrap();
        assert_eq!(codec.decrypt(&token).unwrap(), plaintext);
    }

    #[test]
    fn empty_payload_round_trips() {
        let codec = test_codec();
        let token = codec.encrypt(b"").unwrap();
        assert_eq!(codec.decrypt(&token).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn fresh_nonce_per_call() {
        let codec = test_codec();
        let a = codec.encrypt(b"same plaintext").unwrap();
        let b = codec.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tamper_detection() {
        let codec = test_codec();
        let token = codec.encrypt(b"patient record").unwrap();
        let mut raw = STANDARD.decode(&token).unwrap();

        // Flip one bit at every byte position; every variant must fail.
        for i in 0..raw.len() {
            raw[i] ^= 0x01;
            let tampered = STANDARD.encode(&raw);
            assert_eq!(codec.decrypt(&tampered), Err(CryptoError::Decryption));
            raw[i] ^= 0x01;
        }
    }

    #[test]
    fn wrong_key_never_returns_bytes() {
        let token = test_codec().encrypt(b"confidential").unwrap();
        let other = PayloadCodec::new([9u8; KEY_LEN]);
        assert_eq!(other.decrypt(&token), Err(CryptoError::Decryption));
    }

    #[test]
    fn malformed_tokens_fail() {
        let codec = test_codec();
        assert_eq!(codec.decrypt("%%% not base64 %%%"), Err(CryptoError::Decryption));
        // Shorter than a nonce.
        assert_eq!(codec.decrypt(&STANDARD.encode([1u8; 4])), Err(CryptoError::Decryption));
    }

    #[test]
    fn key_wire_format_round_trips() {
        let key = PayloadCodec::generate_key();
        let encoded = PayloadCodec::encode_key(&key);
        let codec = PayloadCodec::from_base64_key(&encoded).unwrap();
        let token = codec.encrypt(b"x").unwrap();
        assert_eq!(codec.decrypt(&token).unwrap(), b"x");
    }

    #[test]
    fn short_key_is_rejected() {
        let err = PayloadCodec::from_base64_key(&URL_SAFE.encode([0u8; 16])).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKey(_)));
    }

    proptest! {
        #[test]
        fn round_trip_for_arbitrary_bytes(plaintext in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let codec = test_codec();
            let token = codec.encrypt(&plaintext).unwrap();
            prop_assert_eq!(codec.decrypt(&token).unwrap(), plaintext);
        }
    }
}
