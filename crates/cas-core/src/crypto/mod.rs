//! Cryptographic primitives for the ticket registry and id generation.
//!
//! - [`TicketCipher`] seals serialized tickets with AES-256-GCM before they
//!   reach a storage backend. Layout: `nonce (12) || ciphertext || tag (16)`.
//! - [`random_alphanumeric`] produces the RANDOM segment of ticket ids from the
//!   operating system CSPRNG.
//! - [`digest_ticket_id`] / [`digest_principal_id`] derive storage keys so ids
//!   and principals are not stored in clear when encryption is on.
//! - bcrypt helpers back the built-in accept-users handler.

use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN},
    rand::{SecureRandom, SystemRandom},
};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use thiserror::Error;
use tracing::instrument;

/// Required AES-256 key length in bytes.
pub const CIPHER_KEY_LEN: usize = 32;

const TAG_LEN: usize = 16;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Largest multiple of the alphabet size that fits in a byte; bytes at or
/// above it are rejected so every character is equally likely.
const REJECTION_THRESHOLD: u8 = 248;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid cipher key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Random generation failed: {0}")]
    Random(String),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

/// AES-256-GCM cipher applied to serialized tickets.
pub struct TicketCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl TicketCipher {
    /// Build a cipher from 32 bytes of key material.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != CIPHER_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "Invalid cipher key length: {} (expected {})",
                key.len(),
                CIPHER_KEY_LEN
            )));
        }

        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|e| CryptoError::InvalidKey(format!("Cipher key creation failed: {}", e)))?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    #[instrument(skip_all)]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|e| CryptoError::Encryption(format!("Nonce generation failed: {}", e)))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|e| CryptoError::Encryption(format!("Encryption operation failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(sealed)
    }

    #[instrument(skip_all)]
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decryption(format!(
                "Sealed payload too short: {} bytes",
                sealed.len()
            )));
        }

        let (nonce_part, body) = sealed.split_at(NONCE_LEN);
        let nonce_bytes: [u8; NONCE_LEN] = nonce_part
            .try_into()
            .map_err(|_| CryptoError::Decryption("Invalid nonce length".to_string()))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = body.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|e| CryptoError::Decryption(format!("Decryption operation failed: {}", e)))?;

        Ok(plaintext.to_vec())
    }
}

impl fmt::Debug for TicketCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketCipher")
            .field("algorithm", &"AES-256-GCM")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Generate `len` characters drawn uniformly from `[A-Za-z0-9]`.
pub fn random_alphanumeric(rng: &SystemRandom, len: usize) -> Result<String, CryptoError> {
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 64];

    while out.len() < len {
        rng.fill(&mut buf)
            .map_err(|e| CryptoError::Random(format!("Random generation failed: {}", e)))?;

        for byte in buf {
            if out.len() == len {
                break;
            }
            if byte >= REJECTION_THRESHOLD {
                continue;
            }
            let index = usize::from(byte) % ALPHANUMERIC.len();
            if let Some(c) = ALPHANUMERIC.get(index) {
                out.push(char::from(*c));
            }
        }
    }

    Ok(out)
}

/// SHA-512 hex digest of a ticket id, used as the storage key when the
/// registry encrypts at rest.
pub fn digest_ticket_id(ticket_id: &str) -> String {
    hex::encode(Sha512::digest(ticket_id.as_bytes()))
}

/// SHA-256 hex digest of a principal id, used as the per-principal session index.
pub fn digest_principal_id(principal_id: &str) -> String {
    hex::encode(Sha256::digest(principal_id.as_bytes()))
}

#[instrument(skip_all)]
pub fn hash_password(password: &str, cost: u32) -> Result<String, CryptoError> {
    bcrypt::hash(password, cost)
        .map_err(|e| CryptoError::PasswordHash(format!("Password hashing failed: {}", e)))
}

#[instrument(skip_all)]
pub fn verify_password(password: &str, hash: &str) -> Result<bool, CryptoError> {
    bcrypt::verify(password, hash)
        .map_err(|e| CryptoError::PasswordHash(format!("Password verification failed: {}", e)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn test_key() -> [u8; CIPHER_KEY_LEN] {
        [0x42; CIPHER_KEY_LEN]
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = TicketCipher::new(&test_key()).unwrap();
        let payload = br#"{"id":"TGT-1-abc"}"#;

        let sealed = cipher.encrypt(payload).unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + payload.len() + TAG_LEN);
        assert_ne!(&sealed[NONCE_LEN..NONCE_LEN + payload.len()], payload.as_slice());

        let opened = cipher.decrypt(&sealed).unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn test_encrypt_uses_fresh_nonce() {
        let cipher = TicketCipher::new(&test_key()).unwrap();
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_key_length() {
        let result = TicketCipher::new(&[0u8; 16]);
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let sealed = TicketCipher::new(&test_key())
            .unwrap()
            .encrypt(b"ticket")
            .unwrap();
        let other = TicketCipher::new(&[0x24; CIPHER_KEY_LEN]).unwrap();
        assert!(matches!(
            other.decrypt(&sealed),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_decrypt_truncated_payload_fails() {
        let cipher = TicketCipher::new(&test_key()).unwrap();
        assert!(matches!(
            cipher.decrypt(&[1, 2, 3]),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let cipher = TicketCipher::new(&test_key()).unwrap();
        let rendered = format!("{cipher:?}");
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_random_alphanumeric_length_and_charset() {
        let rng = SystemRandom::new();
        for len in [1, 10, 64, 129] {
            let value = random_alphanumeric(&rng, len).unwrap();
            assert_eq!(value.len(), len);
            assert!(value.bytes().all(|b| b.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_random_alphanumeric_is_not_repeated() {
        let rng = SystemRandom::new();
        let a = random_alphanumeric(&rng, 32).unwrap();
        let b = random_alphanumeric(&rng, 32).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_digests_are_stable_hex() {
        let ticket = digest_ticket_id("TGT-1-abc");
        assert_eq!(ticket.len(), 128);
        assert_eq!(ticket, digest_ticket_id("TGT-1-abc"));
        assert_ne!(ticket, digest_ticket_id("TGT-2-abc"));

        let principal = digest_principal_id("casuser");
        assert_eq!(principal.len(), 64);
    }

    #[test]
    fn test_password_hash_verify() {
        let hash = hash_password("Mellon", 4).unwrap();
        assert!(verify_password("Mellon", &hash).unwrap());
        assert!(!verify_password("mellon", &hash).unwrap());
    }

    #[test]
    fn test_verify_password_with_invalid_hash() {
        let result = verify_password("Mellon", "not-a-bcrypt-hash");
        assert!(matches!(result, Err(CryptoError::PasswordHash(_))));
    }
}
