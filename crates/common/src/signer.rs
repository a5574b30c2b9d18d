//! Account keys in the chain's textual form.
//!
//! Keys are written as `ed25519:<base58>`. A secret key decodes to 64 bytes
//! (32-byte seed followed by the 32-byte public key); a public key decodes
//! to 32 bytes. Signatures are raw 64-byte Ed25519 signatures.

use crate::secret::{ExposeSecret, SecretString};
use base64::{engine::general_purpose::STANDARD, Engine};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use std::fmt;
use thiserror::Error;

/// Prefix of every Ed25519 key string.
pub const ED25519_PREFIX: &str = "ed25519:";

/// Length of an Ed25519 seed and of a public key.
pub const ED25519_KEY_LEN: usize = 32;

/// Length of a secret key (seed followed by public key).
pub const ED25519_SECRET_LEN: usize = 64;

/// Length of an Ed25519 signature.
pub const ED25519_SIGNATURE_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid key format: {0}")]
    InvalidFormat(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

fn decode_key_string(value: &str) -> Result<Vec<u8>, KeyError> {
    let encoded = value.strip_prefix(ED25519_PREFIX).ok_or_else(|| {
        KeyError::InvalidFormat(format!("key must start with '{ED25519_PREFIX}'"))
    })?;

    bs58::decode(encoded)
        .into_vec()
        .map_err(|e| KeyError::InvalidFormat(format!("base58 decode failed: {e}")))
}

/// Public half of an account key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountPublicKey([u8; ED25519_KEY_LEN]);

impl AccountPublicKey {
    /// Parse an `ed25519:<base58>` public key.
    pub fn parse(value: &str) -> Result<Self, KeyError> {
        Self::from_bytes(&decode_key_string(value)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let key: [u8; ED25519_KEY_LEN] = bytes.try_into().map_err(|_| {
            KeyError::InvalidKey(format!(
                "public key must be {ED25519_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ED25519_KEY_LEN] {
        &self.0
    }

    /// Verify a detached signature over `message`.
    ///
    /// Malformed signatures simply fail verification.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        UnparsedPublicKey::new(&ED25519, &self.0)
            .verify(message, signature)
            .is_ok()
    }
}

impl fmt::Display for AccountPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ED25519_PREFIX}{}", bs58::encode(&self.0).into_string())
    }
}

impl fmt::Debug for AccountPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountPublicKey({self})")
    }
}

/// Signing half of an account key.
///
/// Debug output never includes key material.
pub struct AccountSigner {
    key_pair: Ed25519KeyPair,
    public_key: AccountPublicKey,
}

impl AccountSigner {
    /// Load a signer from an `ed25519:<base58>` secret key.
    ///
    /// Accepts the 64-byte seed+public form (checked for consistency) or a
    /// bare 32-byte seed.
    pub fn from_secret(secret: &SecretString) -> Result<Self, KeyError> {
        let bytes = decode_key_string(secret.expose_secret())?;

        let key_pair = match bytes.len() {
            ED25519_SECRET_LEN => {
                let (seed, public) = bytes.split_at(ED25519_KEY_LEN);
                Ed25519KeyPair::from_seed_and_public_key(seed, public).map_err(|_| {
                    KeyError::InvalidKey("seed does not match embedded public key".to_string())
                })?
            }
            ED25519_KEY_LEN => Ed25519KeyPair::from_seed_unchecked(&bytes)
                .map_err(|_| KeyError::InvalidKey("invalid seed".to_string()))?,
            other => {
                return Err(KeyError::InvalidKey(format!(
                    "secret key must be 32 or 64 bytes, got {other}"
                )))
            }
        };

        Self::from_key_pair(key_pair)
    }

    /// Build a signer from a raw 32-byte seed.
    pub fn from_seed(seed: &[u8; ED25519_KEY_LEN]) -> Result<Self, KeyError> {
        let key_pair = Ed25519KeyPair::from_seed_unchecked(seed)
            .map_err(|_| KeyError::InvalidKey("invalid seed".to_string()))?;
        Self::from_key_pair(key_pair)
    }

    fn from_key_pair(key_pair: Ed25519KeyPair) -> Result<Self, KeyError> {
        let public_key = AccountPublicKey::from_bytes(key_pair.public_key().as_ref())?;
        Ok(Self {
            key_pair,
            public_key,
        })
    }

    #[must_use]
    pub fn public_key(&self) -> &AccountPublicKey {
        &self.public_key
    }

    /// Sign `message`, returning the raw 64-byte signature.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key_pair.sign(message).as_ref().to_vec()
    }

    /// Sign `message`, returning the signature in standard base64.
    #[must_use]
    pub fn sign_base64(&self, message: &[u8]) -> String {
        STANDARD.encode(self.sign(message))
    }
}

impl fmt::Debug for AccountSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSigner")
            .field("public_key", &self.public_key)
            .field("key_pair", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn secret_from_seed(seed: [u8; 32]) -> SecretString {
        let signer = AccountSigner::from_seed(&seed).unwrap();
        let mut full = seed.to_vec();
        full.extend_from_slice(signer.public_key().as_bytes());
        SecretString::from(format!(
            "{ED25519_PREFIX}{}",
            bs58::encode(full).into_string()
        ))
    }

    #[test]
    fn test_from_secret_full_form() {
        let secret = secret_from_seed([3u8; 32]);
        let signer = AccountSigner::from_secret(&secret).unwrap();
        let expected = AccountSigner::from_seed(&[3u8; 32]).unwrap();

        assert_eq!(signer.public_key(), expected.public_key());
    }

    #[test]
    fn test_from_secret_rejects_mismatched_public_half() {
        let other = AccountSigner::from_seed(&[4u8; 32]).unwrap();
        let mut full = vec![3u8; 32];
        full.extend_from_slice(other.public_key().as_bytes());
        let secret = SecretString::from(format!("ed25519:{}", bs58::encode(full).into_string()));

        assert!(AccountSigner::from_secret(&secret).is_err());
    }

    #[test]
    fn test_from_secret_rejects_missing_prefix() {
        let secret = SecretString::from(bs58::encode([1u8; 64]).into_string());
        let err = AccountSigner::from_secret(&secret).unwrap_err();
        assert!(matches!(err, KeyError::InvalidFormat(_)));
    }

    #[test]
    fn test_from_secret_rejects_wrong_length() {
        let secret = SecretString::from(format!("ed25519:{}", bs58::encode([1u8; 16]).into_string()));
        let err = AccountSigner::from_secret(&secret).unwrap_err();
        assert!(matches!(err, KeyError::InvalidKey(_)));
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = AccountSigner::from_seed(&[9u8; 32]).unwrap();
        let signature = signer.sign(b"123:0:1");

        assert_eq!(signature.len(), ED25519_SIGNATURE_LEN);
        assert!(signer.public_key().verify(b"123:0:1", &signature));
        assert!(!signer.public_key().verify(b"123:1:1", &signature));
    }

    #[test]
    fn test_verify_with_garbage_signature_fails() {
        let signer = AccountSigner::from_seed(&[9u8; 32]).unwrap();
        assert!(!signer.public_key().verify(b"msg", b"short"));
    }

    #[test]
    fn test_public_key_display_round_trips() {
        let signer = AccountSigner::from_seed(&[5u8; 32]).unwrap();
        let text = signer.public_key().to_string();

        assert!(text.starts_with(ED25519_PREFIX));
        assert_eq!(AccountPublicKey::parse(&text).unwrap(), *signer.public_key());
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let signer = AccountSigner::from_seed(&[5u8; 32]).unwrap();
        let debug = format!("{signer:?}");
        assert!(debug.contains("REDACTED"));
    }
}
