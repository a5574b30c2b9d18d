//! Deterministic key and credential fixtures for testing
//!
//! All fixtures are derived from a one-byte seed, so the same seed always
//! yields the same account key, secret key string and signatures.

use common::chain::mock::MockChainClient;
use common::secret::SecretString;
use common::signer::{AccountPublicKey, AccountSigner, ED25519_KEY_LEN, ED25519_PREFIX};
use common::types::ConferenceUser;
use serde_json::{json, Value};
use thiserror::Error;

/// Callback base URL written into fixture credentials.
pub const TEST_CALLBACK_URL: &str = "http://billing.test";

/// Offer that publishes nothing.
pub const PLAIN_OFFER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=setup:actpass\r\n";

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Key fixture failed: {0}")]
    Key(String),

    #[error("Credential encoding failed: {0}")]
    Encoding(String),
}

/// Deterministic 32-byte seed for `seed`.
pub fn test_seed(seed: u8) -> [u8; ED25519_KEY_LEN] {
    let mut bytes = [0u8; ED25519_KEY_LEN];
    for (i, byte) in bytes.iter_mut().enumerate() {
        let i = u8::try_from(i).unwrap_or(u8::MAX);
        *byte = seed.wrapping_mul(31).wrapping_add(i.wrapping_mul(7));
    }
    bytes
}

/// Deterministic account signer.
pub fn test_signer(seed: u8) -> Result<AccountSigner, FixtureError> {
    AccountSigner::from_seed(&test_seed(seed)).map_err(|e| FixtureError::Key(e.to_string()))
}

/// Secret key string in the chain's 64-byte `ed25519:<base58>` form.
pub fn test_secret_key(seed: u8) -> Result<SecretString, FixtureError> {
    let signer = test_signer(seed)?;
    let mut full = test_seed(seed).to_vec();
    full.extend_from_slice(signer.public_key().as_bytes());
    Ok(SecretString::from(format!(
        "{ED25519_PREFIX}{}",
        bs58::encode(full).into_string()
    )))
}

/// SDP offer announcing one `a=msid` line per stream.
pub fn publish_offer(streams: &[&str]) -> String {
    let mut sdp = PLAIN_OFFER.to_string();
    for stream in streams {
        sdp.push_str(&format!("a=msid:{stream} {stream}-track\r\n"));
    }
    sdp
}

/// A billed account holding one full-access key.
pub struct TestAccount {
    pub account_id: String,
    pub call_id: String,
    pub callback_url: String,
    signer: AccountSigner,
}

impl TestAccount {
    pub fn new(account_id: &str, seed: u8) -> Result<Self, FixtureError> {
        Ok(Self {
            account_id: account_id.to_string(),
            call_id: format!("call-{seed}"),
            callback_url: TEST_CALLBACK_URL.to_string(),
            signer: test_signer(seed)?,
        })
    }

    #[must_use]
    pub fn with_callback_url(mut self, callback_url: &str) -> Self {
        self.callback_url = callback_url.to_string();
        self
    }

    pub fn public_key(&self) -> &AccountPublicKey {
        self.signer.public_key()
    }

    pub fn signer(&self) -> &AccountSigner {
        &self.signer
    }

    /// Mock chain that lists this account's key as full-access.
    pub fn chain(&self) -> MockChainClient {
        MockChainClient::new().with_full_access_key(&self.account_id, self.public_key())
    }

    /// Credential for `uid` in conference `sid`, billed to this account.
    pub fn credential(&self, sid: &str, uid: &str) -> ConferenceUser {
        ConferenceUser {
            sid: sid.to_string(),
            uid: uid.to_string(),
            call_id: self.call_id.clone(),
            callback_url: self.callback_url.clone(),
            account_id: self.account_id.clone(),
        }
    }

    /// Serialize and sign `user`, returning `(credential_json, signature_base64)`.
    pub fn sign_credential(&self, user: &ConferenceUser) -> Result<(String, String), FixtureError> {
        let text = user
            .to_json()
            .map_err(|e| FixtureError::Encoding(e.to_string()))?;
        let signature = self.signer.sign_base64(text.as_bytes());
        Ok((text, signature))
    }

    /// `join` params carrying a signed credential and an offer.
    pub fn join_params(&self, user: &ConferenceUser, sdp: &str) -> Result<Value, FixtureError> {
        let (sid, uid) = self.sign_credential(user)?;
        Ok(json!({
            "sid": sid,
            "uid": uid,
            "offer": { "type": "offer", "sdp": sdp },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_are_deterministic() {
        let a = test_signer(1).unwrap();
        let b = test_signer(1).unwrap();
        let c = test_signer(2).unwrap();

        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());
    }

    #[test]
    fn test_secret_key_loads_as_signer() {
        let secret = test_secret_key(4).unwrap();
        let signer = AccountSigner::from_secret(&secret).unwrap();
        assert_eq!(signer.public_key(), test_signer(4).unwrap().public_key());
    }

    #[test]
    fn test_signed_credential_verifies() {
        let account = TestAccount::new("client.near", 3).unwrap();
        let user = account.credential("c1", "alice");
        let (text, signature) = account.sign_credential(&user).unwrap();

        let raw = base64_decode(&signature);
        assert!(account.public_key().verify(text.as_bytes(), &raw));
        assert!(text.contains(r#""AccountId":"client.near""#));
    }

    #[test]
    fn test_publish_offer_lists_streams() {
        let sdp = publish_offer(&["cam", "screen"]);
        assert!(sdp.starts_with("v=0"));
        assert!(sdp.contains("a=msid:cam cam-track"));
        assert!(sdp.contains("a=msid:screen screen-track"));
    }

    fn base64_decode(text: &str) -> Vec<u8> {
        // Confirm through the chain helper, which decodes standard base64
        let base58 = common::chain::contract_signature(text).unwrap();
        bs58::decode(base58).into_vec().unwrap()
    }
}
