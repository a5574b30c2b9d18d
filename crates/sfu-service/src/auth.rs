//! Join credential verification.
//!
//! A join carries a JSON payload and a detached base64 Ed25519 signature over
//! its exact bytes. The signature must verify against at least one of the
//! claimed account's current full-access keys. Function-call keys never
//! authorize a join. Every failure, including an unreachable chain, rejects.

use crate::errors::SignalError;
use base64::{engine::general_purpose::STANDARD, Engine};
use common::chain::ChainClient;
use common::signer::AccountPublicKey;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("signature is not valid base64")]
    MalformedSignature,

    #[error("access key lookup failed: {0}")]
    KeyLookup(String),

    #[error("account has no full-access keys")]
    NoFullAccessKeys,

    #[error("signature does not match any full-access key")]
    Mismatch,
}

impl From<AuthError> for SignalError {
    fn from(err: AuthError) -> Self {
        SignalError::Authentication(err.to_string())
    }
}

/// Verifies join credentials against the chain's key registry.
pub struct SignatureAuthenticator {
    chain: Arc<dyn ChainClient>,
}

impl SignatureAuthenticator {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain }
    }

    /// Verify `signature_base64` over `payload` for `account_id`.
    ///
    /// No retry: the caller reports the failure and closes the connection.
    #[instrument(skip_all, name = "sfu.auth.verify", fields(account_id = %account_id))]
    pub async fn verify(
        &self,
        account_id: &str,
        payload: &[u8],
        signature_base64: &str,
    ) -> Result<(), AuthError> {
        let signature = STANDARD
            .decode(signature_base64)
            .map_err(|_| AuthError::MalformedSignature)?;

        let keys = self.chain.access_keys(account_id).await.map_err(|e| {
            warn!(target: "sfu.auth", account_id = %account_id, error = %e, "Access key lookup failed");
            AuthError::KeyLookup(e.to_string())
        })?;

        let full_access: Vec<AccountPublicKey> = keys
            .iter()
            .filter(|key| key.full_access)
            .filter_map(|key| match AccountPublicKey::parse(&key.public_key) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    // Non-Ed25519 keys cannot have produced this signature
                    debug!(target: "sfu.auth", public_key = %key.public_key, error = %e, "Skipping key");
                    None
                }
            })
            .collect();

        if full_access.is_empty() {
            return Err(AuthError::NoFullAccessKeys);
        }

        if full_access
            .iter()
            .any(|key| key.verify(payload, &signature))
        {
            debug!(target: "sfu.auth", account_id = %account_id, "Join credential verified");
            Ok(())
        } else {
            Err(AuthError::Mismatch)
        }
    }
}
