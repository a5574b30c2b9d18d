//! Confirmation signer.
//!
//! Every lifecycle callback from the SFU is answered with a signature over
//! `"{call_id}:{duration}:{epoch}"`, made with the billing account key. The
//! SFU forwards it to the contract, which checks it against the same
//! message. The epoch is read from the chain per confirmation; when the read
//! fails the confirmation is still issued with epoch 0.
//!
//! The same key signs the serialized [`ConferenceUser`] handed to clients on
//! create and join.

use crate::errors::BillingError;
use crate::observability::metrics;
use common::chain::ChainClient;
use common::signer::{AccountPublicKey, AccountSigner};
use common::types::{ConferenceUser, SignatureView};
use std::sync::Arc;
use tracing::{instrument, warn};

/// Message a confirmation signature covers.
pub fn confirmation_message(call_id: &str, duration: u64, epoch: u64) -> String {
    format!("{call_id}:{duration}:{epoch}")
}

pub struct ConfirmationSigner {
    signer: Arc<AccountSigner>,
    chain: Arc<dyn ChainClient>,
}

impl ConfirmationSigner {
    pub fn new(signer: Arc<AccountSigner>, chain: Arc<dyn ChainClient>) -> Self {
        Self { signer, chain }
    }

    pub fn public_key(&self) -> &AccountPublicKey {
        self.signer.public_key()
    }

    /// Sign `call_id:duration:epoch` at the current epoch.
    #[instrument(skip_all, name = "billing.signer.confirm", fields(kind = kind, call_id = %call_id, duration = duration))]
    pub async fn confirm(&self, kind: &'static str, call_id: &str, duration: u64) -> SignatureView {
        let (epoch, fetched) = match self.chain.get_epoch_height().await {
            Ok(epoch) => (epoch, true),
            Err(e) => {
                warn!(target: "billing.signer", error = %e, "Epoch lookup failed, confirming at epoch 0");
                (0, false)
            }
        };
        metrics::record_confirmation(kind, fetched);

        let message = confirmation_message(call_id, duration, epoch);
        SignatureView {
            signature: self.signer.sign_base64(message.as_bytes()),
            epoch,
        }
    }

    /// Serialize and sign a join credential.
    ///
    /// Returns `(credential_json, signature_base64)`; the SFU verifies the
    /// signature over exactly the returned text.
    pub fn sign_credential(&self, user: &ConferenceUser) -> Result<(String, String), BillingError> {
        let text = user
            .to_json()
            .map_err(|e| BillingError::Internal(format!("credential serialization failed: {e}")))?;
        let signature = self.signer.sign_base64(text.as_bytes());
        Ok((text, signature))
    }
}
