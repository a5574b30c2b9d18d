//! Billing contract client.
//!
//! The SFU and the billing authority both talk to the same contract:
//! - the SFU looks up an account's access keys to authenticate joins and
//!   submits `create_call` / `end_call` transactions;
//! - the billing authority reads `get_nodes` and `get_epoch_height`.
//!
//! [`ChainClient`] is the seam; [`NearRpcClient`] implements it over JSON-RPC
//! and [`mock::MockChainClient`] backs tests.

mod rpc;
mod transaction;

pub use rpc::NearRpcClient;

use crate::signer::KeyError;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default mainnet RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "https://rpc.mainnet.near.org";

/// Default billing contract account.
pub const DEFAULT_CONTRACT_ID: &str = "webrtc.dtelecom.near";

/// Gas attached to `create_call` / `end_call` (100 Tgas).
pub const FUNCTION_CALL_GAS: u64 = 100_000_000_000_000;

#[derive(Debug, Error)]
pub enum ChainError {
    /// The RPC endpoint could not be reached.
    #[error("Chain transport error: {0}")]
    Transport(String),

    /// The RPC endpoint answered with an error, or a transaction failed.
    #[error("Chain RPC error: {0}")]
    Rpc(String),

    /// The response did not have the expected shape.
    #[error("Invalid chain response: {0}")]
    InvalidResponse(String),

    /// A transaction was requested without signing credentials.
    #[error("No signing account configured")]
    MissingSigner,

    /// A transaction could not be serialized.
    #[error("Transaction encoding failed: {0}")]
    Encoding(String),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

/// One entry of an account's access-key list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKeyInfo {
    /// Key in `ed25519:<base58>` form.
    pub public_key: String,

    /// True for full-access keys, false for function-call scoped keys.
    pub full_access: bool,
}

/// Media node registered with the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub address: String,
}

/// Arguments of the contract's `create_call` method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateCall {
    pub id: String,
    pub client_id: String,
    /// base58 of the raw confirmation signature.
    pub sign: String,
    pub epoch: u64,
}

/// Arguments of the contract's `end_call` method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndCall {
    pub id: String,
    pub client_id: String,
    /// base58 of the raw confirmation signature.
    pub sign: String,
    pub minutes: u64,
    pub epoch: u64,
}

/// Re-encode a confirmation signature from the billing authority's base64
/// into the base58 form the contract expects.
pub fn contract_signature(signature_base64: &str) -> Result<String, ChainError> {
    let raw = STANDARD
        .decode(signature_base64)
        .map_err(|e| ChainError::InvalidResponse(format!("confirmation is not base64: {e}")))?;
    if raw.is_empty() {
        return Err(ChainError::InvalidResponse(
            "confirmation signature is empty".to_string(),
        ));
    }
    Ok(bs58::encode(raw).into_string())
}

/// Operations against the billing contract and the chain's key registry.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    /// Current access keys of `account_id` (finality final).
    async fn access_keys(&self, account_id: &str) -> Result<Vec<AccessKeyInfo>, ChainError>;

    /// Media nodes registered with the contract.
    async fn get_nodes(&self) -> Result<Vec<NodeInfo>, ChainError>;

    /// Current chain epoch height as reported by the contract.
    async fn get_epoch_height(&self) -> Result<u64, ChainError>;

    /// Submit a `create_call` transaction and wait for its outcome.
    async fn create_call(&self, call: &CreateCall) -> Result<(), ChainError>;

    /// Submit an `end_call` transaction and wait for its outcome.
    async fn end_call(&self, call: &EndCall) -> Result<(), ChainError>;
}

/// In-memory chain client for tests.
pub mod mock {
    use super::*;
    use crate::signer::AccountPublicKey;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::{Mutex, Notify};

    /// Mock chain client.
    ///
    /// Serves a fixed key registry, node list and epoch, and records every
    /// submitted transaction.
    #[derive(Default)]
    pub struct MockChainClient {
        keys: HashMap<String, Vec<AccessKeyInfo>>,
        nodes: Vec<NodeInfo>,
        epoch: u64,
        failing: AtomicBool,
        key_lookups: AtomicUsize,
        created: Mutex<Vec<CreateCall>>,
        ended: Mutex<Vec<EndCall>>,
        changed: Notify,
    }

    impl MockChainClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a full-access key for `account_id`.
        #[must_use]
        pub fn with_full_access_key(self, account_id: &str, key: &AccountPublicKey) -> Self {
            self.with_key(account_id, key, true)
        }

        /// Register a function-call scoped key for `account_id`.
        #[must_use]
        pub fn with_function_call_key(self, account_id: &str, key: &AccountPublicKey) -> Self {
            self.with_key(account_id, key, false)
        }

        fn with_key(mut self, account_id: &str, key: &AccountPublicKey, full_access: bool) -> Self {
            self.keys
                .entry(account_id.to_string())
                .or_default()
                .push(AccessKeyInfo {
                    public_key: key.to_string(),
                    full_access,
                });
            self
        }

        #[must_use]
        pub fn with_nodes(mut self, addresses: &[&str]) -> Self {
            self.nodes = addresses
                .iter()
                .map(|address| NodeInfo {
                    address: (*address).to_string(),
                })
                .collect();
            self
        }

        #[must_use]
        pub fn with_epoch(mut self, epoch: u64) -> Self {
            self.epoch = epoch;
            self
        }

        /// Make every call fail with a transport error.
        #[must_use]
        pub fn failing(self) -> Self {
            self.failing.store(true, Ordering::SeqCst);
            self
        }

        /// Toggle failure mode at runtime.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Number of access-key lookups served.
        pub fn key_lookups(&self) -> usize {
            self.key_lookups.load(Ordering::SeqCst)
        }

        pub async fn create_calls(&self) -> Vec<CreateCall> {
            self.created.lock().await.clone()
        }

        pub async fn end_calls(&self) -> Vec<EndCall> {
            self.ended.lock().await.clone()
        }

        /// Wait until at least `count` `create_call` transactions were submitted.
        pub async fn wait_for_create_calls(&self, count: usize) -> Vec<CreateCall> {
            loop {
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                {
                    let calls = self.created.lock().await;
                    if calls.len() >= count {
                        return calls.clone();
                    }
                }
                notified.await;
            }
        }

        /// Wait until at least `count` `end_call` transactions were submitted.
        pub async fn wait_for_end_calls(&self, count: usize) -> Vec<EndCall> {
            loop {
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                {
                    let calls = self.ended.lock().await;
                    if calls.len() >= count {
                        return calls.clone();
                    }
                }
                notified.await;
            }
        }

        fn check_failing(&self) -> Result<(), ChainError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ChainError::Transport("mock chain unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl ChainClient for MockChainClient {
        async fn access_keys(&self, account_id: &str) -> Result<Vec<AccessKeyInfo>, ChainError> {
            self.key_lookups.fetch_add(1, Ordering::SeqCst);
            self.check_failing()?;
            self.keys
                .get(account_id)
                .cloned()
                .ok_or_else(|| ChainError::Rpc(format!("account {account_id} does not exist")))
        }

        async fn get_nodes(&self) -> Result<Vec<NodeInfo>, ChainError> {
            self.check_failing()?;
            Ok(self.nodes.clone())
        }

        async fn get_epoch_height(&self) -> Result<u64, ChainError> {
            self.check_failing()?;
            Ok(self.epoch)
        }

        async fn create_call(&self, call: &CreateCall) -> Result<(), ChainError> {
            self.check_failing()?;
            self.created.lock().await.push(call.clone());
            self.changed.notify_waiters();
            Ok(())
        }

        async fn end_call(&self, call: &EndCall) -> Result<(), ChainError> {
            self.check_failing()?;
            self.ended.lock().await.push(call.clone());
            self.changed.notify_waiters();
            Ok(())
        }
    }
}
