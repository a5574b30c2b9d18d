//! JSON-RPC chain client.

use super::transaction::FunctionCallTransaction;
use super::{
    AccessKeyInfo, ChainClient, ChainError, CreateCall, EndCall, NodeInfo, FUNCTION_CALL_GAS,
};
use crate::signer::AccountSigner;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Timeout for view calls in seconds.
const RPC_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Timeout for `broadcast_tx_commit`, which waits for inclusion.
const RPC_COMMIT_TIMEOUT_SECS: u64 = 60;

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct AccessKeyList {
    keys: Vec<AccessKeyEntry>,
}

#[derive(Deserialize)]
struct AccessKeyEntry {
    public_key: String,
    access_key: AccessKeyView,
}

#[derive(Deserialize)]
struct AccessKeyView {
    nonce: u64,
    permission: Value,
    #[serde(default)]
    block_hash: Option<String>,
}

#[derive(Deserialize)]
struct CallResult {
    result: Vec<u8>,
}

/// Account that signs transactions.
struct TransactionSigner {
    account_id: String,
    signer: Arc<AccountSigner>,
}

/// Chain client over JSON-RPC.
///
/// View calls use finality `final`. Transactions require a signing account
/// configured with [`NearRpcClient::with_signer`].
#[derive(Clone)]
pub struct NearRpcClient {
    client: Client,
    rpc_url: String,
    contract_id: String,
    signer: Option<Arc<TransactionSigner>>,
}

impl NearRpcClient {
    /// Create a read-only client.
    pub fn new(rpc_url: String, contract_id: String) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(RPC_COMMIT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ChainError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            rpc_url,
            contract_id,
            signer: None,
        })
    }

    /// Attach the account used to sign `create_call` / `end_call`.
    #[must_use]
    pub fn with_signer(mut self, account_id: String, signer: Arc<AccountSigner>) -> Self {
        self.signer = Some(Arc::new(TransactionSigner { account_id, signer }));
        self
    }

    #[must_use]
    pub fn contract_id(&self) -> &str {
        &self.contract_id
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<T, ChainError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: "dontcare",
            method,
            params,
        };

        let response = self
            .client
            .post(&self.rpc_url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "common.chain", error = %e, method = %method, "RPC request failed");
                ChainError::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "common.chain", status = %status, method = %method, "RPC returned non-success status");
            return Err(ChainError::Rpc(format!("HTTP status {status}")));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(ChainError::Rpc(error.to_string()));
        }

        let result = body
            .result
            .ok_or_else(|| ChainError::InvalidResponse("missing result".to_string()))?;

        // Query errors can also be reported inside a successful envelope.
        if let Some(error) = result.get("error") {
            return Err(ChainError::Rpc(error.to_string()));
        }

        serde_json::from_value(result).map_err(|e| ChainError::InvalidResponse(e.to_string()))
    }

    async fn query<T: DeserializeOwned>(&self, params: Value) -> Result<T, ChainError> {
        self.call(
            "query",
            params,
            Duration::from_secs(RPC_REQUEST_TIMEOUT_SECS),
        )
        .await
    }

    /// Call a view method of the contract with empty arguments and decode
    /// its JSON result.
    async fn view<T: DeserializeOwned>(&self, method_name: &str) -> Result<T, ChainError> {
        let call: CallResult = self
            .query(json!({
                "request_type": "call_function",
                "finality": "final",
                "account_id": self.contract_id,
                "method_name": method_name,
                "args_base64": "",
            }))
            .await?;

        serde_json::from_slice(&call.result).map_err(|e| {
            ChainError::InvalidResponse(format!("{method_name} returned unexpected data: {e}"))
        })
    }

    #[instrument(skip_all, fields(method = %method_name))]
    async fn function_call(&self, method_name: &str, args: Vec<u8>) -> Result<(), ChainError> {
        let signing = self.signer.as_ref().ok_or(ChainError::MissingSigner)?;
        let public_key = signing.signer.public_key();

        let key: AccessKeyView = self
            .query(json!({
                "request_type": "view_access_key",
                "finality": "final",
                "account_id": signing.account_id,
                "public_key": public_key.to_string(),
            }))
            .await?;

        let block_hash = key
            .block_hash
            .ok_or_else(|| ChainError::InvalidResponse("missing block_hash".to_string()))?;
        let block_hash: [u8; 32] = bs58::decode(&block_hash)
            .into_vec()
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| ChainError::InvalidResponse("malformed block_hash".to_string()))?;

        let transaction = FunctionCallTransaction {
            signer_id: &signing.account_id,
            public_key,
            nonce: key.nonce + 1,
            receiver_id: &self.contract_id,
            block_hash,
            method_name,
            args: &args,
            gas: FUNCTION_CALL_GAS,
            deposit: 0,
        };
        let signed = transaction.sign(&signing.signer)?;

        let outcome: Value = self
            .call(
                "broadcast_tx_commit",
                json!([STANDARD.encode(signed)]),
                Duration::from_secs(RPC_COMMIT_TIMEOUT_SECS),
            )
            .await?;

        if let Some(failure) = outcome.get("status").and_then(|s| s.get("Failure")) {
            warn!(target: "common.chain", method = %method_name, failure = %failure, "Transaction failed");
            return Err(ChainError::Rpc(format!("{method_name} failed: {failure}")));
        }

        let tx_hash = outcome
            .pointer("/transaction/hash")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        info!(
            target: "common.chain",
            method = %method_name,
            tx_hash = %tx_hash,
            "Transaction committed"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChainClient for NearRpcClient {
    #[instrument(skip(self))]
    async fn access_keys(&self, account_id: &str) -> Result<Vec<AccessKeyInfo>, ChainError> {
        let list: AccessKeyList = self
            .query(json!({
                "request_type": "view_access_key_list",
                "finality": "final",
                "account_id": account_id,
            }))
            .await?;

        debug!(target: "common.chain", account_id = %account_id, count = list.keys.len(), "Fetched access keys");

        Ok(list
            .keys
            .into_iter()
            .map(|entry| AccessKeyInfo {
                public_key: entry.public_key,
                full_access: entry.access_key.permission.as_str() == Some("FullAccess"),
            })
            .collect())
    }

    async fn get_nodes(&self) -> Result<Vec<NodeInfo>, ChainError> {
        self.view("get_nodes").await
    }

    async fn get_epoch_height(&self) -> Result<u64, ChainError> {
        self.view("get_epoch_height").await
    }

    async fn create_call(&self, call: &CreateCall) -> Result<(), ChainError> {
        let args = serde_json::to_vec(call)
            .map_err(|e| ChainError::InvalidResponse(format!("failed to encode args: {e}")))?;
        self.function_call("create_call", args).await
    }

    async fn end_call(&self, call: &EndCall) -> Result<(), ChainError> {
        let args = serde_json::to_vec(call)
            .map_err(|e| ChainError::InvalidResponse(format!("failed to encode args: {e}")))?;
        self.function_call("end_call", args).await
    }
}
