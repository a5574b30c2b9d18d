//! Billing service configuration.
//!
//! Configuration is loaded from environment variables. The database URL and
//! the account signing key are redacted in Debug output.

use common::chain::{DEFAULT_CONTRACT_ID, DEFAULT_RPC_URL};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default billing account embedded in issued credentials.
pub const DEFAULT_ACCOUNT_ID: &str = "nmeet.near";

/// Default callback base URL embedded in issued credentials.
pub const DEFAULT_CALLBACK_URL: &str = "https://nmeet.org";

/// Billing service configuration.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: SecretString,

    /// HTTP bind address (default: "0.0.0.0:3000").
    pub bind_address: String,

    /// Signing key for credentials and confirmations, `ed25519:<base58>`.
    pub near_pk: SecretString,

    /// Account written into credentials as the billed account.
    pub account_id: String,

    /// Base URL the SFU calls back for lifecycle events.
    pub callback_url: String,

    /// Chain JSON-RPC endpoint.
    pub near_rpc_url: String,

    /// Billing contract account.
    pub contract_id: String,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("near_pk", &"[REDACTED]")
            .field("account_id", &self.account_id)
            .field("callback_url", &self.callback_url)
            .field("near_rpc_url", &self.near_rpc_url)
            .field("contract_id", &self.contract_id)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = SecretString::from(required(vars, "DATABASE_URL")?);
        let near_pk = SecretString::from(required(vars, "NEAR_PK")?);

        let bind_address = vars
            .get("BILLING_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let account_id = vars
            .get("NEAR_ACCOUNT")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ACCOUNT_ID.to_string());

        let callback_url = vars
            .get("BILLING_CALLBACK_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CALLBACK_URL.to_string());
        if !callback_url.starts_with("http://") && !callback_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(format!(
                "BILLING_CALLBACK_URL must be an http(s) URL, got '{callback_url}'"
            )));
        }

        let near_rpc_url = vars
            .get("NEAR_RPC_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());

        let contract_id = vars
            .get("NEAR_CONTRACT_ID")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONTRACT_ID.to_string());

        Ok(Config {
            database_url,
            bind_address,
            near_pk,
            account_id,
            callback_url,
            near_rpc_url,
            contract_id,
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}
