//! SFU service configuration.
//!
//! Configuration is loaded from environment variables. The account signing
//! key is redacted in Debug output.

use common::chain::{DEFAULT_CONTRACT_ID, DEFAULT_RPC_URL};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default signaling (WebSocket) bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:7000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Peer count above which a join is rejected.
pub const DEFAULT_MAX_PEERS: usize = 9;

/// Default watchdog poll interval in seconds.
pub const DEFAULT_WATCHDOG_POLL_SECONDS: u64 = 10;

/// Default conference lifetime ceiling in seconds (30 minutes).
pub const DEFAULT_MAX_CONFERENCE_SECONDS: u64 = 1800;

/// Default timeout for billing callbacks in seconds.
pub const DEFAULT_CALLBACK_TIMEOUT_SECONDS: u64 = 10;

/// Default retention of ended conferences in seconds (24 hours).
pub const DEFAULT_ENDED_RETENTION_SECONDS: u64 = 86_400;

/// SFU service configuration.
#[derive(Clone)]
pub struct Config {
    /// Signaling WebSocket bind address (default: "0.0.0.0:7000").
    pub bind_address: String,

    /// Health and metrics bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Account signing key in `ed25519:<base58>` form.
    pub near_pk: SecretString,

    /// Account that signs `create_call` / `end_call`.
    pub near_account: String,

    /// Chain JSON-RPC endpoint.
    pub near_rpc_url: String,

    /// Billing contract account.
    pub contract_id: String,

    /// Reject a join when the conference's peer count exceeds this.
    pub max_peers: usize,

    /// How often the watchdog checks a conference.
    pub watchdog_poll_interval: Duration,

    /// Conference lifetime after which all peers are closed.
    pub max_conference_duration: Duration,

    /// Timeout applied to each billing callback.
    pub callback_timeout: Duration,

    /// How long ended conferences stay in the registry.
    pub ended_retention: Duration,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("near_pk", &"[REDACTED]")
            .field("near_account", &self.near_account)
            .field("near_rpc_url", &self.near_rpc_url)
            .field("contract_id", &self.contract_id)
            .field("max_peers", &self.max_peers)
            .field("watchdog_poll_interval", &self.watchdog_poll_interval)
            .field("max_conference_duration", &self.max_conference_duration)
            .field("callback_timeout", &self.callback_timeout)
            .field("ended_retention", &self.ended_retention)
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
        let near_pk = SecretString::from(
            vars.get("NEAR_PK")
                .ok_or_else(|| ConfigError::MissingEnvVar("NEAR_PK".to_string()))?
                .clone(),
        );

        let near_account = vars
            .get("NEAR_ACCOUNT")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnvVar("NEAR_ACCOUNT".to_string()))?;

        let bind_address = vars
            .get("SFU_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SFU_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let near_rpc_url = vars
            .get("NEAR_RPC_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());

        let contract_id = vars
            .get("NEAR_CONTRACT_ID")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONTRACT_ID.to_string());

        let max_peers = parse_or(vars, "SFU_MAX_PEERS", DEFAULT_MAX_PEERS)?;

        let watchdog_poll_seconds: u64 = parse_or(
            vars,
            "SFU_WATCHDOG_POLL_SECONDS",
            DEFAULT_WATCHDOG_POLL_SECONDS,
        )?;
        if watchdog_poll_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "SFU_WATCHDOG_POLL_SECONDS must be greater than 0".to_string(),
            ));
        }

        let max_conference_seconds: u64 = parse_or(
            vars,
            "SFU_MAX_CONFERENCE_SECONDS",
            DEFAULT_MAX_CONFERENCE_SECONDS,
        )?;

        let callback_timeout_seconds: u64 = parse_or(
            vars,
            "SFU_CALLBACK_TIMEOUT_SECONDS",
            DEFAULT_CALLBACK_TIMEOUT_SECONDS,
        )?;

        let ended_retention_seconds: u64 = parse_or(
            vars,
            "SFU_ENDED_RETENTION_SECONDS",
            DEFAULT_ENDED_RETENTION_SECONDS,
        )?;

        Ok(Config {
            bind_address,
            health_bind_address,
            near_pk,
            near_account,
            near_rpc_url,
            contract_id,
            max_peers,
            watchdog_poll_interval: Duration::from_secs(watchdog_poll_seconds),
            max_conference_duration: Duration::from_secs(max_conference_seconds),
            callback_timeout: Duration::from_secs(callback_timeout_seconds),
            ended_retention: Duration::from_secs(ended_retention_seconds),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(value) => value.parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{name} must be a non-negative integer, got '{value}'"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("NEAR_PK".to_string(), "ed25519:secret".to_string()),
            ("NEAR_ACCOUNT".to_string(), "sfu.near".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_with_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.near_pk.expose_secret(), "ed25519:secret");
        assert_eq!(config.near_account, "sfu.near");
        assert_eq!(config.near_rpc_url, DEFAULT_RPC_URL);
        assert_eq!(config.contract_id, DEFAULT_CONTRACT_ID);
        assert_eq!(config.max_peers, 9);
        assert_eq!(config.watchdog_poll_interval, Duration::from_secs(10));
        assert_eq!(config.max_conference_duration, Duration::from_secs(1800));
        assert_eq!(config.callback_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_from_vars_overrides() {
        let mut vars = base_vars();
        vars.insert("SFU_MAX_PEERS".to_string(), "3".to_string());
        vars.insert("SFU_MAX_CONFERENCE_SECONDS".to_string(), "60".to_string());
        vars.insert("NEAR_CONTRACT_ID".to_string(), "billing.testnet".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.max_peers, 3);
        assert_eq!(config.max_conference_duration, Duration::from_secs(60));
        assert_eq!(config.contract_id, "billing.testnet");
    }

    #[test]
    fn test_missing_signing_key() {
        let mut vars = base_vars();
        vars.remove("NEAR_PK");

        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(name) if name == "NEAR_PK"));
    }

    #[test]
    fn test_missing_account() {
        let mut vars = base_vars();
        vars.remove("NEAR_ACCOUNT");

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn test_invalid_number() {
        let mut vars = base_vars();
        vars.insert("SFU_MAX_PEERS".to_string(), "lots".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut vars = base_vars();
        vars.insert("SFU_WATCHDOG_POLL_SECONDS".to_string(), "0".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_debug_redacts_signing_key() {
        let config = Config::from_vars(&base_vars()).unwrap();
        let debug = format!("{config:?}");

        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("ed25519:secret"));
    }
}
