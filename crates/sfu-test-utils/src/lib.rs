//! # SFU Test Utilities
//!
//! Shared test utilities for the SFU signaling service.
//!
//! This crate provides:
//! - Deterministic account keys and signed join credentials
//! - Server test harness (`TestSfuServer` for E2E tests)
//! - A JSON-RPC WebSocket client (`SignalClient`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sfu_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let account = TestAccount::new("client.near", 1)?;
//!     let server = TestSfuServer::spawn(account.chain()).await?;
//!
//!     let mut client = SignalClient::connect(&server.ws_url()).await?;
//!     let credential = account.credential("conf-1", "alice");
//!     let reply = client.join(&account, &credential, PUBLISH_OFFER).await?;
//!     assert_eq!(reply["result"]["type"], "answer");
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod server_harness;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use server_harness::*;
