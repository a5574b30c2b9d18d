//! Secret types for protecting key material from accidental logging.
//!
//! Re-exports the [`secrecy`] wrappers used across the workspace. Both
//! services hold an account signing key (`NEAR_PK`) for their whole
//! lifetime, and the billing service additionally holds a database URL with
//! embedded credentials. Those values must never reach a log line.
//!
//! `SecretString` and `SecretBox<T>` implement `Debug` with redaction, so a
//! struct that derives `Debug` over them is safe to pass to `tracing`.
//! Secrets are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct ChainSettings {
//!     account_id: String,
//!     signing_key: SecretString,
//! }
//!
//! let settings = ChainSettings {
//!     account_id: "nmeet.near".to_string(),
//!     signing_key: SecretString::from("ed25519:3D4YudUahN1nawWogh8pAKSj92sUNMdbZGjn7kERKzYoTy8tnFQuwoGUC51DowKqorvkr2pytJSnwuSbsNVfqygr"),
//! };
//!
//! // The key is redacted
//! let rendered = format!("{:?}", settings);
//! assert!(!rendered.contains("3D4Yud"));
//!
//! // Explicit access is required to use the value
//! let _raw: &str = settings.signing_key.expose_secret();
//! ```
//!
//! # Usage
//!
//! Use `SecretString` for:
//! - Account signing keys in their textual `ed25519:<base58>` form
//! - Database URLs that carry passwords
//!
//! Use `SecretBox<T>` for:
//! - Decoded key bytes (e.g., `SecretBox<[u8; 32]>` for an Ed25519 seed)

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
