//! Common utilities and types shared by the SFU and billing services.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for wire types exchanged between the SFU and the billing authority
pub mod types;

/// Module for `ed25519:<base58>` account keys and signatures
pub mod signer;

/// Module for the billing contract client (JSON-RPC)
pub mod chain;
