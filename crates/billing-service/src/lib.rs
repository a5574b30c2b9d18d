//! Billing Authority Service Library
//!
//! The other half of the SFU's usage-billing handshake:
//!
//! - Opens conferences on a media node and issues signed join credentials
//! - Keeps a ledger of conferences and participants
//! - Answers SFU lifecycle callbacks with confirmations signed over
//!   `call_id:duration:epoch`, which the SFU submits to the contract
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//! ```

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
