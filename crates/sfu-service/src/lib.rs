//! SFU Signaling Service Library
//!
//! Conference signaling in front of a media engine, with the in-memory
//! conference registry and the usage-billing handshake:
//!
//! - Join authentication against an account's full-access keys
//! - Per-connection JSON-RPC signaling (join/offer/answer/trickle/end)
//! - Conference and participant bookkeeping with billable-minute accounting
//! - Lifecycle callbacks to the billing authority and contract submission
//! - A per-conference watchdog bounding conference lifetime
//!
//! # Architecture
//!
//! ```text
//! WebSocket ──► ConnectionHandler (one task per connection)
//!                 │  join ─► SignatureAuthenticator ─► ChainClient
//!                 │  offer/answer/trickle ─► MediaPeer
//!                 │  PeerEvent channel ◄─ MediaEngine
//!                 ▼
//!            ConferenceLifecycle ─► ConferenceRegistry (DashMap)
//!                 │                 └─► Watchdog (one task per conference)
//!                 ▼
//!            BillingNotifier (one task per event) ─► billing authority ─► ChainClient
//! ```
//!
//! # Modules
//!
//! - [`auth`] - Join credential verification
//! - [`registry`] - Conference and participant state
//! - [`duration`] - Billable minute accounting
//! - [`lifecycle`] - Track-published / transport-closed transitions
//! - [`watchdog`] - Conference lifetime ceiling
//! - [`notifier`] - Billing authority callbacks
//! - [`media`] - Media engine boundary and the loopback engine
//! - [`signaling`] - JSON-RPC protocol, connection state machine, WebSocket transport

pub mod auth;
pub mod config;
pub mod duration;
pub mod errors;
pub mod lifecycle;
pub mod media;
pub mod notifier;
pub mod observability;
pub mod registry;
pub mod routes;
pub mod signaling;
pub mod watchdog;
