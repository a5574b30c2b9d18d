//! Client signaling: JSON-RPC framing, the per-connection state machine and
//! the WebSocket transport that drives it.

pub mod handler;
pub mod protocol;
pub mod ws;

pub use handler::{ConnectionHandler, ConnectionState, Flow, SignalContext};
