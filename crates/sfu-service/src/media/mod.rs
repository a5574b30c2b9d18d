//! Media engine boundary.
//!
//! The signaling layer never touches RTP or ICE itself. It drives a
//! [`MediaEngine`] through [`MediaPeer`] handles and receives the engine's
//! asynchronous notifications as [`PeerEvent`]s on a per-peer channel:
//! renegotiation offers and local ICE candidates to push to the client, the
//! first publication of each media stream, and transport closure.
//!
//! Events from different peers are independent; the only ordering is per
//! peer, in channel order. The channel is unbounded so the engine never
//! blocks on a handler that is itself waiting on the engine.

pub mod loopback;

pub use loopback::LoopbackEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Session description as exchanged with browsers: `{"type", "sdp"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,

    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,

    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

/// Per-peer join options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct JoinConfig {
    pub no_publish: bool,
    pub no_subscribe: bool,
    pub no_auto_subscribe: bool,
}

/// Which of a peer's two transports a candidate belongs to.
pub const TARGET_PUBLISHER: i32 = 0;
pub const TARGET_SUBSCRIBER: i32 = 1;

/// Asynchronous notification from the engine about one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Server-initiated renegotiation; forward to the client.
    Offer(SessionDescription),

    /// Local ICE candidate; forward to the client.
    IceCandidate {
        candidate: IceCandidateInit,
        target: i32,
    },

    /// A media stream from this peer was published for the first time.
    TrackPublished { stream_id: String },

    /// The peer's transport closed. Always the last event.
    TransportClosed,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("join failed: {0}")]
    Join(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("ice failed: {0}")]
    Ice(String),

    #[error("peer is closed")]
    Closed,
}

/// Media session shared by every peer of one conference.
#[async_trait]
pub trait MediaSession: Send + Sync {
    fn id(&self) -> &str;

    /// Peers currently attached to the session.
    fn peer_count(&self) -> usize;

    /// Close every attached peer. Each emits `TransportClosed`.
    async fn close_all(&self);
}

/// One participant's attachment to a media session.
#[async_trait]
pub trait MediaPeer: Send + Sync {
    fn id(&self) -> &str;

    fn session(&self) -> Arc<dyn MediaSession>;

    /// Apply a client offer and produce the answer.
    async fn answer(&self, offer: SessionDescription) -> Result<SessionDescription, MediaError>;

    /// Apply a client answer to a server-initiated offer.
    async fn set_remote_description(&self, answer: SessionDescription) -> Result<(), MediaError>;

    /// Add a remote ICE candidate to the targeted transport.
    async fn trickle(&self, candidate: IceCandidateInit, target: i32) -> Result<(), MediaError>;

    /// Close the peer's transports. Idempotent.
    async fn close(&self);
}

/// Admits peers into media sessions.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Attach `peer_id` to the session `session_id`, creating the session on
    /// first use. Returns the peer handle and its event stream.
    async fn join(
        &self,
        session_id: &str,
        peer_id: &str,
        config: &JoinConfig,
    ) -> Result<(Arc<dyn MediaPeer>, mpsc::UnboundedReceiver<PeerEvent>), MediaError>;
}
