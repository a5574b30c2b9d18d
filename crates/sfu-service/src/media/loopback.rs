//! In-process media engine.
//!
//! Tracks sessions and peers and speaks enough SDP to drive the signaling
//! state machine end to end: offers are answered by flipping the DTLS setup
//! role, every `a=msid:<stream>` line of an applied offer publishes that
//! stream once, and each publication triggers a renegotiation offer to the
//! other peers of the session. No media is forwarded.

use super::{
    IceCandidateInit, JoinConfig, MediaEngine, MediaError, MediaPeer, MediaSession, PeerEvent,
    SessionDescription, TARGET_PUBLISHER, TARGET_SUBSCRIBER,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::debug;

type SessionMap = DashMap<String, Arc<LoopbackSession>>;

/// Loopback media engine.
#[derive(Default)]
pub struct LoopbackEngine {
    sessions: Arc<SessionMap>,
}

impl LoopbackEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions with at least one attached peer.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn join(
        &self,
        session_id: &str,
        peer_id: &str,
        config: &JoinConfig,
    ) -> Result<(Arc<dyn MediaPeer>, mpsc::UnboundedReceiver<PeerEvent>), MediaError> {
        let session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(LoopbackSession {
                    id: session_id.to_string(),
                    peers: DashMap::new(),
                    engine: Arc::downgrade(&self.sessions),
                })
            })
            .clone();

        let (events, receiver) = mpsc::unbounded_channel();
        let peer = Arc::new(LoopbackPeer {
            id: peer_id.to_string(),
            session: Arc::clone(&session),
            events,
            published: DashSet::new(),
            publish_enabled: !config.no_publish,
            candidate_sent: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        match session.peers.entry(peer_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(MediaError::Join(format!(
                    "peer {peer_id} already attached to {session_id}"
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&peer));
            }
        }

        debug!(target: "sfu.media", session_id = %session_id, peer_id = %peer_id, "Peer attached");
        Ok((peer, receiver))
    }
}

struct LoopbackSession {
    id: String,
    peers: DashMap<String, Arc<LoopbackPeer>>,
    engine: Weak<SessionMap>,
}

impl LoopbackSession {
    fn detach(&self, peer_id: &str) {
        self.peers.remove(peer_id);
        if self.peers.is_empty() {
            if let Some(sessions) = self.engine.upgrade() {
                sessions.remove_if(&self.id, |_, session| session.peers.is_empty());
            }
        }
    }

    fn others(&self, peer_id: &str) -> Vec<Arc<LoopbackPeer>> {
        self.peers
            .iter()
            .filter(|entry| entry.key() != peer_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

#[async_trait]
impl MediaSession for LoopbackSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn peer_count(&self) -> usize {
        self.peers.len()
    }

    async fn close_all(&self) {
        let peers: Vec<Arc<LoopbackPeer>> = self
            .peers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for peer in peers {
            peer.shutdown();
        }
    }
}

struct LoopbackPeer {
    id: String,
    session: Arc<LoopbackSession>,
    events: mpsc::UnboundedSender<PeerEvent>,
    published: DashSet<String>,
    publish_enabled: bool,
    candidate_sent: AtomicBool,
    closed: AtomicBool,
}

impl LoopbackPeer {
    fn ensure_open(&self) -> Result<(), MediaError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(MediaError::Closed)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: PeerEvent) {
        // Receiver is gone once the connection handler has finished
        let _ = self.events.send(event);
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.session.detach(&self.id);
        debug!(target: "sfu.media", session_id = %self.session.id, peer_id = %self.id, "Peer closed");
        self.emit(PeerEvent::TransportClosed);
    }
}

/// Stream ids announced by `a=msid:<stream> <track>` lines.
fn msid_streams(sdp: &str) -> Vec<&str> {
    sdp.lines()
        .filter_map(|line| line.trim().strip_prefix("a=msid:"))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter(|stream| *stream != "-")
        .collect()
}

fn renegotiation_offer(stream_id: &str) -> SessionDescription {
    SessionDescription::offer(format!(
        "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=setup:actpass\r\na=msid:{stream_id} {stream_id}-track\r\n"
    ))
}

#[async_trait]
impl MediaPeer for LoopbackPeer {
    fn id(&self) -> &str {
        &self.id
    }

    fn session(&self) -> Arc<dyn MediaSession> {
        Arc::clone(&self.session) as Arc<dyn MediaSession>
    }

    async fn answer(&self, offer: SessionDescription) -> Result<SessionDescription, MediaError> {
        self.ensure_open()?;
        if offer.sdp_type != "offer" {
            return Err(MediaError::Negotiation(format!(
                "expected offer, got {}",
                offer.sdp_type
            )));
        }
        if !offer.sdp.trim_start().starts_with("v=0") {
            return Err(MediaError::Negotiation("malformed sdp".to_string()));
        }

        let answer = SessionDescription::answer(offer.sdp.replace("a=setup:actpass", "a=setup:active"));

        if !self.candidate_sent.swap(true, Ordering::SeqCst) {
            self.emit(PeerEvent::IceCandidate {
                candidate: IceCandidateInit {
                    candidate: "candidate:1 1 udp 2130706431 127.0.0.1 9 typ host".to_string(),
                    sdp_mid: Some("0".to_string()),
                    sdp_mline_index: Some(0),
                    username_fragment: None,
                },
                target: TARGET_PUBLISHER,
            });
        }

        if self.publish_enabled {
            for stream_id in msid_streams(&offer.sdp) {
                if self.published.insert(stream_id.to_string()) {
                    self.emit(PeerEvent::TrackPublished {
                        stream_id: stream_id.to_string(),
                    });
                    for other in self.session.others(&self.id) {
                        other.emit(PeerEvent::Offer(renegotiation_offer(stream_id)));
                    }
                }
            }
        }

        Ok(answer)
    }

    async fn set_remote_description(&self, answer: SessionDescription) -> Result<(), MediaError> {
        self.ensure_open()?;
        if answer.sdp_type != "answer" {
            return Err(MediaError::Negotiation(format!(
                "expected answer, got {}",
                answer.sdp_type
            )));
        }
        Ok(())
    }

    async fn trickle(&self, _candidate: IceCandidateInit, target: i32) -> Result<(), MediaError> {
        self.ensure_open()?;
        if target != TARGET_PUBLISHER && target != TARGET_SUBSCRIBER {
            return Err(MediaError::Ice(format!("unknown transport target {target}")));
        }
        Ok(())
    }

    async fn close(&self) {
        self.shutdown();
    }
}
