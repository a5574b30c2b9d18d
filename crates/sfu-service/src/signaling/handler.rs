//! Per-connection signaling state machine.
//!
//! ```text
//! Unauthenticated ──join──► Joined ──offer/answer──► Established
//!                              │                        │  ▲
//!                              │        server offer    ▼  │ answer
//!                              │                    Negotiating
//!                              └──────── transport closed ──────► Closed
//! ```
//!
//! A [`ConnectionHandler`] owns one client's media peer and consumes two
//! inputs in arrival order: text frames from the client and [`PeerEvent`]s
//! from the media engine. Outbound frames go to an unbounded channel drained
//! by the transport's writer task.

use crate::auth::SignatureAuthenticator;
use crate::errors::SignalError;
use crate::lifecycle::{ConferenceLifecycle, PeerContext};
use crate::media::{MediaEngine, MediaPeer, PeerEvent};
use crate::observability::metrics;
use crate::signaling::protocol::{self, Join, Negotiation, Request, Trickle};
use common::types::ConferenceUser;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Upper bound on waiting for the engine's close notification at shutdown.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared dependencies of every connection.
pub struct SignalContext {
    pub authenticator: Arc<SignatureAuthenticator>,
    pub engine: Arc<dyn MediaEngine>,
    pub lifecycle: Arc<ConferenceLifecycle>,
    /// Reject a join once the conference has more peers than this.
    pub max_peers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Joined,
    /// A server-initiated offer is awaiting the client's answer.
    Negotiating,
    Established,
    Closed,
}

/// What the transport should do after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

struct Joined {
    peer: Arc<dyn MediaPeer>,
    ctx: PeerContext,
}

pub struct ConnectionHandler {
    signal: Arc<SignalContext>,
    outbound: mpsc::UnboundedSender<Value>,
    state: ConnectionState,
    joined: Option<Joined>,
    events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
}

impl ConnectionHandler {
    pub fn new(signal: Arc<SignalContext>, outbound: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            signal,
            outbound,
            state: ConnectionState::Unauthenticated,
            joined: None,
            events: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Verified credential of the joined participant.
    pub fn user(&self) -> Option<&ConferenceUser> {
        self.joined.as_ref().map(|joined| &joined.ctx.user)
    }

    fn send(&self, frame: Value) {
        // Receiver is gone once the writer task has stopped
        let _ = self.outbound.send(frame);
    }

    /// Handle one client text frame.
    pub async fn handle_text(&mut self, text: &str) -> Flow {
        let request = match Request::parse(text) {
            Ok(request) => request,
            Err(err) => {
                debug!(target: "sfu.signaling", error = %err, "Unparseable frame");
                self.send(protocol::error(None, &err));
                return Flow::Continue;
            }
        };

        let outcome = match request.method.as_str() {
            "join" => {
                let outcome = self.join(&request).await;
                match &outcome {
                    Ok(_) => metrics::record_join("success"),
                    Err(err) => metrics::record_join(err.kind()),
                }
                outcome
            }
            "offer" => self.offer(&request).await,
            "answer" => self.answer(&request).await,
            "trickle" => self.trickle(&request).await,
            "end" => self.end().await,
            other => Err(SignalError::MethodNotFound(other.to_string())),
        };

        match outcome {
            Ok(Some(result)) => {
                if let Some(id) = &request.id {
                    self.send(protocol::result(id, result));
                }
                Flow::Continue
            }
            Ok(None) => Flow::Continue,
            Err(err) => {
                warn!(
                    target: "sfu.signaling",
                    method = %request.method,
                    error = %err,
                    "Signaling request failed"
                );
                self.send(protocol::error(request.id.as_ref(), &err));
                if err.closes_connection() {
                    Flow::Close
                } else {
                    Flow::Continue
                }
            }
        }
    }

    #[instrument(skip_all, name = "sfu.signaling.join")]
    async fn join(&mut self, request: &Request) -> Result<Option<Value>, SignalError> {
        if self.joined.is_some() {
            return Err(SignalError::AlreadyJoined);
        }

        let join: Join = request
            .params()
            .map_err(|e| SignalError::InvalidParams(format!("invalid join params: {e}")))?;
        let user: ConferenceUser = serde_json::from_str(&join.sid)
            .map_err(|e| SignalError::InvalidParams(format!("invalid credential: {e}")))?;

        if let Some(conference) = self.signal.lifecycle.registry().lookup(&user.sid) {
            if conference.is_ended() {
                return Err(SignalError::EndedConference(user.sid));
            }
            if conference.is_online(&user.uid) {
                return Err(SignalError::ParticipantExists(user.uid));
            }
        }

        self.signal
            .authenticator
            .verify(&user.account_id, join.sid.as_bytes(), &join.uid)
            .await?;

        let (peer, events) = self
            .signal
            .engine
            .join(&user.sid, &user.uid, &join.config)
            .await
            .map_err(|e| SignalError::Transport(e.to_string()))?;

        // Capacity is checked after admission; the peer is torn down on reject
        let session = peer.session();
        let peers = session.peer_count();
        if peers > self.signal.max_peers {
            peer.close().await;
            return Err(SignalError::TooManyParticipants {
                conference_id: user.sid,
                peers,
                limit: self.signal.max_peers,
            });
        }

        let answer = match peer.answer(join.offer).await {
            Ok(answer) => answer,
            Err(e) => {
                peer.close().await;
                return Err(SignalError::Transport(e.to_string()));
            }
        };

        info!(
            target: "sfu.signaling",
            conference_id = %user.sid,
            participant_id = %user.uid,
            peers,
            "Participant joined"
        );

        self.events = Some(events);
        self.joined = Some(Joined {
            peer,
            ctx: PeerContext { user, session },
        });
        self.state = ConnectionState::Joined;

        serde_json::to_value(answer)
            .map(Some)
            .map_err(|e| SignalError::Transport(e.to_string()))
    }

    fn peer(&self) -> Result<Arc<dyn MediaPeer>, SignalError> {
        self.joined
            .as_ref()
            .map(|joined| Arc::clone(&joined.peer))
            .ok_or(SignalError::NotJoined)
    }

    async fn offer(&mut self, request: &Request) -> Result<Option<Value>, SignalError> {
        let peer = self.peer()?;
        let negotiation: Negotiation = request
            .params()
            .map_err(|e| SignalError::InvalidNegotiation(format!("invalid offer: {e}")))?;

        let answer = peer
            .answer(negotiation.desc)
            .await
            .map_err(|e| SignalError::Transport(e.to_string()))?;
        self.state = ConnectionState::Established;

        serde_json::to_value(answer)
            .map(Some)
            .map_err(|e| SignalError::Transport(e.to_string()))
    }

    async fn answer(&mut self, request: &Request) -> Result<Option<Value>, SignalError> {
        let peer = self.peer()?;
        let negotiation: Negotiation = request
            .params()
            .map_err(|e| SignalError::InvalidNegotiation(format!("invalid answer: {e}")))?;

        peer.set_remote_description(negotiation.desc)
            .await
            .map_err(|e| SignalError::Transport(e.to_string()))?;
        self.state = ConnectionState::Established;
        Ok(Some(Value::Null))
    }

    async fn trickle(&mut self, request: &Request) -> Result<Option<Value>, SignalError> {
        let peer = self.peer()?;
        let trickle: Trickle = request
            .params()
            .map_err(|e| SignalError::InvalidNegotiation(format!("invalid candidate: {e}")))?;

        peer.trickle(trickle.candidate, trickle.target)
            .await
            .map_err(|e| SignalError::Transport(e.to_string()))?;
        Ok(Some(Value::Null))
    }

    /// Host ends the conference for everyone; anyone else leaves.
    async fn end(&mut self) -> Result<Option<Value>, SignalError> {
        let joined = self.joined.as_ref().ok_or(SignalError::NotJoined)?;
        let user = &joined.ctx.user;

        let is_host = self
            .signal
            .lifecycle
            .registry()
            .lookup(&user.sid)
            .is_some_and(|conference| conference.host == user.uid);

        if is_host {
            info!(target: "sfu.signaling", conference_id = %user.sid, participant_id = %user.uid, "Host ended conference");
            joined.ctx.session.close_all().await;
        } else {
            info!(target: "sfu.signaling", conference_id = %user.sid, participant_id = %user.uid, "Participant left");
            joined.peer.close().await;
        }
        Ok(None)
    }

    /// Next media event for this connection. Pending until joined.
    pub async fn next_peer_event(&mut self) -> PeerEvent {
        match self.events.as_mut() {
            // A dropped engine-side sender means the transport is gone
            Some(events) => events.recv().await.unwrap_or(PeerEvent::TransportClosed),
            None => std::future::pending().await,
        }
    }

    /// Apply one media event.
    pub fn handle_peer_event(&mut self, event: PeerEvent) -> Flow {
        let Some(joined) = self.joined.as_ref() else {
            return Flow::Continue;
        };

        match event {
            PeerEvent::Offer(desc) => {
                self.send(protocol::notification("offer", desc));
                self.state = ConnectionState::Negotiating;
                Flow::Continue
            }
            PeerEvent::IceCandidate { candidate, target } => {
                self.send(protocol::notification("trickle", Trickle { target, candidate }));
                Flow::Continue
            }
            PeerEvent::TrackPublished { stream_id } => {
                self.signal
                    .lifecycle
                    .on_track_published(&joined.ctx, &stream_id);
                Flow::Continue
            }
            PeerEvent::TransportClosed => {
                self.signal.lifecycle.on_transport_closed(&joined.ctx);
                self.events = None;
                self.state = ConnectionState::Closed;
                Flow::Close
            }
        }
    }

    /// Close the peer (if any) and process events up to its close
    /// notification, so the participant always leaves the registry.
    pub async fn shutdown(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let Some(peer) = self.joined.as_ref().map(|joined| Arc::clone(&joined.peer)) else {
            self.state = ConnectionState::Closed;
            return;
        };

        peer.close().await;
        let drained = tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, async {
            loop {
                let event = self.next_peer_event().await;
                if self.handle_peer_event(event) == Flow::Close {
                    break;
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(target: "sfu.signaling", "Timed out waiting for transport close");
        }
        self.state = ConnectionState::Closed;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::{LoopbackEngine, SessionDescription};
    use crate::notifier::mock::RecordingNotifier;
    use crate::notifier::BillingEvent;
    use crate::registry::ConferenceRegistry;
    use crate::watchdog::WatchdogConfig;
    use common::chain::mock::MockChainClient;
    use common::signer::AccountSigner;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    const ACCOUNT: &str = "client.near";
    const OFFER: &str = "v=0\r\na=setup:actpass\r\n";

    struct Harness {
        signal: Arc<SignalContext>,
        notifier: Arc<RecordingNotifier>,
        signer: AccountSigner,
    }

    fn harness(max_peers: usize) -> Harness {
        let signer = AccountSigner::from_seed(&[11; 32]).unwrap();
        let chain = MockChainClient::new().with_full_access_key(ACCOUNT, signer.public_key());
        let notifier = Arc::new(RecordingNotifier::new());
        let lifecycle = ConferenceLifecycle::new(
            Arc::new(ConferenceRegistry::new()),
            notifier.clone(),
            WatchdogConfig {
                poll_interval: Duration::from_secs(10),
                max_lifetime: Duration::from_secs(1800),
            },
            CancellationToken::new(),
        );
        let signal = Arc::new(SignalContext {
            authenticator: Arc::new(SignatureAuthenticator::new(Arc::new(chain))),
            engine: Arc::new(LoopbackEngine::new()),
            lifecycle: Arc::new(lifecycle),
            max_peers,
        });
        Harness {
            signal,
            notifier,
            signer,
        }
    }

    fn join_frame(signer: &AccountSigner, sid: &str, uid: &str, sdp: &str) -> String {
        let credential = ConferenceUser {
            sid: sid.to_string(),
            uid: uid.to_string(),
            call_id: "call-1".to_string(),
            callback_url: "http://cb".to_string(),
            account_id: ACCOUNT.to_string(),
        }
        .to_json()
        .unwrap();
        let signature = signer.sign_base64(credential.as_bytes());
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "join",
            "params": {
                "sid": credential,
                "uid": signature,
                "offer": SessionDescription::offer(sdp),
            }
        })
        .to_string()
    }

    fn connection(h: &Harness) -> (ConnectionHandler, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandler::new(Arc::clone(&h.signal), tx), rx)
    }

    /// Feed queued media events to the handler without blocking.
    async fn pump(handler: &mut ConnectionHandler) -> Flow {
        loop {
            let next = tokio::time::timeout(Duration::from_millis(20), handler.next_peer_event()).await;
            match next {
                Ok(event) => {
                    if handler.handle_peer_event(event) == Flow::Close {
                        return Flow::Close;
                    }
                }
                Err(_) => return Flow::Continue,
            }
        }
    }

    #[tokio::test]
    async fn test_join_returns_answer() {
        let h = harness(9);
        let (mut handler, mut out) = connection(&h);

        let flow = handler.handle_text(&join_frame(&h.signer, "c1", "p1", OFFER)).await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(handler.state(), ConnectionState::Joined);
        assert_eq!(handler.user().unwrap().uid, "p1");
        let reply = out.recv().await.unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["type"], "answer");
        assert!(reply["result"]["sdp"].as_str().unwrap().contains("a=setup:active"));
    }

    #[tokio::test]
    async fn test_join_with_bad_signature_closes() {
        let h = harness(9);
        let (mut handler, mut out) = connection(&h);
        let intruder = AccountSigner::from_seed(&[99; 32]).unwrap();

        let flow = handler.handle_text(&join_frame(&intruder, "c1", "p1", OFFER)).await;

        assert_eq!(flow, Flow::Close);
        let reply = out.recv().await.unwrap();
        assert_eq!(reply["error"]["message"], "verify error");
        assert_eq!(reply["error"]["code"], 500);
        assert_eq!(handler.state(), ConnectionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_duplicate_uid_rejected_and_kept_open() {
        let h = harness(9);
        let (mut first, _out1) = connection(&h);
        first
            .handle_text(&join_frame(&h.signer, "c1", "p1", "v=0\r\na=msid:s1 t1\r\n"))
            .await;
        pump(&mut first).await;

        let (mut second, mut out2) = connection(&h);
        let flow = second
            .handle_text(&join_frame(&h.signer, "c1", "p1", OFFER))
            .await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(out2.recv().await.unwrap()["error"]["message"], "uid exist");
    }

    #[tokio::test]
    async fn test_join_into_ended_conference() {
        let h = harness(9);
        let (mut first, _out1) = connection(&h);
        first
            .handle_text(&join_frame(&h.signer, "c1", "p1", "v=0\r\na=msid:s1 t1\r\n"))
            .await;
        pump(&mut first).await;
        first.shutdown().await;

        let (mut late, mut out) = connection(&h);
        let flow = late.handle_text(&join_frame(&h.signer, "c1", "p2", OFFER)).await;

        assert_eq!(flow, Flow::Close);
        assert_eq!(out.recv().await.unwrap()["error"]["message"], "ended conference");
    }

    #[tokio::test]
    async fn test_capacity_evicts_after_admission() {
        let h = harness(1);
        let (mut first, _out1) = connection(&h);
        first.handle_text(&join_frame(&h.signer, "c1", "p1", OFFER)).await;

        let (mut second, mut out2) = connection(&h);
        let flow = second.handle_text(&join_frame(&h.signer, "c1", "p2", OFFER)).await;

        assert_eq!(flow, Flow::Close);
        assert_eq!(
            out2.recv().await.unwrap()["error"]["message"],
            "too many participants"
        );
        // The evicted peer no longer counts against the session
        let session = first.joined.as_ref().unwrap().ctx.session.clone();
        assert_eq!(session.peer_count(), 1);
    }

    #[tokio::test]
    async fn test_negotiation_before_join() {
        let h = harness(9);
        let (mut handler, mut out) = connection(&h);

        let flow = handler
            .handle_text(r#"{"id":3,"method":"offer","params":{"desc":{"type":"offer","sdp":"v=0"}}}"#)
            .await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(out.recv().await.unwrap()["error"]["message"], "not joined");
    }

    #[tokio::test]
    async fn test_unknown_method_and_parse_error() {
        let h = harness(9);
        let (mut handler, mut out) = connection(&h);

        handler.handle_text(r#"{"id":1,"method":"dance"}"#).await;
        assert_eq!(out.recv().await.unwrap()["error"]["code"], -32601);

        handler.handle_text("not json").await;
        let reply = out.recv().await.unwrap();
        assert_eq!(reply["error"]["code"], -32700);
        assert_eq!(reply["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_offer_and_trickle_after_join() {
        let h = harness(9);
        let (mut handler, mut out) = connection(&h);
        handler.handle_text(&join_frame(&h.signer, "c1", "p1", OFFER)).await;
        out.recv().await.unwrap();

        handler
            .handle_text(r#"{"id":2,"method":"offer","params":{"desc":{"type":"offer","sdp":"v=0\r\n"}}}"#)
            .await;
        assert_eq!(out.recv().await.unwrap()["result"]["type"], "answer");
        assert_eq!(handler.state(), ConnectionState::Established);

        handler
            .handle_text(r#"{"id":3,"method":"trickle","params":{"target":0,"candidate":{"candidate":"candidate:1"}}}"#)
            .await;
        assert_eq!(out.recv().await.unwrap()["result"], Value::Null);

        // Notification form gets no reply
        handler
            .handle_text(r#"{"method":"trickle","params":{"target":1,"candidate":{"candidate":"candidate:2"}}}"#)
            .await;
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_offer_closes() {
        let h = harness(9);
        let (mut handler, _out) = connection(&h);
        handler.handle_text(&join_frame(&h.signer, "c1", "p1", OFFER)).await;

        let flow = handler
            .handle_text(r#"{"id":2,"method":"offer","params":{"desc":"garbage"}}"#)
            .await;
        assert_eq!(flow, Flow::Close);
    }

    #[tokio::test]
    async fn test_engine_pushes_are_forwarded() {
        let h = harness(9);
        let (mut p1, mut out1) = connection(&h);
        p1.handle_text(&join_frame(&h.signer, "c1", "p1", OFFER)).await;
        out1.recv().await.unwrap();
        pump(&mut p1).await;
        // Host candidate from the first answer
        assert_eq!(out1.recv().await.unwrap()["method"], "trickle");

        let (mut p2, _out2) = connection(&h);
        p2.handle_text(&join_frame(&h.signer, "c1", "p2", "v=0\r\na=msid:s2 t1\r\n"))
            .await;

        pump(&mut p1).await;
        let push = out1.recv().await.unwrap();
        assert_eq!(push["method"], "offer");
        assert_eq!(push["params"]["type"], "offer");
        assert_eq!(p1.state(), ConnectionState::Negotiating);

        p1.handle_text(r#"{"method":"answer","params":{"desc":{"type":"answer","sdp":"v=0"}}}"#)
            .await;
        assert_eq!(p1.state(), ConnectionState::Established);
    }

    #[tokio::test]
    async fn test_host_end_closes_everyone() {
        let h = harness(9);
        let (mut host, _o1) = connection(&h);
        let (mut guest, _o2) = connection(&h);
        host.handle_text(&join_frame(&h.signer, "c1", "p1", "v=0\r\na=msid:s1 t\r\n"))
            .await;
        pump(&mut host).await;
        guest
            .handle_text(&join_frame(&h.signer, "c1", "p2", "v=0\r\na=msid:s2 t\r\n"))
            .await;
        pump(&mut guest).await;

        host.handle_text(r#"{"method":"end"}"#).await;

        assert_eq!(pump(&mut host).await, Flow::Close);
        assert_eq!(pump(&mut guest).await, Flow::Close);

        let conference = h.signal.lifecycle.registry().lookup("c1").unwrap();
        assert!(conference.is_ended());
        let events = h.notifier.wait_for(5, Duration::from_secs(5)).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, BillingEvent::ConferenceRemoved { .. })));
    }

    #[tokio::test]
    async fn test_guest_end_leaves_alone() {
        let h = harness(9);
        let (mut host, _o1) = connection(&h);
        let (mut guest, _o2) = connection(&h);
        host.handle_text(&join_frame(&h.signer, "c1", "p1", "v=0\r\na=msid:s1 t\r\n"))
            .await;
        pump(&mut host).await;
        guest
            .handle_text(&join_frame(&h.signer, "c1", "p2", "v=0\r\na=msid:s2 t\r\n"))
            .await;
        pump(&mut guest).await;

        guest.handle_text(r#"{"method":"end"}"#).await;

        assert_eq!(pump(&mut guest).await, Flow::Close);
        let conference = h.signal.lifecycle.registry().lookup("c1").unwrap();
        assert!(!conference.is_ended());
        assert!(conference.is_online("p1"));
        assert!(!conference.is_online("p2"));
    }

    #[tokio::test]
    async fn test_shutdown_records_departure() {
        let h = harness(9);
        let (mut handler, _out) = connection(&h);
        handler
            .handle_text(&join_frame(&h.signer, "c1", "p1", "v=0\r\na=msid:s1 t\r\n"))
            .await;
        pump(&mut handler).await;

        handler.shutdown().await;

        assert_eq!(handler.state(), ConnectionState::Closed);
        let conference = h.signal.lifecycle.registry().lookup("c1").unwrap();
        assert!(conference.ended.contains_key("s1"));
        assert!(conference.is_ended());
    }
}
