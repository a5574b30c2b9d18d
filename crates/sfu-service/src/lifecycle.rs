//! Conference lifecycle transitions driven by media events.
//!
//! Two events move participants through the registry:
//!
//! - A peer's first published track puts the participant online, creating the
//!   conference (and its watchdog) if needed.
//! - A peer's transport closing moves the participant to ended; when the media
//!   session has no peers left, the conference ends.
//!
//! Each transition updates the registry, then hands a [`BillingEvent`] to a
//! spawned task. Billing outcomes are logged and never fed back.

use crate::media::MediaSession;
use crate::notifier::{BillingEvent, BillingNotifier};
use crate::observability::metrics;
use crate::registry::{ConferenceRegistry, ConferenceSession, ParticipantState};
use crate::watchdog::{spawn_watchdog, WatchdogConfig};
use chrono::Utc;
use common::types::ConferenceUser;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a connection knows about its participant once joined.
#[derive(Clone)]
pub struct PeerContext {
    /// Verified credential payload.
    pub user: ConferenceUser,
    pub session: Arc<dyn MediaSession>,
}

pub struct ConferenceLifecycle {
    registry: Arc<ConferenceRegistry>,
    notifier: Arc<dyn BillingNotifier>,
    watchdog: WatchdogConfig,
    shutdown: CancellationToken,
}

impl ConferenceLifecycle {
    /// Watchdogs are cancelled when `shutdown` is.
    pub fn new(
        registry: Arc<ConferenceRegistry>,
        notifier: Arc<dyn BillingNotifier>,
        watchdog: WatchdogConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            notifier,
            watchdog,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<ConferenceRegistry> {
        &self.registry
    }

    /// First publication of `stream_id` by the peer.
    pub fn on_track_published(&self, ctx: &PeerContext, stream_id: &str) {
        let user = &ctx.user;
        let (conference, created) = self.registry.create_if_absent(&user.sid, || {
            let mut session = ConferenceSession::new(
                user.sid.clone(),
                user.uid.clone(),
                user.callback_url.clone(),
                user.call_id.clone(),
                user.account_id.clone(),
                Arc::clone(&ctx.session),
            );
            session.watchdog = self.shutdown.child_token();
            session
        });

        if created {
            info!(
                target: "sfu.registry",
                conference_id = %conference.id,
                host = %conference.host,
                "Conference created"
            );
            spawn_watchdog(
                Arc::clone(&self.registry),
                conference.id.clone(),
                Arc::clone(&conference.media),
                self.watchdog,
                conference.watchdog.clone(),
            );
            metrics::set_active_conferences(self.registry.active_count());
        }

        if conference.is_online(&user.uid) {
            debug!(
                target: "sfu.registry",
                conference_id = %conference.id,
                participant_id = %user.uid,
                stream_id = %stream_id,
                "Participant already online, ignoring additional stream"
            );
            return;
        }

        let now = Utc::now();
        conference.online.insert(
            user.uid.clone(),
            ParticipantState {
                uid: user.uid.clone(),
                stream_id: stream_id.to_string(),
                added_at: now,
                removed_at: None,
            },
        );

        let should_create = self.registry.mark_started(&conference.id, now);
        let event = BillingEvent::ParticipantAdded {
            callback_url: conference.callback_url.clone(),
            conference_id: conference.id.clone(),
            participant_id: user.uid.clone(),
            stream_id: stream_id.to_string(),
            duration_minutes: conference.duration_minutes(),
            should_create,
            call_id: conference.call_id.clone(),
            account_id: conference.account_id.clone(),
        };

        info!(
            target: "sfu.registry",
            conference_id = %user.sid,
            participant_id = %user.uid,
            stream_id = %stream_id,
            should_create,
            "Participant online"
        );
        self.dispatch(event);
    }

    /// The peer's transport closed.
    pub fn on_transport_closed(&self, ctx: &PeerContext) {
        let user = &ctx.user;
        let Some(conference) = self.registry.lookup(&user.sid) else {
            debug!(
                target: "sfu.registry",
                conference_id = %user.sid,
                participant_id = %user.uid,
                "Transport closed before any publication"
            );
            return;
        };

        if let Some((_, mut participant)) = conference.online.remove(&user.uid) {
            participant.removed_at = Some(Utc::now());
            conference.record_departure(participant);
            info!(
                target: "sfu.registry",
                conference_id = %conference.id,
                participant_id = %user.uid,
                "Participant ended"
            );
        }

        self.dispatch(BillingEvent::ParticipantRemoved {
            callback_url: conference.callback_url.clone(),
            conference_id: conference.id.clone(),
            participant_id: user.uid.clone(),
            duration_minutes: conference.duration_minutes(),
        });

        if ctx.session.peer_count() > 0 {
            return;
        }
        let Some(conference) = self.registry.mark_ended(&conference.id, Utc::now()) else {
            return;
        };

        conference.watchdog.cancel();
        let duration_minutes = conference.duration_minutes();
        let event = BillingEvent::ConferenceRemoved {
            callback_url: conference.callback_url.clone(),
            conference_id: conference.id.clone(),
            duration_minutes,
            call_id: conference.call_id.clone(),
            account_id: conference.account_id.clone(),
        };
        metrics::set_active_conferences(self.registry.active_count());

        info!(
            target: "sfu.registry",
            conference_id = %user.sid,
            duration_minutes,
            "Conference ended"
        );
        self.dispatch(event);
    }

    fn dispatch(&self, event: BillingEvent) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let start = Instant::now();
            let result = notifier.notify(&event).await;
            let status = if result.is_ok() { "success" } else { "error" };
            metrics::record_notification(event.kind(), status, start.elapsed());
            if let Err(e) = result {
                warn!(
                    target: "sfu.notifier",
                    kind = event.kind(),
                    conference_id = %event.conference_id(),
                    error = %e,
                    "Billing notification failed"
                );
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::{JoinConfig, LoopbackEngine, MediaEngine, MediaPeer};
    use crate::notifier::mock::RecordingNotifier;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        engine: LoopbackEngine,
        lifecycle: ConferenceLifecycle,
        notifier: Arc<RecordingNotifier>,
        shutdown: CancellationToken,
    }

    fn fixture() -> Fixture {
        let notifier = Arc::new(RecordingNotifier::new());
        let shutdown = CancellationToken::new();
        let lifecycle = ConferenceLifecycle::new(
            Arc::new(ConferenceRegistry::new()),
            notifier.clone(),
            WatchdogConfig {
                poll_interval: Duration::from_secs(10),
                max_lifetime: Duration::from_secs(1800),
            },
            shutdown.clone(),
        );
        Fixture {
            engine: LoopbackEngine::new(),
            lifecycle,
            notifier,
            shutdown,
        }
    }

    fn user(uid: &str) -> ConferenceUser {
        ConferenceUser {
            sid: "c1".to_string(),
            uid: uid.to_string(),
            call_id: "call-1".to_string(),
            callback_url: "http://cb".to_string(),
            account_id: "client.near".to_string(),
        }
    }

    async fn attach(fx: &Fixture, uid: &str) -> (Arc<dyn MediaPeer>, PeerContext) {
        let (peer, _rx) = fx
            .engine
            .join("c1", uid, &JoinConfig::default())
            .await
            .unwrap();
        let ctx = PeerContext {
            user: user(uid),
            session: peer.session(),
        };
        (peer, ctx)
    }

    #[tokio::test]
    async fn test_first_publication_creates_conference() {
        let fx = fixture();
        let (_peer, ctx) = attach(&fx, "p1").await;

        fx.lifecycle.on_track_published(&ctx, "s1");

        let conference = fx.lifecycle.registry().lookup("c1").unwrap();
        assert_eq!(conference.host, "p1");
        assert!(conference.started_at.is_some());
        assert!(conference.is_online("p1"));

        let events = fx.notifier.wait_for(1, WAIT).await;
        assert!(matches!(
            events.first(),
            Some(BillingEvent::ParticipantAdded { should_create: true, duration_minutes: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_second_participant_does_not_create() {
        let fx = fixture();
        let (_p1, ctx1) = attach(&fx, "p1").await;
        let (_p2, ctx2) = attach(&fx, "p2").await;

        fx.lifecycle.on_track_published(&ctx1, "s1");
        fx.lifecycle.on_track_published(&ctx2, "s2");

        let conference = fx.lifecycle.registry().lookup("c1").unwrap();
        assert_eq!(conference.host, "p1");
        assert_eq!(conference.online.len(), 2);

        let events = fx.notifier.wait_for(2, WAIT).await;
        let creates = events
            .iter()
            .filter(|e| matches!(e, BillingEvent::ParticipantAdded { should_create: true, .. }))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_repeat_publication_is_ignored() {
        let fx = fixture();
        let (_peer, ctx) = attach(&fx, "p1").await;

        fx.lifecycle.on_track_published(&ctx, "s1");
        fx.lifecycle.on_track_published(&ctx, "s1-screen");

        let conference = fx.lifecycle.registry().lookup("c1").unwrap();
        assert_eq!(conference.online.get("p1").unwrap().stream_id, "s1");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.notifier.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_close_with_peers_remaining_keeps_conference() {
        let fx = fixture();
        let (p1, ctx1) = attach(&fx, "p1").await;
        let (_p2, ctx2) = attach(&fx, "p2").await;
        fx.lifecycle.on_track_published(&ctx1, "s1");
        fx.lifecycle.on_track_published(&ctx2, "s2");

        p1.close().await;
        fx.lifecycle.on_transport_closed(&ctx1);

        let conference = fx.lifecycle.registry().lookup("c1").unwrap();
        assert!(!conference.is_online("p1"));
        assert!(conference.ended.get("s1").unwrap().removed_at.is_some());
        assert!(!conference.is_ended());

        let events = fx.notifier.wait_for(3, WAIT).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, BillingEvent::ParticipantRemoved { participant_id, .. } if participant_id == "p1")));
        assert!(!events
            .iter()
            .any(|e| matches!(e, BillingEvent::ConferenceRemoved { .. })));
    }

    #[tokio::test]
    async fn test_rejoin_under_same_stream_keeps_earlier_stay() {
        let fx = fixture();
        let (p1, ctx1) = attach(&fx, "p1").await;
        let (_p2, ctx2) = attach(&fx, "p2").await;
        fx.lifecycle.on_track_published(&ctx1, "cam");
        fx.lifecycle.on_track_published(&ctx2, "mic");

        let conference = fx.lifecycle.registry().lookup("c1").unwrap();
        conference.online.get_mut("p1").unwrap().added_at -= chrono::Duration::seconds(150);

        p1.close().await;
        fx.lifecycle.on_transport_closed(&ctx1);
        let before = fx.lifecycle.registry().lookup("c1").unwrap().duration_minutes();
        assert_eq!(before, 3);

        // Same uid and stream come back and leave at once
        let (p1, ctx1) = attach(&fx, "p1").await;
        fx.lifecycle.on_track_published(&ctx1, "cam");
        p1.close().await;
        fx.lifecycle.on_transport_closed(&ctx1);

        let conference = fx.lifecycle.registry().lookup("c1").unwrap();
        assert!(!conference.is_ended());
        assert_eq!(conference.ended.len(), 2);
        assert!(conference.ended.contains_key("cam"));
        assert!(conference.ended.contains_key("cam#2"));
        assert!(conference.duration_minutes() >= before);
    }

    #[tokio::test]
    async fn test_last_close_ends_conference_once() {
        let fx = fixture();
        let (p1, ctx) = attach(&fx, "p1").await;
        fx.lifecycle.on_track_published(&ctx, "s1");

        p1.close().await;
        fx.lifecycle.on_transport_closed(&ctx);
        let conference = fx.lifecycle.registry().lookup("c1").unwrap();
        let ended_at = conference.ended_at.unwrap();
        assert!(conference.watchdog.is_cancelled());

        // A duplicate close leaves the end time and notifications alone
        fx.lifecycle.on_transport_closed(&ctx);
        assert_eq!(
            fx.lifecycle.registry().lookup("c1").unwrap().ended_at,
            Some(ended_at)
        );

        let events = fx.notifier.wait_for(4, WAIT).await;
        let removed_conferences = events
            .iter()
            .filter(|e| matches!(e, BillingEvent::ConferenceRemoved { .. }))
            .count();
        assert_eq!(removed_conferences, 1);
    }

    #[tokio::test]
    async fn test_close_without_conference_is_noop() {
        let fx = fixture();
        let (p1, ctx) = attach(&fx, "p1").await;

        p1.close().await;
        fx.lifecycle.on_transport_closed(&ctx);

        assert!(fx.lifecycle.registry().is_empty());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fx.notifier.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_watchdogs() {
        let fx = fixture();
        let (_peer, ctx) = attach(&fx, "p1").await;
        fx.lifecycle.on_track_published(&ctx, "s1");

        fx.shutdown.cancel();

        let conference = fx.lifecycle.registry().lookup("c1").unwrap();
        assert!(conference.watchdog.is_cancelled());
    }
}
