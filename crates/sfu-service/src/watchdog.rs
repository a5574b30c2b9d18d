//! Idle watchdog.
//!
//! One task per conference, spawned when the conference is created. It wakes
//! on a fixed interval and stops once the conference has ended, its entry is
//! gone, or its cancellation token fires. Once the conference has been alive
//! for the configured ceiling it closes every attached peer; the resulting
//! transport-closed events drive the normal removal notifications. It keeps
//! closing on each tick until the conference is marked ended, so peers that
//! slip in after a forced close are closed too.
//!
//! Elapsed time is measured on the tokio monotonic clock, not wall time.

use crate::media::MediaSession;
use crate::observability::metrics;
use crate::registry::ConferenceRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub poll_interval: Duration,
    pub max_lifetime: Duration,
}

/// Spawn the watchdog for `conference_id`, counting from now.
pub fn spawn_watchdog(
    registry: Arc<ConferenceRegistry>,
    conference_id: String,
    media: Arc<dyn MediaSession>,
    config: WatchdogConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let started = Instant::now();
    tokio::spawn(async move {
        run(registry, &conference_id, media, config, cancel, started).await;
    })
}

async fn run(
    registry: Arc<ConferenceRegistry>,
    conference_id: &str,
    media: Arc<dyn MediaSession>,
    config: WatchdogConfig,
    cancel: CancellationToken,
    started: Instant,
) {
    let deadline = started + config.max_lifetime;
    let mut ticker = interval_at(started + config.poll_interval, config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(
        target: "sfu.watchdog",
        conference_id = %conference_id,
        max_lifetime_secs = config.max_lifetime.as_secs(),
        "Watchdog started"
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(target: "sfu.watchdog", conference_id = %conference_id, "Watchdog cancelled");
                return;
            }
            _ = ticker.tick() => {
                match registry.lookup(conference_id) {
                    Some(conference) if !conference.is_ended() => {}
                    _ => {
                        debug!(target: "sfu.watchdog", conference_id = %conference_id, "Conference ended, watchdog stopping");
                        return;
                    }
                }

                if Instant::now() >= deadline {
                    warn!(
                        target: "sfu.watchdog",
                        conference_id = %conference_id,
                        peers = media.peer_count(),
                        "Conference exceeded lifetime ceiling, closing all peers"
                    );
                    metrics::record_watchdog_forced_close();
                    media.close_all().await;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::{JoinConfig, LoopbackEngine, MediaEngine, MediaPeer, PeerEvent};
    use crate::registry::ConferenceSession;
    use chrono::Utc;
    use tokio::sync::mpsc;

    const CONFIG: WatchdogConfig = WatchdogConfig {
        poll_interval: Duration::from_secs(10),
        max_lifetime: Duration::from_secs(60),
    };

    struct Fixture {
        registry: Arc<ConferenceRegistry>,
        peer: Arc<dyn MediaPeer>,
        events: mpsc::UnboundedReceiver<PeerEvent>,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    }

    async fn start() -> Fixture {
        let engine = LoopbackEngine::new();
        let (peer, events) = engine.join("c1", "u1", &JoinConfig::default()).await.unwrap();
        let registry = Arc::new(ConferenceRegistry::new());
        let session = ConferenceSession::new("c1", "u1", "http://cb", "k1", "a.near", peer.session());
        let cancel = session.watchdog.clone();
        registry.upsert(session);

        let handle = spawn_watchdog(
            Arc::clone(&registry),
            "c1".to_string(),
            peer.session(),
            CONFIG,
            cancel.clone(),
        );

        Fixture {
            registry,
            peer,
            events,
            cancel,
            handle,
        }
    }

    // Let the spawned task observe the advanced clock
    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_does_not_fire_before_ceiling() {
        let mut fx = start().await;

        tokio::time::advance(Duration::from_secs(59)).await;
        settle().await;

        assert_eq!(fx.peer.session().peer_count(), 1);
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closes_all_peers_at_ceiling() {
        let mut fx = start().await;

        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;

        assert_eq!(fx.peer.session().peer_count(), 0);
        assert_eq!(fx.events.try_recv().unwrap(), PeerEvent::TransportClosed);
        assert!(!fx.handle.is_finished(), "runs until the conference is marked ended");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_conference_ends() {
        let fx = start().await;

        let mut conference = fx.registry.lookup("c1").unwrap();
        conference.ended_at = Some(Utc::now());
        fx.registry.upsert(conference);

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;

        assert!(fx.handle.is_finished());
        assert_eq!(fx.peer.session().peer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_cancel() {
        let fx = start().await;

        fx.cancel.cancel();
        fx.handle.await.unwrap();

        assert_eq!(fx.peer.session().peer_count(), 1);
    }
}
