//! Conference registry.
//!
//! Process-wide map from conference id to [`ConferenceSession`]. Readers get
//! a snapshot clone. The participant maps are shared between clones and
//! updated in place; the scalar fields change only through the atomic
//! operations below (creation, start stamp, end stamp) or a whole-record
//! [`ConferenceRegistry::upsert`].
//!
//! Ended conferences are kept so that late joins can be rejected with
//! "ended conference", until [`ConferenceRegistry::purge_ended`] drops them.

use crate::duration::billable_minutes;
use crate::media::MediaSession;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One participant's presence in a conference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantState {
    pub uid: String,
    pub stream_id: String,
    pub added_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}

/// Registry record for one conference.
#[derive(Clone)]
pub struct ConferenceSession {
    pub id: String,
    pub callback_url: String,
    pub call_id: String,
    pub account_id: String,

    /// Participant whose first publication created the conference.
    pub host: String,

    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Online participants keyed by uid.
    pub online: Arc<DashMap<String, ParticipantState>>,

    /// Departed participants keyed by stream id. A second stay under the
    /// same stream id is stored as `{stream_id}#{n}`.
    pub ended: Arc<DashMap<String, ParticipantState>>,

    pub media: Arc<dyn MediaSession>,

    /// Cancels the conference's watchdog.
    pub watchdog: CancellationToken,
}

impl ConferenceSession {
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        callback_url: impl Into<String>,
        call_id: impl Into<String>,
        account_id: impl Into<String>,
        media: Arc<dyn MediaSession>,
    ) -> Self {
        Self {
            id: id.into(),
            callback_url: callback_url.into(),
            call_id: call_id.into(),
            account_id: account_id.into(),
            host: host.into(),
            started_at: None,
            ended_at: None,
            online: Arc::new(DashMap::new()),
            ended: Arc::new(DashMap::new()),
            media,
            watchdog: CancellationToken::new(),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn is_online(&self, uid: &str) -> bool {
        self.online.contains_key(uid)
    }

    /// Move a departed participant into `ended` without replacing an earlier
    /// stay recorded under the same stream id.
    pub fn record_departure(&self, participant: ParticipantState) {
        let mut key = participant.stream_id.clone();
        let mut n = 1u32;
        loop {
            match self.ended.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(participant);
                    return;
                }
                Entry::Occupied(_) => {
                    n += 1;
                    key = format!("{}#{n}", participant.stream_id);
                }
            }
        }
    }

    /// Billable minutes over the participants that have left.
    pub fn duration_minutes(&self) -> u64 {
        let ended: Vec<ParticipantState> =
            self.ended.iter().map(|entry| entry.value().clone()).collect();
        billable_minutes(&ended)
    }
}

impl fmt::Debug for ConferenceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConferenceSession")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("call_id", &self.call_id)
            .field("account_id", &self.account_id)
            .field("started_at", &self.started_at)
            .field("ended_at", &self.ended_at)
            .field("online", &self.online.len())
            .field("ended", &self.ended.len())
            .field("peers", &self.media.peer_count())
            .finish_non_exhaustive()
    }
}

/// Concurrent map of conferences.
#[derive(Default)]
pub struct ConferenceRegistry {
    conferences: DashMap<String, ConferenceSession>,
}

impl ConferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a conference record.
    pub fn lookup(&self, conference_id: &str) -> Option<ConferenceSession> {
        self.conferences
            .get(conference_id)
            .map(|entry| entry.value().clone())
    }

    /// Replace the record stored under its id.
    pub fn upsert(&self, session: ConferenceSession) {
        self.conferences.insert(session.id.clone(), session);
    }

    /// Insert the record built by `make` unless one already exists.
    ///
    /// Returns the stored record and whether it was created by this call.
    /// `make` runs under the map's shard lock, so exactly one concurrent
    /// caller creates a given conference.
    pub fn create_if_absent(
        &self,
        conference_id: &str,
        make: impl FnOnce() -> ConferenceSession,
    ) -> (ConferenceSession, bool) {
        match self.conferences.entry(conference_id.to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let session = make();
                entry.insert(session.clone());
                (session, true)
            }
        }
    }

    /// Stamp `started_at` unless already set. True if this call set it.
    pub fn mark_started(&self, conference_id: &str, at: DateTime<Utc>) -> bool {
        self.conferences
            .get_mut(conference_id)
            .is_some_and(|mut entry| {
                if entry.started_at.is_some() {
                    return false;
                }
                entry.started_at = Some(at);
                true
            })
    }

    /// Stamp `ended_at` unless already set.
    ///
    /// Returns the ended record only to the caller that ended it, so exactly
    /// one of several concurrent closers reports the conference end.
    pub fn mark_ended(&self, conference_id: &str, at: DateTime<Utc>) -> Option<ConferenceSession> {
        let mut entry = self.conferences.get_mut(conference_id)?;
        if entry.ended_at.is_some() {
            return None;
        }
        entry.ended_at = Some(at);
        Some(entry.value().clone())
    }

    /// Conferences that have not ended.
    pub fn active_count(&self) -> usize {
        self.conferences
            .iter()
            .filter(|entry| !entry.value().is_ended())
            .count()
    }

    pub fn len(&self) -> usize {
        self.conferences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conferences.is_empty()
    }

    /// Drop conferences that ended before `cutoff`. Returns how many.
    pub fn purge_ended(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.conferences.len();
        self.conferences
            .retain(|_, session| session.ended_at.map_or(true, |ended| ended >= cutoff));
        before.saturating_sub(self.conferences.len())
    }
}
