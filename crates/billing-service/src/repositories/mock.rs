//! In-memory ledger for tests.

use super::Ledger;
use crate::errors::BillingError;
use crate::models::{ConferenceRow, ParticipantRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Mock ledger.
///
/// Follows the same first-occurrence stamping as the database. Reads and
/// writes can be made to fail independently.
#[derive(Default)]
pub struct MockLedger {
    conferences: Mutex<Vec<ConferenceRow>>,
    participants: Mutex<Vec<ParticipantRow>>,
    failing_reads: AtomicBool,
    failing_writes: AtomicBool,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read return a database error.
    pub fn set_failing_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    /// Make every update return a database error.
    pub fn set_failing_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    pub fn conference(&self, sid: &str) -> Option<ConferenceRow> {
        lock(&self.conferences)
            .ok()?
            .iter()
            .find(|c| c.sid == sid)
            .cloned()
    }

    pub fn participant(&self, sid: &str, uid: &str) -> Option<ParticipantRow> {
        lock(&self.participants)
            .ok()?
            .iter()
            .find(|p| p.sid == sid && p.uid == uid)
            .cloned()
    }

    fn check_reads(&self) -> Result<(), BillingError> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(BillingError::Database("mock read failure".to_string()));
        }
        Ok(())
    }

    fn check_writes(&self) -> Result<(), BillingError> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(BillingError::Database("mock write failure".to_string()));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>, BillingError> {
    mutex
        .lock()
        .map_err(|_| BillingError::Database("mock ledger poisoned".to_string()))
}

#[async_trait]
impl Ledger for MockLedger {
    async fn ping(&self) -> Result<(), BillingError> {
        self.check_reads()
    }

    async fn create_conference(
        &self,
        sid: &str,
        url: &str,
        call_id: &str,
    ) -> Result<ConferenceRow, BillingError> {
        self.check_writes()?;
        let mut conferences = lock(&self.conferences)?;
        if conferences.iter().any(|c| c.sid == sid) {
            return Err(BillingError::Database(format!("duplicate conference {sid}")));
        }
        let row = ConferenceRow {
            sid: sid.to_string(),
            url: url.to_string(),
            call_id: call_id.to_string(),
            duration: None,
            ended_at: None,
            created_at: Utc::now(),
        };
        conferences.push(row.clone());
        Ok(row)
    }

    async fn find_conference(&self, sid: &str) -> Result<Option<ConferenceRow>, BillingError> {
        self.check_reads()?;
        Ok(lock(&self.conferences)?
            .iter()
            .find(|c| c.sid == sid)
            .cloned())
    }

    async fn create_participant(
        &self,
        sid: &str,
        uid: &str,
        name: &str,
        url: &str,
    ) -> Result<ParticipantRow, BillingError> {
        self.check_writes()?;
        let mut participants = lock(&self.participants)?;
        if participants.iter().any(|p| p.sid == sid && p.uid == uid) {
            return Err(BillingError::Database(format!(
                "duplicate participant {sid}/{uid}"
            )));
        }
        let row = ParticipantRow {
            name: name.to_string(),
            uid: uid.to_string(),
            sid: sid.to_string(),
            stream_id: None,
            url: url.to_string(),
            added_at: None,
            removed_at: None,
            created_at: Utc::now(),
        };
        participants.push(row.clone());
        Ok(row)
    }

    async fn find_participant(
        &self,
        sid: &str,
        uid: &str,
    ) -> Result<Option<ParticipantRow>, BillingError> {
        self.check_reads()?;
        Ok(lock(&self.participants)?
            .iter()
            .find(|p| p.sid == sid && p.uid == uid)
            .cloned())
    }

    async fn mark_participant_added(
        &self,
        sid: &str,
        uid: &str,
        stream_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        self.check_writes()?;
        let mut participants = lock(&self.participants)?;
        if let Some(p) = participants
            .iter_mut()
            .find(|p| p.sid == sid && p.uid == uid)
        {
            p.stream_id = Some(stream_id.to_string());
            p.added_at.get_or_insert(at);
        }
        Ok(())
    }

    async fn mark_participant_removed(
        &self,
        sid: &str,
        uid: &str,
        at: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        self.check_writes()?;
        let mut participants = lock(&self.participants)?;
        if let Some(p) = participants
            .iter_mut()
            .find(|p| p.sid == sid && p.uid == uid)
        {
            p.removed_at.get_or_insert(at);
        }
        Ok(())
    }

    async fn end_conference(
        &self,
        sid: &str,
        duration: i64,
        at: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        self.check_writes()?;
        let mut conferences = lock(&self.conferences)?;
        if let Some(c) = conferences
            .iter_mut()
            .find(|c| c.sid == sid && c.ended_at.is_none())
        {
            c.ended_at = Some(at);
            c.duration = Some(duration);
        }
        Ok(())
    }

    async fn list_participants(&self, sid: &str) -> Result<Vec<ParticipantRow>, BillingError> {
        self.check_reads()?;
        Ok(lock(&self.participants)?
            .iter()
            .filter(|p| p.sid == sid)
            .cloned()
            .collect())
    }
}
