//! Billing ledger storage.
//!
//! [`Ledger`] is the seam between the conference service and storage.
//! [`PgLedger`] is the production implementation; [`mock::MockLedger`]
//! keeps rows in memory for handler and service tests.
//!
//! Timestamps that record a first occurrence (`added_at`, `removed_at`,
//! `ended_at`) are stamped once. Repeated callbacks leave them unchanged.

mod ledger;
pub mod mock;

pub use ledger::PgLedger;

use crate::errors::BillingError;
use crate::models::{ConferenceRow, ParticipantRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Verify the store is reachable.
    async fn ping(&self) -> Result<(), BillingError>;

    async fn create_conference(
        &self,
        sid: &str,
        url: &str,
        call_id: &str,
    ) -> Result<ConferenceRow, BillingError>;

    async fn find_conference(&self, sid: &str) -> Result<Option<ConferenceRow>, BillingError>;

    async fn create_participant(
        &self,
        sid: &str,
        uid: &str,
        name: &str,
        url: &str,
    ) -> Result<ParticipantRow, BillingError>;

    async fn find_participant(
        &self,
        sid: &str,
        uid: &str,
    ) -> Result<Option<ParticipantRow>, BillingError>;

    /// Record the participant's stream and stamp `added_at` if unset.
    async fn mark_participant_added(
        &self,
        sid: &str,
        uid: &str,
        stream_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), BillingError>;

    /// Stamp `removed_at` if unset.
    async fn mark_participant_removed(
        &self,
        sid: &str,
        uid: &str,
        at: DateTime<Utc>,
    ) -> Result<(), BillingError>;

    /// Stamp `ended_at` and `duration` if the conference has not ended.
    async fn end_conference(
        &self,
        sid: &str,
        duration: i64,
        at: DateTime<Utc>,
    ) -> Result<(), BillingError>;

    /// Participants of `sid`, oldest first.
    async fn list_participants(&self, sid: &str) -> Result<Vec<ParticipantRow>, BillingError>;
}
