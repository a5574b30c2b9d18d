//! Conference service.
//!
//! Issues join credentials for new and existing conferences, and answers the
//! SFU's lifecycle callbacks with signed confirmations.
//!
//! Callbacks look up their rows first: an unknown participant or conference
//! is a 404 and nothing is signed. Once the rows are found, the ledger
//! update is best-effort. A failed write is logged and the confirmation is
//! still returned, so billing on the contract never waits on the ledger.

use crate::errors::BillingError;
use crate::models::{ConferenceRow, ParticipantRow};
use crate::observability::metrics;
use crate::repositories::Ledger;
use crate::services::confirmation::ConfirmationSigner;
use crate::services::identifiers::{generate_id, random_index};
use chrono::Utc;
use common::chain::ChainClient;
use common::types::{ConferenceUser, ConferenceView, SignatureView};
use ring::rand::SystemRandom;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct ConferenceService {
    ledger: Arc<dyn Ledger>,
    chain: Arc<dyn ChainClient>,
    confirmations: ConfirmationSigner,
    account_id: String,
    callback_url: String,
    rng: SystemRandom,
}

impl ConferenceService {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        chain: Arc<dyn ChainClient>,
        confirmations: ConfirmationSigner,
        account_id: String,
        callback_url: String,
    ) -> Self {
        Self {
            ledger,
            chain,
            confirmations,
            account_id,
            callback_url,
            rng: SystemRandom::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Open a conference on a random media node and admit its first
    /// participant.
    #[instrument(skip_all, name = "billing.conferences.create")]
    pub async fn create(&self, name: &str) -> Result<ConferenceView, BillingError> {
        let sid = generate_id(&self.rng)?;
        let uid = generate_id(&self.rng)?;
        let call_id = generate_id(&self.rng)?;

        let url = self.pick_node().await?;

        let conference = self.ledger.create_conference(&sid, &url, &call_id).await?;
        self.ledger
            .create_participant(&conference.sid, &uid, name, &url)
            .await?;

        let view = self.credential(&conference, &uid)?;
        metrics::record_credential_issued("create");
        info!(target: "billing.conferences", sid = %conference.sid, uid = %uid, url = %url, "Conference created");
        Ok(view)
    }

    /// Admit a participant to an existing conference.
    #[instrument(skip_all, name = "billing.conferences.join", fields(sid = %sid))]
    pub async fn join(&self, sid: &str, name: &str) -> Result<ConferenceView, BillingError> {
        let conference = self.require_conference(sid).await?;
        if conference.is_ended() {
            return Err(BillingError::Ended);
        }

        let uid = generate_id(&self.rng)?;
        self.ledger
            .create_participant(&conference.sid, &uid, name, &conference.url)
            .await?;

        let view = self.credential(&conference, &uid)?;
        metrics::record_credential_issued("join");
        info!(target: "billing.conferences", sid = %sid, uid = %uid, "Participant joined");
        Ok(view)
    }

    /// SFU callback: the participant published its first track.
    #[instrument(skip_all, name = "billing.conferences.participant_added", fields(sid = %sid, uid = %uid))]
    pub async fn participant_added(
        &self,
        sid: &str,
        uid: &str,
        stream_id: &str,
        duration: u64,
    ) -> Result<SignatureView, BillingError> {
        self.require_participant(sid, uid).await?;
        let conference = self.require_conference(sid).await?;

        if let Err(e) = self
            .ledger
            .mark_participant_added(sid, uid, stream_id, Utc::now())
            .await
        {
            warn!(target: "billing.conferences", error = %e, "Failed to record participant add");
        }

        Ok(self
            .confirmations
            .confirm("participant_added", &conference.call_id, duration)
            .await)
    }

    /// SFU callback: the participant's transport closed.
    #[instrument(skip_all, name = "billing.conferences.participant_removed", fields(sid = %sid, uid = %uid))]
    pub async fn participant_removed(
        &self,
        sid: &str,
        uid: &str,
        duration: u64,
    ) -> Result<SignatureView, BillingError> {
        self.require_participant(sid, uid).await?;
        let conference = self.require_conference(sid).await?;

        if let Err(e) = self
            .ledger
            .mark_participant_removed(sid, uid, Utc::now())
            .await
        {
            warn!(target: "billing.conferences", error = %e, "Failed to record participant removal");
        }

        Ok(self
            .confirmations
            .confirm("participant_removed", &conference.call_id, duration)
            .await)
    }

    /// SFU callback: the last participant left.
    #[instrument(skip_all, name = "billing.conferences.conference_removed", fields(sid = %sid))]
    pub async fn conference_removed(
        &self,
        sid: &str,
        duration: u64,
    ) -> Result<SignatureView, BillingError> {
        let conference = self.require_conference(sid).await?;

        let minutes = i64::try_from(duration)
            .map_err(|_| BillingError::BadRequest(format!("duration out of range: {duration}")))?;
        if let Err(e) = self.ledger.end_conference(sid, minutes, Utc::now()).await {
            warn!(target: "billing.conferences", error = %e, "Failed to record conference end");
        } else if !conference.is_ended() {
            info!(target: "billing.conferences", sid = %sid, minutes = duration, "Conference ended");
        }

        Ok(self
            .confirmations
            .confirm("conference_removed", &conference.call_id, duration)
            .await)
    }

    #[instrument(skip_all, name = "billing.conferences.participants", fields(sid = %sid))]
    pub async fn participants(&self, sid: &str) -> Result<Vec<ParticipantRow>, BillingError> {
        self.ledger.list_participants(sid).await
    }

    async fn require_conference(&self, sid: &str) -> Result<ConferenceRow, BillingError> {
        self.ledger
            .find_conference(sid)
            .await?
            .ok_or_else(|| BillingError::NotFound("conference".to_string()))
    }

    async fn require_participant(&self, sid: &str, uid: &str) -> Result<ParticipantRow, BillingError> {
        self.ledger
            .find_participant(sid, uid)
            .await?
            .ok_or_else(|| BillingError::NotFound("participant".to_string()))
    }

    /// Random media node from the contract's node list.
    async fn pick_node(&self) -> Result<String, BillingError> {
        let nodes = self.chain.get_nodes().await.map_err(|e| {
            BillingError::ServiceUnavailable(format!("get_nodes failed: {e}"))
        })?;
        if nodes.is_empty() {
            return Err(BillingError::ServiceUnavailable(
                "get_nodes returned no nodes".to_string(),
            ));
        }

        let index = random_index(&self.rng, nodes.len())?;
        nodes
            .into_iter()
            .nth(index)
            .map(|node| node.address)
            .ok_or_else(|| BillingError::Internal("node index out of range".to_string()))
    }

    fn credential(&self, conference: &ConferenceRow, uid: &str) -> Result<ConferenceView, BillingError> {
        let user = ConferenceUser {
            sid: conference.sid.clone(),
            uid: uid.to_string(),
            call_id: conference.call_id.clone(),
            callback_url: self.callback_url.clone(),
            account_id: self.account_id.clone(),
        };
        let (sid, uid) = self.confirmations.sign_credential(&user)?;
        Ok(ConferenceView {
            sid,
            uid,
            url: conference.url.clone(),
        })
    }
}
