//! Billing notifier.
//!
//! Delivers conference lifecycle events to the billing authority over HTTP
//! and forwards its signed confirmations to the billing contract:
//!
//! | Event | Request | Chain call |
//! |-------|---------|------------|
//! | participant added | `PUT {cb}/api/participant/add/{sid}/{uid}/{stream}/{duration}` | `create_call` when the participant opened the conference |
//! | participant removed | `PUT {cb}/api/participant/remove/{sid}/{uid}/{duration}` | none |
//! | conference removed | `PUT {cb}/api/conference/remove/{sid}/{duration}` | `end_call` |
//!
//! Delivery is best effort: one attempt, no retry. Callers spawn
//! [`BillingNotifier::notify`] and only log its result, so no failure here
//! ever reaches a signaling peer or rolls back registry state.

use crate::observability::metrics;
use async_trait::async_trait;
use common::chain::{contract_signature, ChainClient, ChainError, CreateCall, EndCall};
use common::types::SignatureView;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Lifecycle event delivered to the billing authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    ParticipantAdded {
        callback_url: String,
        conference_id: String,
        participant_id: String,
        stream_id: String,
        duration_minutes: u64,
        /// Set for the participant whose publication opened the conference.
        should_create: bool,
        call_id: String,
        account_id: String,
    },
    ParticipantRemoved {
        callback_url: String,
        conference_id: String,
        participant_id: String,
        duration_minutes: u64,
    },
    ConferenceRemoved {
        callback_url: String,
        conference_id: String,
        duration_minutes: u64,
        call_id: String,
        account_id: String,
    },
}

impl BillingEvent {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingEvent::ParticipantAdded { .. } => "participant_added",
            BillingEvent::ParticipantRemoved { .. } => "participant_removed",
            BillingEvent::ConferenceRemoved { .. } => "conference_removed",
        }
    }

    pub fn conference_id(&self) -> &str {
        match self {
            BillingEvent::ParticipantAdded { conference_id, .. }
            | BillingEvent::ParticipantRemoved { conference_id, .. }
            | BillingEvent::ConferenceRemoved { conference_id, .. } => conference_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("callback request failed: {0}")]
    Callback(String),

    #[error("callback returned status {0}")]
    Status(u16),

    #[error("callback returned an unusable confirmation: {0}")]
    InvalidConfirmation(String),

    #[error("chain call failed: {0}")]
    Chain(#[from] ChainError),
}

/// Sink for billing events.
#[async_trait]
pub trait BillingNotifier: Send + Sync {
    async fn notify(&self, event: &BillingEvent) -> Result<(), NotifyError>;
}

/// Notifier that calls the billing authority and the billing contract.
pub struct HttpBillingNotifier {
    client: reqwest::Client,
    chain: Arc<dyn ChainClient>,
}

impl HttpBillingNotifier {
    /// Create a notifier whose callbacks time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Callback` if the HTTP client cannot be built.
    pub fn new(chain: Arc<dyn ChainClient>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Callback(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, chain })
    }

    async fn put(&self, url: Url) -> Result<String, NotifyError> {
        info!(target: "sfu.notifier", url = %url, "Sending billing callback");

        let response = self
            .client
            .put(url)
            .send()
            .await
            .map_err(|e| NotifyError::Callback(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NotifyError::Callback(e.to_string()))?;

        if !status.is_success() {
            warn!(target: "sfu.notifier", status = status.as_u16(), body = %body, "Billing callback rejected");
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(body)
    }

    async fn confirmation(&self, url: Url) -> Result<SignatureView, NotifyError> {
        let body = self.put(url).await?;
        serde_json::from_str(&body).map_err(|e| NotifyError::InvalidConfirmation(e.to_string()))
    }
}

/// Append path segments to the callback base URL, percent-encoding each.
fn callback_url(base: &str, segments: &[&str]) -> Result<Url, NotifyError> {
    let mut url = Url::parse(base)
        .map_err(|e| NotifyError::Callback(format!("invalid callback url '{base}': {e}")))?;
    url.path_segments_mut()
        .map_err(|()| NotifyError::Callback(format!("callback url '{base}' cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn record_chain(method: &str, result: &Result<(), ChainError>) {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::record_chain_call(method, status);
}

#[async_trait]
impl BillingNotifier for HttpBillingNotifier {
    #[instrument(skip_all, name = "sfu.notifier.notify", fields(kind = event.kind(), conference_id = %event.conference_id()))]
    async fn notify(&self, event: &BillingEvent) -> Result<(), NotifyError> {
        match event {
            BillingEvent::ParticipantAdded {
                callback_url: base,
                conference_id,
                participant_id,
                stream_id,
                duration_minutes,
                should_create,
                call_id,
                account_id,
            } => {
                let duration = duration_minutes.to_string();
                let url = callback_url(
                    base,
                    &["api", "participant", "add", conference_id, participant_id, stream_id, &duration],
                )?;
                let confirmation = self.confirmation(url).await?;

                if *should_create {
                    let call = CreateCall {
                        id: call_id.clone(),
                        client_id: account_id.clone(),
                        sign: contract_signature(&confirmation.signature)?,
                        epoch: confirmation.epoch,
                    };
                    let result = self.chain.create_call(&call).await;
                    record_chain("create_call", &result);
                    result?;
                    info!(target: "sfu.notifier", call_id = %call_id, epoch = call.epoch, "create_call submitted");
                }
                Ok(())
            }
            BillingEvent::ParticipantRemoved {
                callback_url: base,
                conference_id,
                participant_id,
                duration_minutes,
            } => {
                let duration = duration_minutes.to_string();
                let url = callback_url(
                    base,
                    &["api", "participant", "remove", conference_id, participant_id, &duration],
                )?;
                let body = self.put(url).await?;
                debug!(target: "sfu.notifier", body = %body, "Participant removal acknowledged");
                Ok(())
            }
            BillingEvent::ConferenceRemoved {
                callback_url: base,
                conference_id,
                duration_minutes,
                call_id,
                account_id,
            } => {
                let duration = duration_minutes.to_string();
                let url = callback_url(base, &["api", "conference", "remove", conference_id, &duration])?;
                let confirmation = self.confirmation(url).await?;

                let call = EndCall {
                    id: call_id.clone(),
                    client_id: account_id.clone(),
                    sign: contract_signature(&confirmation.signature)?,
                    minutes: *duration_minutes,
                    epoch: confirmation.epoch,
                };
                let result = self.chain.end_call(&call).await;
                record_chain("end_call", &result);
                result?;
                info!(target: "sfu.notifier", call_id = %call_id, minutes = call.minutes, "end_call submitted");
                Ok(())
            }
        }
    }
}

/// In-memory notifier for tests.
pub mod mock {
    use super::{BillingEvent, BillingNotifier, NotifyError};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::{Mutex, Notify};

    /// Records every event it receives.
    #[derive(Default)]
    pub struct RecordingNotifier {
        events: Mutex<Vec<BillingEvent>>,
        notify: Notify,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn events(&self) -> Vec<BillingEvent> {
            self.events.lock().await.clone()
        }

        /// Wait until at least `count` events arrived, up to `timeout`.
        /// Returns whatever was recorded by then.
        pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<BillingEvent> {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let events = self.events().await;
                if events.len() >= count {
                    return events;
                }
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return self.events().await;
                }
            }
        }
    }

    #[async_trait]
    impl BillingNotifier for RecordingNotifier {
        async fn notify(&self, event: &BillingEvent) -> Result<(), NotifyError> {
            self.events.lock().await.push(event.clone());
            self.notify.notify_waiters();
            Ok(())
        }
    }
}
