//! SFU lifecycle callbacks.
//!
//! - `PUT /api/participant/add/{sid}/{uid}/{streamID}/{duration}`
//! - `PUT /api/participant/remove/{sid}/{uid}/{duration}`
//! - `PUT /api/conference/remove/{sid}/{duration}`
//!
//! Each answers with a [`SignatureView`] over `call_id:duration:epoch`.
//! `duration` is billable minutes so far; a non-numeric value is rejected
//! by the path extractor with 400.

use crate::errors::BillingError;
use crate::routes::AppState;
use axum::extract::{Path, State};
use axum::Json;
use common::types::SignatureView;
use std::sync::Arc;
use tracing::instrument;

#[instrument(skip_all, name = "billing.handlers.add_participant", fields(sid = %sid, uid = %uid))]
pub async fn add_participant(
    State(state): State<Arc<AppState>>,
    Path((sid, uid, stream_id, duration)): Path<(String, String, String, u64)>,
) -> Result<Json<SignatureView>, BillingError> {
    state
        .conferences
        .participant_added(&sid, &uid, &stream_id, duration)
        .await
        .map(Json)
}

#[instrument(skip_all, name = "billing.handlers.remove_participant", fields(sid = %sid, uid = %uid))]
pub async fn remove_participant(
    State(state): State<Arc<AppState>>,
    Path((sid, uid, duration)): Path<(String, String, u64)>,
) -> Result<Json<SignatureView>, BillingError> {
    state
        .conferences
        .participant_removed(&sid, &uid, duration)
        .await
        .map(Json)
}

#[instrument(skip_all, name = "billing.handlers.remove_conference", fields(sid = %sid))]
pub async fn remove_conference(
    State(state): State<Arc<AppState>>,
    Path((sid, duration)): Path<(String, u64)>,
) -> Result<Json<SignatureView>, BillingError> {
    state
        .conferences
        .conference_removed(&sid, duration)
        .await
        .map(Json)
}
