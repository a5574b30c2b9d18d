//! Client-facing conference handlers.
//!
//! - `POST /api/participant/create/{name}` - Open a conference
//! - `POST /api/participant/join/{sid}/{name}` - Join an open conference
//! - `GET /api/participants?sid=` - List a conference's participants
//!
//! Create and join both answer with a [`ConferenceView`]: the serialized
//! credential in `sid`, its base64 signature in `uid`, and the media node in
//! `url`.

use crate::errors::BillingError;
use crate::models::{ParticipantRow, ParticipantsQuery};
use crate::routes::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use common::types::ConferenceView;
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /api/participant/create/{name}
///
/// # Response
///
/// - 200 OK: credential for the new conference's first participant
/// - 503 Service Unavailable: no media node could be selected
#[instrument(skip_all, name = "billing.handlers.create_conference")]
pub async fn create_conference(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ConferenceView>, BillingError> {
    state.conferences.create(&name).await.map(Json)
}

/// Handler for POST /api/participant/join/{sid}/{name}
///
/// # Response
///
/// - 200 OK: credential for the new participant
/// - 404 Not Found: unknown conference
/// - 400 Bad Request (`ended`): the conference has ended
#[instrument(skip_all, name = "billing.handlers.join_conference", fields(sid = %sid))]
pub async fn join_conference(
    State(state): State<Arc<AppState>>,
    Path((sid, name)): Path<(String, String)>,
) -> Result<Json<ConferenceView>, BillingError> {
    state.conferences.join(&sid, &name).await.map(Json)
}

/// Handler for GET /api/participants?sid=
#[instrument(skip_all, name = "billing.handlers.list_participants", fields(sid = %query.sid))]
pub async fn list_participants(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ParticipantsQuery>,
) -> Result<Json<Vec<ParticipantRow>>, BillingError> {
    state.conferences.participants(&query.sid).await.map(Json)
}
