//! PostgreSQL ledger.
//!
//! All queries use parameterized statements. First-occurrence timestamps are
//! stamped with `COALESCE` so concurrent or repeated callbacks cannot move
//! them.

use super::Ledger;
use crate::errors::BillingError;
use crate::models::{ConferenceRow, ParticipantRow};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;

const CONFERENCE_COLUMNS: &str = "sid, url, call_id, duration, ended_at, created_at";

const PARTICIPANT_COLUMNS: &str =
    "name, uid, sid, stream_id, url, added_at, removed_at, created_at";

/// Ledger backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Record the query outcome and convert the error.
fn observe<T>(
    operation: &str,
    start: Instant,
    result: Result<T, sqlx::Error>,
) -> Result<T, BillingError> {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::record_db_query(operation, status, start.elapsed());
    result.map_err(|e| BillingError::Database(e.to_string()))
}

#[async_trait]
impl Ledger for PgLedger {
    #[instrument(skip_all, name = "billing.repo.ping")]
    async fn ping(&self) -> Result<(), BillingError> {
        let start = Instant::now();
        let result = sqlx::query("SELECT 1").execute(&self.pool).await;
        observe("ping", start, result).map(|_| ())
    }

    #[instrument(skip_all, name = "billing.repo.create_conference", fields(sid = %sid))]
    async fn create_conference(
        &self,
        sid: &str,
        url: &str,
        call_id: &str,
    ) -> Result<ConferenceRow, BillingError> {
        let start = Instant::now();
        let result = sqlx::query(&format!(
            "INSERT INTO conferences (sid, url, call_id) VALUES ($1, $2, $3) \
             RETURNING {CONFERENCE_COLUMNS}"
        ))
        .bind(sid)
        .bind(url)
        .bind(call_id)
        .fetch_one(&self.pool)
        .await;

        observe("create_conference", start, result).map(|row| map_row_to_conference(&row))
    }

    #[instrument(skip_all, name = "billing.repo.find_conference", fields(sid = %sid))]
    async fn find_conference(&self, sid: &str) -> Result<Option<ConferenceRow>, BillingError> {
        let start = Instant::now();
        let result = sqlx::query(&format!(
            "SELECT {CONFERENCE_COLUMNS} FROM conferences WHERE sid = $1"
        ))
        .bind(sid)
        .fetch_optional(&self.pool)
        .await;

        observe("find_conference", start, result).map(|row| row.as_ref().map(map_row_to_conference))
    }

    #[instrument(skip_all, name = "billing.repo.create_participant", fields(sid = %sid, uid = %uid))]
    async fn create_participant(
        &self,
        sid: &str,
        uid: &str,
        name: &str,
        url: &str,
    ) -> Result<ParticipantRow, BillingError> {
        let start = Instant::now();
        let result = sqlx::query(&format!(
            "INSERT INTO participants (sid, uid, name, url) VALUES ($1, $2, $3, $4) \
             RETURNING {PARTICIPANT_COLUMNS}"
        ))
        .bind(sid)
        .bind(uid)
        .bind(name)
        .bind(url)
        .fetch_one(&self.pool)
        .await;

        observe("create_participant", start, result).map(|row| map_row_to_participant(&row))
    }

    #[instrument(skip_all, name = "billing.repo.find_participant", fields(sid = %sid, uid = %uid))]
    async fn find_participant(
        &self,
        sid: &str,
        uid: &str,
    ) -> Result<Option<ParticipantRow>, BillingError> {
        let start = Instant::now();
        let result = sqlx::query(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE sid = $1 AND uid = $2"
        ))
        .bind(sid)
        .bind(uid)
        .fetch_optional(&self.pool)
        .await;

        observe("find_participant", start, result)
            .map(|row| row.as_ref().map(map_row_to_participant))
    }

    #[instrument(skip_all, name = "billing.repo.mark_participant_added", fields(sid = %sid, uid = %uid))]
    async fn mark_participant_added(
        &self,
        sid: &str,
        uid: &str,
        stream_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE participants
            SET stream_id = $3, added_at = COALESCE(added_at, $4)
            WHERE sid = $1 AND uid = $2
            "#,
        )
        .bind(sid)
        .bind(uid)
        .bind(stream_id)
        .bind(at)
        .execute(&self.pool)
        .await;

        observe("mark_participant_added", start, result).map(|_| ())
    }

    #[instrument(skip_all, name = "billing.repo.mark_participant_removed", fields(sid = %sid, uid = %uid))]
    async fn mark_participant_removed(
        &self,
        sid: &str,
        uid: &str,
        at: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE participants
            SET removed_at = COALESCE(removed_at, $3)
            WHERE sid = $1 AND uid = $2
            "#,
        )
        .bind(sid)
        .bind(uid)
        .bind(at)
        .execute(&self.pool)
        .await;

        observe("mark_participant_removed", start, result).map(|_| ())
    }

    #[instrument(skip_all, name = "billing.repo.end_conference", fields(sid = %sid))]
    async fn end_conference(
        &self,
        sid: &str,
        duration: i64,
        at: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE conferences
            SET ended_at = $3, duration = $2
            WHERE sid = $1 AND ended_at IS NULL
            "#,
        )
        .bind(sid)
        .bind(duration)
        .bind(at)
        .execute(&self.pool)
        .await;

        observe("end_conference", start, result).map(|_| ())
    }

    #[instrument(skip_all, name = "billing.repo.list_participants", fields(sid = %sid))]
    async fn list_participants(&self, sid: &str) -> Result<Vec<ParticipantRow>, BillingError> {
        let start = Instant::now();
        let result = sqlx::query(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE sid = $1 ORDER BY id"
        ))
        .bind(sid)
        .fetch_all(&self.pool)
        .await;

        observe("list_participants", start, result)
            .map(|rows| rows.iter().map(map_row_to_participant).collect())
    }
}

fn map_row_to_conference(row: &PgRow) -> ConferenceRow {
    ConferenceRow {
        sid: row.get("sid"),
        url: row.get("url"),
        call_id: row.get("call_id"),
        duration: row.get("duration"),
        ended_at: row.get("ended_at"),
        created_at: row.get("created_at"),
    }
}

fn map_row_to_participant(row: &PgRow) -> ParticipantRow {
    ParticipantRow {
        name: row.get("name"),
        uid: row.get("uid"),
        sid: row.get("sid"),
        stream_id: row.get("stream_id"),
        url: row.get("url"),
        added_at: row.get("added_at"),
        removed_at: row.get("removed_at"),
        created_at: row.get("created_at"),
    }
}
