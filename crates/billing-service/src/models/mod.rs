//! Billing ledger models.
//!
//! Rows mirror the `conferences` and `participants` tables. Participant rows
//! are also the response body of `GET /api/participants`, so their serde
//! names are part of the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conference record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceRow {
    pub sid: String,

    /// Media node the conference was placed on.
    pub url: String,

    #[serde(rename = "callId")]
    pub call_id: String,

    /// Billable minutes reported when the conference ended.
    pub duration: Option<i64>,

    #[serde(rename = "endedAt")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl ConferenceRow {
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// Participant record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRow {
    pub name: String,
    pub uid: String,
    pub sid: String,

    #[serde(rename = "streamID")]
    pub stream_id: Option<String>,

    pub url: String,

    /// First time the SFU reported a published track.
    #[serde(rename = "addedAt")]
    pub added_at: Option<DateTime<Utc>>,

    /// First time the SFU reported the participant gone.
    #[serde(rename = "removedAt")]
    pub removed_at: Option<DateTime<Utc>>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Query string of `GET /api/participants`.
#[derive(Debug, Deserialize)]
pub struct ParticipantsQuery {
    pub sid: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_wire_names() {
        let row = ParticipantRow {
            name: "alice".to_string(),
            uid: "u1".to_string(),
            sid: "s1".to_string(),
            stream_id: Some("cam".to_string()),
            url: "node.example".to_string(),
            added_at: None,
            removed_at: None,
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["streamID"], "cam");
        assert!(json["addedAt"].is_null());
        assert!(json["removedAt"].is_null());
        assert!(json.get("stream_id").is_none());
    }

    #[test]
    fn test_conference_is_ended() {
        let mut row = ConferenceRow {
            sid: "s1".to_string(),
            url: "node.example".to_string(),
            call_id: "c1".to_string(),
            duration: None,
            ended_at: None,
            created_at: Utc::now(),
        };
        assert!(!row.is_ended());

        row.ended_at = Some(Utc::now());
        assert!(row.is_ended());
    }
}
