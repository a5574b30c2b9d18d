//! SFU signaling error types.
//!
//! Every failure on the signaling path is reported back to the caller as a
//! JSON-RPC error. Clients match on the message text of the conflict and
//! authentication errors, so those strings are part of the protocol.
//! Billing and chain failures never appear here; they are logged where they
//! happen.

use thiserror::Error;

/// JSON-RPC code used for every request-level failure.
pub const SIGNAL_ERROR_CODE: i32 = 500;

/// JSON-RPC code for a frame that is not valid JSON-RPC.
pub const PARSE_ERROR_CODE: i32 = -32700;

/// JSON-RPC code for an unknown method.
pub const METHOD_NOT_FOUND_CODE: i32 = -32601;

/// Signaling error type.
///
/// Close semantics:
/// - `Authentication`, `EndedConference`, `TooManyParticipants`, `Transport`,
///   `InvalidNegotiation`: reject and close the connection
/// - `ParticipantExists`, `InvalidParams`, `NotJoined`, `AlreadyJoined`,
///   `MethodNotFound`, `Parse`: reject the request only
#[derive(Debug, Error)]
pub enum SignalError {
    /// Join signature did not verify against any full-access key.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Target conference already has an end time.
    #[error("Conference {0} has ended")]
    EndedConference(String),

    /// Participant identifier already online in the conference.
    #[error("Participant {0} is already online")]
    ParticipantExists(String),

    /// Conference peer count exceeded the configured limit.
    #[error("Conference {conference_id} has {peers} peers (limit {limit})")]
    TooManyParticipants {
        conference_id: String,
        peers: usize,
        limit: usize,
    },

    /// Media engine rejected negotiation or ICE input.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Unparseable offer/answer/trickle parameters.
    #[error("Invalid negotiation message: {0}")]
    InvalidNegotiation(String),

    /// Unparseable join parameters or credential payload.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Negotiation message before a successful join.
    #[error("Connection has not joined a conference")]
    NotJoined,

    /// Second join on the same connection.
    #[error("Connection already joined a conference")]
    AlreadyJoined,

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Frame is not a JSON-RPC message.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl SignalError {
    /// Returns the JSON-RPC error code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            SignalError::Parse(_) => PARSE_ERROR_CODE,
            SignalError::MethodNotFound(_) => METHOD_NOT_FOUND_CODE,
            _ => SIGNAL_ERROR_CODE,
        }
    }

    /// Returns the message sent to the client.
    pub fn client_message(&self) -> String {
        match self {
            SignalError::Authentication(_) => "verify error".to_string(),
            SignalError::EndedConference(_) => "ended conference".to_string(),
            SignalError::ParticipantExists(_) => "uid exist".to_string(),
            SignalError::TooManyParticipants { .. } => "too many participants".to_string(),
            SignalError::Transport(reason)
            | SignalError::InvalidNegotiation(reason)
            | SignalError::InvalidParams(reason)
            | SignalError::Parse(reason) => reason.clone(),
            SignalError::NotJoined => "not joined".to_string(),
            SignalError::AlreadyJoined => "already joined".to_string(),
            SignalError::MethodNotFound(method) => format!("method not found: {method}"),
        }
    }

    /// Whether the connection is torn down after reporting this error.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            SignalError::Authentication(_)
                | SignalError::EndedConference(_)
                | SignalError::TooManyParticipants { .. }
                | SignalError::Transport(_)
                | SignalError::InvalidNegotiation(_)
        )
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalError::Authentication(_) => "authentication",
            SignalError::EndedConference(_) => "ended_conference",
            SignalError::ParticipantExists(_) => "participant_exists",
            SignalError::TooManyParticipants { .. } => "too_many_participants",
            SignalError::Transport(_) => "transport",
            SignalError::InvalidNegotiation(_) => "invalid_negotiation",
            SignalError::InvalidParams(_) => "invalid_params",
            SignalError::NotJoined => "not_joined",
            SignalError::AlreadyJoined => "already_joined",
            SignalError::MethodNotFound(_) => "method_not_found",
            SignalError::Parse(_) => "parse",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_messages() {
        assert_eq!(
            SignalError::Authentication("no keys".to_string()).client_message(),
            "verify error"
        );
        assert_eq!(
            SignalError::EndedConference("c1".to_string()).client_message(),
            "ended conference"
        );
        assert_eq!(
            SignalError::ParticipantExists("u1".to_string()).client_message(),
            "uid exist"
        );
        assert_eq!(
            SignalError::TooManyParticipants {
                conference_id: "c1".to_string(),
                peers: 10,
                limit: 9
            }
            .client_message(),
            "too many participants"
        );
    }

    #[test]
    fn test_client_message_hides_auth_reason() {
        let err = SignalError::Authentication("rpc timeout to 10.0.0.5".to_string());
        assert!(!err.client_message().contains("10.0.0.5"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(SignalError::Transport("x".to_string()).error_code(), 500);
        assert_eq!(SignalError::NotJoined.error_code(), 500);
        assert_eq!(SignalError::Parse("x".to_string()).error_code(), -32700);
        assert_eq!(
            SignalError::MethodNotFound("x".to_string()).error_code(),
            -32601
        );
    }

    #[test]
    fn test_close_semantics() {
        assert!(SignalError::Authentication(String::new()).closes_connection());
        assert!(SignalError::EndedConference(String::new()).closes_connection());
        assert!(SignalError::Transport(String::new()).closes_connection());
        assert!(SignalError::InvalidNegotiation(String::new()).closes_connection());
        assert!(SignalError::TooManyParticipants {
            conference_id: String::new(),
            peers: 0,
            limit: 0
        }
        .closes_connection());

        assert!(!SignalError::ParticipantExists(String::new()).closes_connection());
        assert!(!SignalError::InvalidParams(String::new()).closes_connection());
        assert!(!SignalError::NotJoined.closes_connection());
        assert!(!SignalError::MethodNotFound(String::new()).closes_connection());
    }

    #[test]
    fn test_display() {
        let err = SignalError::TooManyParticipants {
            conference_id: "c1".to_string(),
            peers: 10,
            limit: 9,
        };
        assert_eq!(format!("{err}"), "Conference c1 has 10 peers (limit 9)");
    }
}
