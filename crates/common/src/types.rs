//! Wire types shared by the SFU and the billing authority.
//!
//! Field names are fixed by deployed clients and the billing contract; the
//! `serde` renames below are part of the protocol.

use serde::{Deserialize, Serialize};

/// Payload of a signed join credential.
///
/// The billing authority serializes this struct to JSON and signs the exact
/// bytes. The SFU receives the JSON string verbatim in the `sid` field of a
/// `join` request and verifies the signature over those same bytes, so the
/// text is never re-serialized between issue and verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceUser {
    /// Conference identifier.
    pub sid: String,

    /// Participant identifier.
    pub uid: String,

    /// Chain call identifier for billing.
    #[serde(rename = "callId")]
    pub call_id: String,

    /// Base URL of the billing authority's callback API.
    #[serde(rename = "callBackURL")]
    pub callback_url: String,

    /// Account billed for the conference; its full-access keys sign credentials.
    #[serde(rename = "AccountId")]
    pub account_id: String,
}

impl ConferenceUser {
    /// Serialize to the canonical JSON text that gets signed.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Signed confirmation returned by every billing callback.
///
/// `signature` is the standard base64 encoding of a raw 64-byte Ed25519
/// signature over `"{call_id}:{duration}:{epoch}"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureView {
    pub signature: String,
    pub epoch: u64,
}

/// Credential handed to a client that creates or joins a conference.
///
/// `sid` holds the serialized [`ConferenceUser`] and `uid` the base64
/// signature over it. These are exactly the two fields a client sends in its
/// `join` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceView {
    pub sid: String,
    pub uid: String,
    pub url: String,
}
