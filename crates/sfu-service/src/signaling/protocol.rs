//! JSON-RPC 2.0 framing and the signaling method parameters.
//!
//! Client to server: `join`, `offer`, `answer`, `trickle`, `end`. Requests
//! with an `id` get a response; notifications (no `id`) only get one on
//! error. Server to client pushes are notifications: `offer` carries a bare
//! session description, `trickle` a [`Trickle`].

use crate::errors::SignalError;
use crate::media::{IceCandidateInit, JoinConfig, SessionDescription};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Inbound frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self, SignalError> {
        serde_json::from_str(text).map_err(|e| SignalError::Parse(e.to_string()))
    }

    /// Decode `params` into a method's parameter struct.
    pub fn params<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.params)
    }
}

/// `join` parameters.
///
/// `sid` carries the credential JSON text exactly as signed and `uid` the
/// base64 signature over it. The participant and conference identifiers live
/// inside the credential.
#[derive(Debug, Clone, Deserialize)]
pub struct Join {
    pub sid: String,
    pub uid: String,
    pub offer: SessionDescription,
    #[serde(default)]
    pub config: JoinConfig,
}

/// `offer` / `answer` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct Negotiation {
    pub desc: SessionDescription,
}

/// `trickle` parameters, and the payload of the `trickle` push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trickle {
    pub target: i32,
    pub candidate: IceCandidateInit,
}

pub fn result(id: &Value, result: impl Serialize) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

/// Error response. `id` is null when the request could not be parsed.
pub fn error(id: Option<&Value>, err: &SignalError) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id.cloned().unwrap_or(Value::Null),
        "error": {
            "code": err.error_code(),
            "message": err.client_message(),
        },
    })
}

pub fn notification(method: &str, params: impl Serialize) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}
