//! Request and response bodies of the federation surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A batch of PDUs and EDUs delivered by one peer in one request.
///
/// PDUs are kept as raw JSON: their shape depends on the room version of the
/// room they belong to, which is only known once the room ID is extracted.
/// Header fields default when absent; only the body's overall shape is
/// enforced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub origin_server_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default)]
    pub pdus: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edus: Vec<Edu>,
}

/// An ephemeral message. Never stored in a room timeline, and never
/// validated: a missing `edu_type` is the empty string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Edu {
    #[serde(default)]
    pub edu_type: String,
    #[serde(default)]
    pub content: Value,
}

/// Per-event outcome inside a transaction response. An empty object means
/// the event was accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PduResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of a successful `send` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendTransactionResponse {
    pub pdus: BTreeMap<String, PduResult>,
}

/// Body of a `make_join` / `make_knock` response: an unsigned template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MakeJoinResponse {
    pub room_version: String,
    pub event: Value,
}

/// Body of a `send_join` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendJoinResponse {
    pub origin: String,
    pub state: Vec<Value>,
    pub auth_chain: Vec<Value>,
    pub servers_in_room: Vec<String>,
    pub members_omitted: bool,
    pub event: Value,
}

/// Body of a room alias directory lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryResponse {
    pub room_id: String,
    pub servers: Vec<String>,
}

/// Body of an `event_auth` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventAuthResponse {
    pub auth_chain: Vec<Value>,
}

/// Body of an inbound `invite` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteRequest {
    pub event: Value,
    pub room_version: String,
    #[serde(default)]
    pub invite_room_state: Vec<Value>,
}

/// Body of an `invite` response: the event, now carrying our signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteResponse {
    pub event: Value,
}
