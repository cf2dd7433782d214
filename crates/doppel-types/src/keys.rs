//! Server key documents published on `/_matrix/key/v2/server`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A currently valid verification key, unpadded base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyKey {
    pub key: String,
}

/// A superseded verification key with the time it stopped being used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OldVerifyKey {
    pub key: String,
    pub expired_ts: i64,
}

/// A server's self-signed key document.
///
/// `signatures` is left as raw JSON (`server -> key id -> signature`) since it
/// is produced and checked by the signing layer, not interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerKeys {
    pub server_name: String,
    pub verify_keys: BTreeMap<String, VerifyKey>,
    #[serde(default)]
    pub old_verify_keys: BTreeMap<String, OldVerifyKey>,
    pub valid_until_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signatures: Option<Value>,
}
