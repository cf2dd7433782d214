//! Shared wire types and constants for the doppel federation responder.
//!
//! This crate provides the request and response bodies exchanged on the
//! federation surface, the machine-readable error codes every endpoint
//! reports, membership values, and the protocol limits enforced on inbound
//! transactions.
//!
//! Nothing in here knows about rooms, signatures or HTTP. Every other crate
//! in the workspace depends on `doppel-types` for these shapes, which keeps
//! the dependency graph a tree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod keys;
mod wire;

pub use keys::{OldVerifyKey, ServerKeys, VerifyKey};
pub use wire::{
    DirectoryResponse, Edu, EventAuthResponse, InviteRequest, InviteResponse, MakeJoinResponse,
    PduResult, SendJoinResponse, SendTransactionResponse, Transaction,
};

/// Maximum number of PDUs accepted in a single transaction.
pub const MAX_TRANSACTION_PDUS: usize = 50;

/// Maximum number of EDUs accepted in a single transaction.
pub const MAX_TRANSACTION_EDUS: usize = 100;

/// Event type constants used by the responder.
pub mod event_type {
    pub const CREATE: &str = "m.room.create";
    pub const MEMBER: &str = "m.room.member";
    pub const POWER_LEVELS: &str = "m.room.power_levels";
    pub const JOIN_RULES: &str = "m.room.join_rules";
    pub const HISTORY_VISIBILITY: &str = "m.room.history_visibility";
    pub const THIRD_PARTY_INVITE: &str = "m.room.third_party_invite";
}

/// Membership state of a user in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Join,
    Knock,
    Invite,
    Leave,
    Ban,
}

impl Membership {
    /// Returns the protocol string for this membership.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Knock => "knock",
            Self::Invite => "invite",
            Self::Leave => "leave",
            Self::Ban => "ban",
        }
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a membership string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown membership: {0}")]
pub struct ParseMembershipError(pub String);

impl FromStr for Membership {
    type Err = ParseMembershipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "join" => Ok(Self::Join),
            "knock" => Ok(Self::Knock),
            "invite" => Ok(Self::Invite),
            "leave" => Ok(Self::Leave),
            "ban" => Ok(Self::Ban),
            other => Err(ParseMembershipError(other.to_string())),
        }
    }
}

/// Machine-readable error codes carried in every error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "M_UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "M_FORBIDDEN")]
    Forbidden,
    #[serde(rename = "M_NOT_FOUND")]
    NotFound,
    #[serde(rename = "M_BAD_JSON")]
    BadJson,
    #[serde(rename = "M_MISSING_PARAM")]
    MissingParam,
    #[serde(rename = "M_INVALID_PARAM")]
    InvalidParam,
    #[serde(rename = "M_TOO_LARGE")]
    TooLarge,
    #[serde(rename = "M_UNKNOWN")]
    Unknown,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "M_UNAUTHORIZED",
            Self::Forbidden => "M_FORBIDDEN",
            Self::NotFound => "M_NOT_FOUND",
            Self::BadJson => "M_BAD_JSON",
            Self::MissingParam => "M_MISSING_PARAM",
            Self::InvalidParam => "M_INVALID_PARAM",
            Self::TooLarge => "M_TOO_LARGE",
            Self::Unknown => "M_UNKNOWN",
        }
    }
}

/// JSON body returned alongside every non-2xx status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub errcode: ErrorCode,
    pub error: String,
}

impl ErrorBody {
    pub fn new(errcode: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            errcode,
            error: error.into(),
        }
    }
}

/// Returns the server-name part of a `@user:server`, `!room:server` or
/// `#alias:server` identifier.
///
/// Returns `None` when the identifier has no `:` separator.
pub fn server_name_of(id: &str) -> Option<&str> {
    id.split_once(':').map(|(_, server)| server)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_round_trip() {
        for m in [
            Membership::Join,
            Membership::Knock,
            Membership::Invite,
            Membership::Leave,
            Membership::Ban,
        ] {
            assert_eq!(m.as_str().parse::<Membership>().unwrap(), m);
            assert_eq!(serde_json::to_value(m).unwrap(), m.as_str());
        }
    }

    #[test]
    fn membership_unknown_is_rejected() {
        let err = "joined".parse::<Membership>().unwrap_err();
        assert_eq!(err.0, "joined");
    }

    #[test]
    fn error_body_serializes_errcode() {
        let body = ErrorBody::new(ErrorCode::NotFound, "no such room");
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["errcode"], "M_NOT_FOUND");
        assert_eq!(value["error"], "no such room");
        assert_eq!(value["errcode"], ErrorCode::NotFound.as_str());
    }

    #[test]
    fn server_name_keeps_port() {
        assert_eq!(server_name_of("@alice:hs1"), Some("hs1"));
        assert_eq!(server_name_of("!abc:localhost:8448"), Some("localhost:8448"));
        assert_eq!(server_name_of("no-separator"), None);
    }
}
