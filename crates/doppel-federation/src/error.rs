use doppel_rooms::RoomError;
use thiserror::Error;

/// Errors that can occur during the join or knock handshake.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("unknown room: {0}")]
    UnknownRoom(String),
    #[error("cannot build membership template: {0}")]
    Template(#[source] RoomError),
    /// The responder expects partial-state joins and the request did not
    /// carry `omit_members=true`.
    #[error("send_join was not a partial-state request (omit_members=true is required)")]
    MissingPartialStateAck,
    #[error("cannot parse join event: {0}")]
    InvalidEvent(#[source] RoomError),
    #[error("join event belongs to room {got}, not {expected}")]
    RoomMismatch { expected: String, got: String },
    /// The room's own timeline could not answer an auth-chain query.
    #[error(transparent)]
    Inconsistent(RoomError),
}

/// Errors that reject a whole transaction. Per-PDU failures never surface
/// here.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("cannot parse transaction: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("transactions are limited to {max_pdus} PDUs and {max_edus} EDUs, got {pdus} and {edus}")]
    TooLarge {
        pdus: usize,
        edus: usize,
        max_pdus: usize,
        max_edus: usize,
    },
}

/// Errors that can occur while processing an inbound invite.
#[derive(Debug, Error)]
pub enum InviteError {
    #[error("cannot parse invite request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported room version: {0}")]
    UnsupportedVersion(String),
    #[error("cannot parse invite event: {0}")]
    InvalidEvent(#[source] RoomError),
    #[error("cannot sign invite event: {0}")]
    Signing(#[source] RoomError),
}
