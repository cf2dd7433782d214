//! Inbound transaction ingestion.
//!
//! A transaction passes a whole-batch size gate and is then folded PDU by
//! PDU. Each PDU either lands in its room or is skipped; a skipped PDU is
//! logged and left out of the result map, since without a parsed event
//! there is no event ID to report it under.

use std::fmt;
use std::sync::Arc;

use doppel_rooms::{Event, RoomError, RoomStore};
use doppel_types::{
    PduResult, SendTransactionResponse, Transaction, MAX_TRANSACTION_EDUS, MAX_TRANSACTION_PDUS,
};
use serde_json::Value;

use crate::error::TransactionError;
use crate::listener::FederationListener;

/// The result of folding a transaction's PDUs.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    /// Committed events, in transaction order.
    pub applied: Vec<Arc<Event>>,
    pub skipped: usize,
}

impl IngestOutcome {
    /// The per-event result map: one success marker per applied event.
    pub fn response(&self) -> SendTransactionResponse {
        SendTransactionResponse {
            pdus: self
                .applied
                .iter()
                .map(|event| (event.event_id().to_string(), PduResult::default()))
                .collect(),
        }
    }
}

/// Why a single PDU was not applied.
#[derive(Debug)]
pub enum SkipReason {
    MissingRoomId,
    UnknownRoom(String),
    InvalidEvent(RoomError),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRoomId => f.write_str("no room_id"),
            Self::UnknownRoom(room_id) => write!(f, "unknown room {room_id}"),
            Self::InvalidEvent(err) => write!(f, "{err}"),
        }
    }
}

/// Parses a transaction body.
pub fn parse_transaction(body: &Value) -> Result<Transaction, TransactionError> {
    Ok(serde_json::from_value(body.clone())?)
}

/// Rejects a transaction over the protocol's batch limits. Runs before any
/// PDU is looked at, so an oversized batch has no effect at all.
pub fn check_size(txn: &Transaction) -> Result<(), TransactionError> {
    if txn.pdus.len() > MAX_TRANSACTION_PDUS || txn.edus.len() > MAX_TRANSACTION_EDUS {
        return Err(TransactionError::TooLarge {
            pdus: txn.pdus.len(),
            edus: txn.edus.len(),
            max_pdus: MAX_TRANSACTION_PDUS,
            max_edus: MAX_TRANSACTION_EDUS,
        });
    }
    Ok(())
}

/// Applies a transaction.
///
/// Each PDU is appended to its room independently; there is no atomicity
/// across PDUs or rooms. `listener.on_pdu` sees each event after it is
/// committed, and every EDU is handed to `listener.on_edu` in arrival order
/// without validation.
pub fn ingest(
    store: &RoomStore,
    txn_id: &str,
    txn: &Transaction,
    listener: &dyn FederationListener,
) -> Result<IngestOutcome, TransactionError> {
    check_size(txn)?;

    let outcome = txn
        .pdus
        .iter()
        .fold(IngestOutcome::default(), |mut outcome, pdu| {
            match apply_pdu(store, pdu) {
                Ok(event) => {
                    listener.on_pdu(&event);
                    outcome.applied.push(event);
                }
                Err(reason) => {
                    tracing::warn!(txn_id, origin = %txn.origin, %reason, "skipping pdu");
                    outcome.skipped += 1;
                }
            }
            outcome
        });

    for edu in &txn.edus {
        listener.on_edu(edu);
    }

    tracing::info!(
        txn_id,
        origin = %txn.origin,
        applied = outcome.applied.len(),
        skipped = outcome.skipped,
        edus = txn.edus.len(),
        "transaction processed"
    );
    Ok(outcome)
}

fn apply_pdu(store: &RoomStore, pdu: &Value) -> Result<Arc<Event>, SkipReason> {
    let room_id = pdu
        .get("room_id")
        .and_then(Value::as_str)
        .ok_or(SkipReason::MissingRoomId)?;
    let shared = store
        .get_room(room_id)
        .map_err(|_| SkipReason::UnknownRoom(room_id.to_string()))?;
    let mut room = RoomStore::lock(&shared);
    let event = room
        .version()
        .parse_untrusted(pdu)
        .map_err(SkipReason::InvalidEvent)?;
    Ok(room.add_event(event))
}
