//! Federation protocol handling for the doppel responder.
//!
//! Everything here is transport-agnostic: callers hand in already
//! authenticated request content and get back response bodies or typed
//! errors. The server crate maps those onto HTTP.
//!
//! - [`make_join`] / [`make_knock`] / [`send_join`]: the join handshake,
//!   including the partial-state variant
//! - [`ingest`]: transaction ingestion with a whole-batch size gate and
//!   per-PDU skip tolerance
//! - [`process_invite`]: invite countersigning
//! - [`FederationListener`]: hooks fired after each of the above commits

mod error;
mod handshake;
mod invite;
mod listener;
mod transaction;

pub use error::{HandshakeError, InviteError, TransactionError};
pub use handshake::{make_join, make_knock, send_join, JoinOptions};
pub use invite::process_invite;
pub use listener::{FederationListener, LoggingListener, RecordingListener};
pub use transaction::{check_size, ingest, parse_transaction, IngestOutcome, SkipReason};
