//! Rooms for the doppel federation responder.
//!
//! A room is an append-only, hash-linked event log plus a current-state
//! view derived from it by last-writer-wins. This crate provides:
//!
//! - [`RoomVersionRules`]: per-version event ID derivation, reference
//!   encoding and redaction, looked up by tag via [`room_version`]
//! - [`Event`]: parsed immutable PDUs that keep their wire JSON
//! - [`Room`]: timeline, state, forward extremities, proto-event
//!   construction and auth-chain resolution
//! - [`RoomStore`]: the concurrent registry of rooms and aliases
//!
//! Nothing here checks authorization rules. Events are accepted once they
//! parse.

mod auth_chain;
mod error;
mod event;
mod room;
mod store;
mod version;

pub use error::RoomError;
pub use event::{sign_event, Event};
pub use room::{EventTemplate, Room};
pub use store::{RoomOptions, RoomStore, SharedRoom};
pub use version::{
    content_hash, redact, reference_hash, require_room_version, room_version, supported_versions,
    EventIdFormat, RedactionRules, RoomVersionRules, DEFAULT_ROOM_VERSION,
};
