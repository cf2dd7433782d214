//! Error types for the room layer.

use doppel_identity::IdentityError;

/// Errors that can occur while reading or mutating rooms.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// No room is registered under this ID.
    #[error("unknown room: {0}")]
    UnknownRoom(String),

    /// No event with this ID exists in the room's timeline.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// No room is registered under this alias.
    #[error("unknown room alias: {0}")]
    UnknownAlias(String),

    /// The room version tag has no rule set.
    #[error("unsupported room version: {0}")]
    UnsupportedVersion(String),

    /// An event payload failed to parse under its room version's rules.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// An event in the timeline references an auth event the timeline does
    /// not contain. The timeline only ever holds events whose dependencies
    /// were present, so this is a defect, not caller input.
    #[error("auth event {missing} referenced by {event_id} is not in room {room_id}")]
    MissingAuthEvent {
        room_id: String,
        event_id: String,
        missing: String,
    },

    /// A new event could not be constructed from the room's current state.
    #[error("cannot build event: {0}")]
    EventConstruction(String),

    /// Signing or hashing failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}
