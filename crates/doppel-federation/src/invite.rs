use doppel_identity::ServerIdentity;
use doppel_rooms::{require_room_version, sign_event};
use doppel_types::{InviteRequest, InviteResponse};
use serde_json::Value;

use crate::error::InviteError;
use crate::listener::FederationListener;

/// Accepts an invite: parses the event under the room version named in the
/// request, hands it to the listener, and echoes it back countersigned.
///
/// The invited room need not exist on the responder and nothing is
/// appended anywhere.
pub fn process_invite(
    identity: &ServerIdentity,
    body: &Value,
    listener: &dyn FederationListener,
) -> Result<InviteResponse, InviteError> {
    let request: InviteRequest = serde_json::from_value(body.clone())?;
    let rules = require_room_version(&request.room_version)
        .map_err(|_| InviteError::UnsupportedVersion(request.room_version.clone()))?;
    let event = rules
        .parse_untrusted(&request.event)
        .map_err(InviteError::InvalidEvent)?;

    listener.on_invite(&event);

    let mut signed = event.json().clone();
    sign_event(rules, identity, &mut signed).map_err(InviteError::Signing)?;
    tracing::info!(
        room_id = event.room_id(),
        event_id = event.event_id(),
        invitee = event.state_key().unwrap_or_default(),
        "countersigned invite"
    );
    Ok(InviteResponse { event: signed })
}
