//! The two-phase join protocol: an unsigned template, then a signed
//! completion that the responder appends and answers with room state.

use std::sync::Arc;

use doppel_identity::ServerIdentity;
use doppel_rooms::{Event, EventTemplate, Room, RoomStore};
use doppel_types::{MakeJoinResponse, Membership, SendJoinResponse};
use serde_json::Value;

use crate::error::HandshakeError;

/// How `send_join` answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinOptions {
    /// Require `omit_members=true` and answer with only the state needed to
    /// authorize the join.
    pub expect_partial_state: bool,
    /// Report the responder as the room's only participant.
    pub conceal_servers: bool,
}

/// Builds the unsigned join template for `user_id`.
///
/// Read-only and unauthorized: any candidate may ask.
pub fn make_join(
    store: &RoomStore,
    room_id: &str,
    user_id: &str,
) -> Result<MakeJoinResponse, HandshakeError> {
    make_membership(store, room_id, user_id, Membership::Join)
}

/// Builds the unsigned knock template for `user_id`.
pub fn make_knock(
    store: &RoomStore,
    room_id: &str,
    user_id: &str,
) -> Result<MakeJoinResponse, HandshakeError> {
    make_membership(store, room_id, user_id, Membership::Knock)
}

fn make_membership(
    store: &RoomStore,
    room_id: &str,
    user_id: &str,
    membership: Membership,
) -> Result<MakeJoinResponse, HandshakeError> {
    let shared = store
        .get_room(room_id)
        .map_err(|_| HandshakeError::UnknownRoom(room_id.to_string()))?;
    let room = RoomStore::lock(&shared);
    let event = room
        .proto_event(&EventTemplate::membership(user_id, membership))
        .map_err(HandshakeError::Template)?;
    tracing::debug!(room_id, user_id, %membership, "issued membership template");
    Ok(MakeJoinResponse {
        room_version: room.version().id().to_string(),
        event,
    })
}

/// Completes a join: parses the signed event under the room's rules,
/// appends it, and answers with the room's state, its auth chain and the
/// participating servers.
///
/// The append and the snapshot happen in one critical section, so the
/// returned state already contains the new membership. Completing twice
/// appends twice.
pub fn send_join(
    store: &RoomStore,
    identity: &ServerIdentity,
    room_id: &str,
    event_json: &Value,
    omit_members: bool,
    options: JoinOptions,
) -> Result<SendJoinResponse, HandshakeError> {
    if options.expect_partial_state && !omit_members {
        return Err(HandshakeError::MissingPartialStateAck);
    }
    let shared = store
        .get_room(room_id)
        .map_err(|_| HandshakeError::UnknownRoom(room_id.to_string()))?;
    let mut room = RoomStore::lock(&shared);

    let event = room
        .version()
        .parse_untrusted(event_json)
        .map_err(HandshakeError::InvalidEvent)?;
    if event.room_id() != room_id {
        return Err(HandshakeError::RoomMismatch {
            expected: room_id.to_string(),
            got: event.room_id().to_string(),
        });
    }
    let event = room.add_event(event);

    let partial = options.expect_partial_state;
    let state = join_state(&room, &event, partial);
    let auth_chain = room
        .auth_chain_for(&state)
        .map_err(HandshakeError::Inconsistent)?;
    let servers_in_room = if options.conceal_servers {
        vec![identity.server_name().to_string()]
    } else {
        room.servers_in_room(identity.server_name())
    };
    drop(room);

    tracing::info!(
        room_id,
        event_id = event.event_id(),
        sender = event.sender(),
        partial,
        state = state.len(),
        auth_chain = auth_chain.len(),
        "join completed"
    );
    Ok(SendJoinResponse {
        origin: identity.server_name().to_string(),
        state: to_json(&state),
        auth_chain: to_json(&auth_chain),
        servers_in_room,
        members_omitted: partial,
        event: event.json().clone(),
    })
}

fn join_state(room: &Room, event: &Event, partial: bool) -> Vec<Arc<Event>> {
    if partial {
        let candidate = event.state_key().unwrap_or_else(|| event.sender());
        room.partial_join_state(candidate)
    } else {
        room.all_current_state()
    }
}

fn to_json(events: &[Arc<Event>]) -> Vec<Value> {
    events.iter().map(|event| event.json().clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use doppel_identity::DEFAULT_KEY_ID;
    use doppel_rooms::RoomOptions;
    use doppel_types::event_type;

    struct Fixture {
        store: RoomStore,
        local: ServerIdentity,
        peer: ServerIdentity,
        room_id: String,
    }

    fn fixture(version: &str) -> Fixture {
        let store = RoomStore::new();
        let local = ServerIdentity::generate("responder", DEFAULT_KEY_ID);
        let peer = ServerIdentity::generate("remote", DEFAULT_KEY_ID);
        let mut options = RoomOptions::new("@alice:responder");
        options.room_version = version.to_string();
        let room_id = store.create_room(&local, &options, 1_000).unwrap();
        Fixture {
            store,
            local,
            peer,
            room_id,
        }
    }

    impl Fixture {
        /// Completes the template the way a joining peer would.
        fn signed_join(&self, user_id: &str) -> Value {
            self.store
                .with_room(&self.room_id, |room| {
                    room.build_event(
                        &EventTemplate::membership(user_id, Membership::Join),
                        &self.peer,
                        2_000,
                    )
                })
                .unwrap()
                .unwrap()
                .json()
                .clone()
        }
    }

    #[test]
    fn join_template_extends_forward_state() {
        let fx = fixture("10");
        let resp = make_join(&fx.store, &fx.room_id, "@bob:remote").unwrap();
        assert_eq!(resp.room_version, "10");
        assert_eq!(resp.event["type"], event_type::MEMBER);
        assert_eq!(resp.event["sender"], "@bob:remote");
        assert_eq!(resp.event["state_key"], "@bob:remote");
        assert_eq!(resp.event["content"]["membership"], "join");
        assert_eq!(resp.event["depth"], 6);
        assert!(resp.event.get("signatures").is_none());

        let last = fx
            .store
            .with_room(&fx.room_id, |room| room.forward_extremities().to_vec())
            .unwrap();
        assert_eq!(resp.event["prev_events"], serde_json::json!(last));
    }

    #[test]
    fn template_does_not_mutate_room() {
        let fx = fixture("10");
        make_join(&fx.store, &fx.room_id, "@bob:remote").unwrap();
        make_knock(&fx.store, &fx.room_id, "@bob:remote").unwrap();
        let len = fx
            .store
            .with_room(&fx.room_id, |room| room.timeline().len())
            .unwrap();
        assert_eq!(len, 5);
    }

    #[test]
    fn knock_template_uses_knock_membership() {
        let fx = fixture("10");
        let resp = make_knock(&fx.store, &fx.room_id, "@bob:remote").unwrap();
        assert_eq!(resp.event["content"]["membership"], "knock");
    }

    #[test]
    fn unknown_room_names_the_room() {
        let fx = fixture("10");
        let err = make_join(&fx.store, "!missing:responder", "@bob:remote").unwrap_err();
        assert!(matches!(err, HandshakeError::UnknownRoom(_)));
        assert!(err.to_string().contains("!missing:responder"));
    }

    #[test]
    fn full_join_appends_and_returns_current_state() {
        let fx = fixture("10");
        let join = fx.signed_join("@bob:remote");
        let resp = send_join(
            &fx.store,
            &fx.local,
            &fx.room_id,
            &join,
            false,
            JoinOptions::default(),
        )
        .unwrap();

        assert_eq!(resp.origin, "responder");
        assert!(!resp.members_omitted);
        // create, alice, power levels, join rules, history visibility, bob
        assert_eq!(resp.state.len(), 6);
        assert!(resp.state.contains(&join));
        assert!(!resp.auth_chain.is_empty());
        assert_eq!(resp.servers_in_room, vec!["remote", "responder"]);

        let membership = fx
            .store
            .with_room(&fx.room_id, |room| room.membership_of("@bob:remote"))
            .unwrap();
        assert_eq!(membership, Some(Membership::Join));
    }

    #[test]
    fn partial_join_requires_acknowledgement() {
        let fx = fixture("10");
        let join = fx.signed_join("@bob:remote");
        let options = JoinOptions {
            expect_partial_state: true,
            conceal_servers: false,
        };
        let err = send_join(&fx.store, &fx.local, &fx.room_id, &join, false, options).unwrap_err();
        assert!(matches!(err, HandshakeError::MissingPartialStateAck));
        let len = fx
            .store
            .with_room(&fx.room_id, |room| room.timeline().len())
            .unwrap();
        assert_eq!(len, 5);
    }

    #[test]
    fn partial_join_returns_auth_subset() {
        let fx = fixture("10");
        let join = fx.signed_join("@bob:remote");
        let options = JoinOptions {
            expect_partial_state: true,
            conceal_servers: false,
        };
        let resp = send_join(&fx.store, &fx.local, &fx.room_id, &join, true, options).unwrap();
        assert!(resp.members_omitted);
        let types: Vec<&str> = resp
            .state
            .iter()
            .filter_map(|event| event["type"].as_str())
            .collect();
        assert_eq!(
            types,
            vec![
                event_type::CREATE,
                event_type::POWER_LEVELS,
                event_type::JOIN_RULES,
                event_type::MEMBER,
            ]
        );
        assert!(!resp
            .state
            .iter()
            .any(|event| event["state_key"] == "@alice:responder"));
    }

    #[test]
    fn partial_join_carries_membership_history_in_auth_chain() {
        let fx = fixture("10");
        let invite = fx
            .store
            .with_room(&fx.room_id, |room| {
                let invite = room.build_event(
                    &EventTemplate::state(
                        event_type::MEMBER,
                        "@bob:remote",
                        "@alice:responder",
                        serde_json::json!({ "membership": "invite" }),
                    ),
                    &fx.local,
                    1_500,
                )?;
                Ok::<_, doppel_rooms::RoomError>(room.add_event(invite))
            })
            .unwrap()
            .unwrap();

        let join = fx.signed_join("@bob:remote");
        let options = JoinOptions {
            expect_partial_state: true,
            conceal_servers: false,
        };
        let resp = send_join(&fx.store, &fx.local, &fx.room_id, &join, true, options).unwrap();

        assert!(!resp.state.contains(invite.json()));
        assert!(resp.auth_chain.contains(invite.json()));
    }

    #[test]
    fn concealment_reports_only_the_responder() {
        let fx = fixture("10");
        for user in ["@bob:remote", "@carol:third", "@dave:fourth"] {
            let join = fx.signed_join(user);
            let resp = send_join(
                &fx.store,
                &fx.local,
                &fx.room_id,
                &join,
                false,
                JoinOptions {
                    expect_partial_state: false,
                    conceal_servers: true,
                },
            )
            .unwrap();
            assert_eq!(resp.servers_in_room, vec!["responder"]);
        }
        let servers = fx
            .store
            .with_room(&fx.room_id, |room| room.servers_in_room("responder"))
            .unwrap();
        assert_eq!(servers.len(), 4);
    }

    #[test]
    fn repeated_completion_appends_again() {
        let fx = fixture("10");
        let join = fx.signed_join("@bob:remote");
        for _ in 0..2 {
            send_join(&fx.store, &fx.local, &fx.room_id, &join, false, JoinOptions::default())
                .unwrap();
        }
        let len = fx
            .store
            .with_room(&fx.room_id, |room| room.timeline().len())
            .unwrap();
        assert_eq!(len, 7);
    }

    #[test]
    fn unparsable_join_is_rejected_without_append() {
        let fx = fixture("10");
        let err = send_join(
            &fx.store,
            &fx.local,
            &fx.room_id,
            &serde_json::json!({ "type": "m.room.member" }),
            false,
            JoinOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidEvent(_)));
    }

    #[test]
    fn join_for_another_room_is_rejected() {
        let fx = fixture("10");
        let other = fx
            .store
            .create_room(&fx.local, &RoomOptions::new("@alice:responder"), 1_000)
            .unwrap();
        let join = fx.signed_join("@bob:remote");
        let err = send_join(&fx.store, &fx.local, &other, &join, false, JoinOptions::default())
            .unwrap_err();
        assert!(matches!(err, HandshakeError::RoomMismatch { .. }));
    }

    #[test]
    fn legacy_room_versions_complete_joins() {
        let fx = fixture("1");
        let join = fx.signed_join("@bob:remote");
        let resp = send_join(&fx.store, &fx.local, &fx.room_id, &join, false, JoinOptions::default())
            .unwrap();
        assert_eq!(resp.event["event_id"], join["event_id"]);
    }
}
