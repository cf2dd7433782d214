//! Transitive closure of auth-event references.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::RoomError;
use crate::event::Event;
use crate::room::Room;

impl Room {
    /// Every event reachable from `events` by following `auth_events`,
    /// each exactly once. The input events themselves are only included when
    /// another input (or one of its ancestors) references them.
    ///
    /// Resolution happens entirely against this room's timeline. A reference
    /// the timeline cannot satisfy is [`RoomError::MissingAuthEvent`]; no
    /// ancestor is ever synthesized. The result is in timeline order.
    pub fn auth_chain_for(&self, events: &[Arc<Event>]) -> Result<Vec<Arc<Event>>, RoomError> {
        let mut found: HashSet<String> = HashSet::new();
        let mut chain: Vec<Arc<Event>> = Vec::new();
        let mut work: Vec<(String, String)> = events
            .iter()
            .flat_map(|event| {
                event
                    .auth_events()
                    .iter()
                    .map(move |id| (event.event_id().to_string(), id.clone()))
            })
            .collect();

        while let Some((referrer, id)) = work.pop() {
            if found.contains(&id) {
                continue;
            }
            let event = self
                .get_event(&id)
                .ok_or_else(|| RoomError::MissingAuthEvent {
                    room_id: self.room_id().to_string(),
                    event_id: referrer.clone(),
                    missing: id.clone(),
                })?;
            found.insert(id.clone());
            work.extend(
                event
                    .auth_events()
                    .iter()
                    .filter(|next| !found.contains(*next))
                    .map(|next| (id.clone(), next.clone())),
            );
            chain.push(Arc::clone(event));
        }

        chain.sort_by_key(|event| self.position(event.event_id()));
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::EventTemplate;
    use crate::version::room_version;
    use doppel_identity::{ServerIdentity, DEFAULT_KEY_ID};
    use doppel_types::{event_type, Membership};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn ids(events: &[Arc<Event>]) -> BTreeSet<String> {
        events.iter().map(|e| e.event_id().to_string()).collect()
    }

    fn room_with_history() -> Room {
        let identity = ServerIdentity::generate("hs1", DEFAULT_KEY_ID);
        let mut room = Room::new("!r:hs1", room_version("10").unwrap());
        let creator = "@c:hs1";
        for template in [
            EventTemplate::state(event_type::CREATE, "", creator, json!({ "creator": creator })),
            EventTemplate::membership(creator, Membership::Join),
            EventTemplate::state(event_type::POWER_LEVELS, "", creator, json!({ "users": { creator: 100 } })),
            EventTemplate::state(event_type::JOIN_RULES, "", creator, json!({ "join_rule": "public" })),
            EventTemplate::membership("@j:remote", Membership::Join),
        ] {
            let event = room.build_event(&template, &identity, 1).unwrap();
            room.add_event(event);
        }
        room
    }

    #[test]
    fn chain_of_join_reaches_create() {
        let room = room_with_history();
        let join = Arc::clone(room.timeline().last().unwrap());
        let chain = room.auth_chain_for(&[join]).unwrap();

        let create = room.current_state(event_type::CREATE, "").unwrap();
        let creator_join = room.current_state(event_type::MEMBER, "@c:hs1").unwrap();
        let chain_ids = ids(&chain);
        assert!(chain_ids.contains(create.event_id()));
        assert!(chain_ids.contains(creator_join.event_id()));
        // Create appears once even though every other event references it.
        assert_eq!(chain.len(), chain_ids.len());
        assert_eq!(chain[0].event_id(), create.event_id());
    }

    #[test]
    fn chain_follows_timeline_order() {
        let room = room_with_history();
        let state = room.all_current_state();
        let chain = room.auth_chain_for(&state).unwrap();
        let positions: Vec<usize> = chain
            .iter()
            .map(|event| room.position(event.event_id()))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(positions.iter().all(|&p| p < room.timeline().len()));
    }

    #[test]
    fn create_event_has_empty_chain() {
        let room = room_with_history();
        let create = Arc::clone(&room.timeline()[0]);
        assert!(room.auth_chain_for(&[create]).unwrap().is_empty());
    }

    #[test]
    fn resolution_is_idempotent() {
        let room = room_with_history();
        let state = room.all_current_state();
        let once = room.auth_chain_for(&state).unwrap();

        // Feeding the chain back in alongside its inputs discovers nothing new.
        let widened: Vec<Arc<Event>> = state.iter().chain(once.iter()).cloned().collect();
        assert_eq!(ids(&room.auth_chain_for(&widened).unwrap()), ids(&once));

        // Re-running on the output alone stays inside the output.
        let twice = room.auth_chain_for(&once).unwrap();
        assert!(ids(&twice).is_subset(&ids(&once)));
    }

    #[test]
    fn missing_reference_is_an_inconsistency() {
        let room = room_with_history();
        let foreign = room_version("10")
            .unwrap()
            .parse_untrusted(&json!({
                "type": "m.room.message",
                "room_id": "!r:hs1",
                "sender": "@x:remote",
                "depth": 9,
                "prev_events": [],
                "auth_events": ["$does-not-exist"],
                "content": {},
            }))
            .unwrap();
        let err = room.auth_chain_for(&[Arc::new(foreign)]).unwrap_err();
        assert!(matches!(
            err,
            RoomError::MissingAuthEvent { ref missing, .. } if missing == "$does-not-exist"
        ));
    }
}
