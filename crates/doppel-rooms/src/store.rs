//! The registry of rooms hosted by the responder.

use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use doppel_identity::ServerIdentity;
use doppel_types::{event_type, Membership};

use crate::error::RoomError;
use crate::event::Event;
use crate::room::{EventTemplate, Room};
use crate::version::{require_room_version, DEFAULT_ROOM_VERSION};

/// A room shared between request handlers. Holding the mutex is the room's
/// critical section: appends, state updates and every read used to derive a
/// response happen under it.
pub type SharedRoom = Arc<Mutex<Room>>;

/// Options for a room created by the responder itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomOptions {
    pub room_version: String,
    /// Creator and sole initial member; should live on the responder.
    pub creator: String,
    pub aliases: Vec<String>,
    pub join_rule: String,
    pub history_visibility: String,
}

impl RoomOptions {
    pub fn new(creator: impl Into<String>) -> Self {
        Self {
            room_version: DEFAULT_ROOM_VERSION.to_string(),
            creator: creator.into(),
            aliases: Vec::new(),
            join_rule: "public".to_string(),
            history_visibility: "shared".to_string(),
        }
    }
}

/// Room ID -> room, plus alias -> room ID.
///
/// The outer maps use `std::sync::RwLock` and are held only long enough to
/// clone out a [`SharedRoom`]; each room has its own mutex, so work on one
/// room never blocks another. None of these locks is held across an
/// `.await`.
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: RwLock<HashMap<String, SharedRoom>>,
    aliases: RwLock<HashMap<String, String>>,
}

fn recover<T>(result: Result<T, std::sync::PoisonError<T>>, what: &str) -> T {
    result.unwrap_or_else(|poisoned| {
        tracing::error!(lock = what, "lock poisoned, recovering");
        poisoned.into_inner()
    })
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> RwLockReadGuard<'_, HashMap<String, SharedRoom>> {
        recover(self.rooms.read(), "rooms")
    }

    fn rooms_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, SharedRoom>> {
        recover(self.rooms.write(), "rooms")
    }

    /// Locks one room. Poisoning is recovered: a room's data is only
    /// mutated by `Room::add_event`, which leaves it consistent at every
    /// step that can panic.
    pub fn lock(room: &SharedRoom) -> MutexGuard<'_, Room> {
        recover(room.lock(), "room")
    }

    /// Registers a room and its aliases, replacing any room with the same ID.
    pub fn insert_room(&self, room: Room) -> SharedRoom {
        let room_id = room.room_id().to_string();
        let aliases = room.aliases().to_vec();
        let shared = Arc::new(Mutex::new(room));
        self.rooms_mut().insert(room_id.clone(), Arc::clone(&shared));
        let mut alias_map = recover(self.aliases.write(), "aliases");
        for alias in aliases {
            alias_map.insert(alias, room_id.clone());
        }
        tracing::info!(%room_id, "registered room");
        shared
    }

    pub fn get_room(&self, room_id: &str) -> Result<SharedRoom, RoomError> {
        self.rooms()
            .get(room_id)
            .cloned()
            .ok_or_else(|| RoomError::UnknownRoom(room_id.to_string()))
    }

    /// Runs `f` inside the room's critical section.
    pub fn with_room<T>(
        &self,
        room_id: &str,
        f: impl FnOnce(&mut Room) -> T,
    ) -> Result<T, RoomError> {
        let shared = self.get_room(room_id)?;
        let mut room = Self::lock(&shared);
        Ok(f(&mut room))
    }

    /// Appends `event` to its room.
    pub fn add_event(&self, event: Event) -> Result<Arc<Event>, RoomError> {
        let room_id = event.room_id().to_string();
        self.with_room(&room_id, |room| room.add_event(event))
    }

    /// Points `alias` at `room_id`.
    pub fn add_alias(&self, alias: &str, room_id: &str) -> Result<(), RoomError> {
        self.with_room(room_id, |room| room.push_alias(alias.to_string()))?;
        recover(self.aliases.write(), "aliases").insert(alias.to_string(), room_id.to_string());
        Ok(())
    }

    pub fn resolve_alias(&self, alias: &str) -> Result<String, RoomError> {
        recover(self.aliases.read(), "aliases")
            .get(alias)
            .cloned()
            .ok_or_else(|| RoomError::UnknownAlias(alias.to_string()))
    }

    pub fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Finds a committed event in any room.
    pub fn find_event(&self, event_id: &str) -> Option<Arc<Event>> {
        let rooms: Vec<SharedRoom> = self.rooms().values().cloned().collect();
        rooms
            .iter()
            .find_map(|shared| Self::lock(shared).get_event(event_id).cloned())
    }

    /// Creates a room authored by `identity`: create event, creator join,
    /// power levels, join rules and history visibility, all signed.
    pub fn create_room(
        &self,
        identity: &ServerIdentity,
        options: &RoomOptions,
        now_ms: i64,
    ) -> Result<String, RoomError> {
        let rules = require_room_version(&options.room_version)?;
        let room_id = format!("!{}:{}", uuid::Uuid::new_v4().simple(), identity.server_name());
        let mut room = Room::new(room_id.clone(), rules);
        let creator = options.creator.as_str();

        let mut create_content = json!({ "room_version": options.room_version });
        if rules.id() != "11" {
            create_content["creator"] = json!(creator);
        }
        let templates = [
            EventTemplate::state(event_type::CREATE, "", creator, create_content),
            EventTemplate::membership(creator, Membership::Join),
            EventTemplate::state(
                event_type::POWER_LEVELS,
                "",
                creator,
                json!({
                    "users": { creator: 100 },
                    "users_default": 0,
                    "events_default": 0,
                    "state_default": 50,
                    "ban": 50,
                    "kick": 50,
                    "redact": 50,
                    "invite": 0,
                }),
            ),
            EventTemplate::state(
                event_type::JOIN_RULES,
                "",
                creator,
                json!({ "join_rule": options.join_rule }),
            ),
            EventTemplate::state(
                event_type::HISTORY_VISIBILITY,
                "",
                creator,
                json!({ "history_visibility": options.history_visibility }),
            ),
        ];
        for template in &templates {
            let event = room.build_event(template, identity, now_ms)?;
            room.add_event(event);
        }
        for alias in &options.aliases {
            room.push_alias(alias.clone());
        }

        self.insert_room(room);
        tracing::info!(
            %room_id,
            room_version = %options.room_version,
            creator,
            "created room"
        );
        Ok(room_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doppel_identity::DEFAULT_KEY_ID;
    use std::thread;

    fn identity() -> ServerIdentity {
        ServerIdentity::generate("hs1", DEFAULT_KEY_ID)
    }

    #[test]
    fn create_room_seeds_initial_state() {
        let store = RoomStore::new();
        let mut options = RoomOptions::new("@alice:hs1");
        options.aliases.push("#lobby:hs1".into());
        let room_id = store.create_room(&identity(), &options, 1).unwrap();

        assert!(room_id.starts_with('!') && room_id.ends_with(":hs1"));
        assert_eq!(store.resolve_alias("#lobby:hs1").unwrap(), room_id);
        store
            .with_room(&room_id, |room| {
                assert_eq!(room.timeline().len(), 5);
                assert_eq!(room.membership_of("@alice:hs1"), Some(Membership::Join));
                assert_eq!(room.version().id(), DEFAULT_ROOM_VERSION);
                assert_eq!(room.depth(), 5);
            })
            .unwrap();
    }

    #[test]
    fn unknown_lookups_fail() {
        let store = RoomStore::new();
        assert!(matches!(store.get_room("!nope:hs1"), Err(RoomError::UnknownRoom(_))));
        assert!(matches!(
            store.resolve_alias("#nope:hs1"),
            Err(RoomError::UnknownAlias(_))
        ));
        assert!(store.find_event("$nope").is_none());
        assert!(matches!(
            store.add_alias("#a:hs1", "!nope:hs1"),
            Err(RoomError::UnknownRoom(_))
        ));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let store = RoomStore::new();
        let mut options = RoomOptions::new("@alice:hs1");
        options.room_version = "99".into();
        assert!(matches!(
            store.create_room(&identity(), &options, 1),
            Err(RoomError::UnsupportedVersion(_))
        ));
        assert!(store.room_ids().is_empty());
    }

    #[test]
    fn find_event_searches_every_room() {
        let store = RoomStore::new();
        let id = identity();
        let a = store.create_room(&id, &RoomOptions::new("@a:hs1"), 1).unwrap();
        let b = store.create_room(&id, &RoomOptions::new("@b:hs1"), 1).unwrap();
        let last_b = store
            .with_room(&b, |room| room.timeline().last().unwrap().event_id().to_string())
            .unwrap();
        let found = store.find_event(&last_b).unwrap();
        assert_eq!(found.room_id(), b);
        assert_ne!(found.room_id(), a);
        assert_eq!(store.room_ids().len(), 2);
    }

    #[test]
    fn concurrent_appends_are_serialized() {
        let store = Arc::new(RoomStore::new());
        let id = Arc::new(identity());
        let room_id = store.create_room(&id, &RoomOptions::new("@a:hs1"), 1).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let id = Arc::clone(&id);
                let room_id = room_id.clone();
                thread::spawn(move || {
                    for j in 0..10 {
                        store
                            .with_room(&room_id, |room| {
                                let template = EventTemplate {
                                    event_type: "m.room.message".into(),
                                    state_key: None,
                                    sender: "@a:hs1".into(),
                                    content: json!({ "body": format!("{i}-{j}") }),
                                };
                                let event = room.build_event(&template, &id, 2).unwrap();
                                room.add_event(event);
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        store
            .with_room(&room_id, |room| {
                assert_eq!(room.timeline().len(), 5 + 80);
                // Each append extended the previous one: depths are strictly increasing.
                let depths: Vec<i64> = room.timeline().iter().map(|e| e.depth()).collect();
                assert!(depths.windows(2).all(|w| w[0] < w[1]));
            })
            .unwrap();
    }
}
