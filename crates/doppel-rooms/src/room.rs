//! A single room: timeline, current state, forward extremities.

use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use doppel_identity::ServerIdentity;
use doppel_types::{event_type, server_name_of, Membership};

use crate::error::RoomError;
use crate::event::{sign_event, Event};
use crate::version::{EventIdFormat, RoomVersionRules};

/// The fields a caller chooses when asking for a new event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTemplate {
    pub event_type: String,
    pub state_key: Option<String>,
    pub sender: String,
    pub content: Value,
}

impl EventTemplate {
    /// A membership change of `user` to `membership`, sent by `user`.
    pub fn membership(user: &str, membership: Membership) -> Self {
        Self {
            event_type: event_type::MEMBER.to_string(),
            state_key: Some(user.to_string()),
            sender: user.to_string(),
            content: json!({ "membership": membership.as_str() }),
        }
    }

    /// A state event with the given type and key.
    pub fn state(event_type: &str, state_key: &str, sender: &str, content: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            state_key: Some(state_key.to_string()),
            sender: sender.to_string(),
            content,
        }
    }
}

type StateKey = (String, String);

/// An append-only event log with a derived current-state view.
///
/// The timeline is never rewritten. State is last-writer-wins per
/// `(type, state_key)` in timeline order; there is no state resolution.
#[derive(Debug)]
pub struct Room {
    room_id: String,
    version: &'static dyn RoomVersionRules,
    timeline: Vec<Arc<Event>>,
    index: HashMap<String, usize>,
    state: HashMap<StateKey, Arc<Event>>,
    forward_extremities: Vec<String>,
    depth: i64,
    aliases: Vec<String>,
}

impl Room {
    pub fn new(room_id: impl Into<String>, version: &'static dyn RoomVersionRules) -> Self {
        Self {
            room_id: room_id.into(),
            version,
            timeline: Vec::new(),
            index: HashMap::new(),
            state: HashMap::new(),
            forward_extremities: Vec::new(),
            depth: 0,
            aliases: Vec::new(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn version(&self) -> &'static dyn RoomVersionRules {
        self.version
    }

    pub fn timeline(&self) -> &[Arc<Event>] {
        &self.timeline
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub(crate) fn push_alias(&mut self, alias: String) {
        if !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
    }

    pub fn forward_extremities(&self) -> &[String] {
        &self.forward_extremities
    }

    pub fn depth(&self) -> i64 {
        self.depth
    }

    /// Appends an event to the timeline.
    ///
    /// State events replace whatever previously held their `(type,
    /// state_key)`, regardless of depth or timestamps. The event becomes the
    /// sole forward extremity. Appending the same event twice records it
    /// twice; the ID index points at the latest copy.
    pub fn add_event(&mut self, event: impl Into<Arc<Event>>) -> Arc<Event> {
        let event = event.into();
        let position = self.timeline.len();
        self.timeline.push(Arc::clone(&event));
        self.index.insert(event.event_id().to_string(), position);

        if let Some((kind, key)) = event.state_tuple() {
            self.state
                .insert((kind.to_string(), key.to_string()), Arc::clone(&event));
        }
        self.forward_extremities = vec![event.event_id().to_string()];
        self.depth = self.depth.max(event.depth());

        tracing::debug!(
            room_id = %self.room_id,
            event_id = event.event_id(),
            event_type = event.event_type(),
            position,
            "appended event"
        );
        event
    }

    pub fn get_event(&self, event_id: &str) -> Option<&Arc<Event>> {
        self.index.get(event_id).map(|&i| &self.timeline[i])
    }

    pub(crate) fn position(&self, event_id: &str) -> usize {
        self.index.get(event_id).copied().unwrap_or(usize::MAX)
    }

    /// The event currently holding `(event_type, state_key)`.
    pub fn current_state(&self, event_type: &str, state_key: &str) -> Option<&Arc<Event>> {
        self.state.get(&(event_type.to_string(), state_key.to_string()))
    }

    /// Every current state event, in timeline order.
    pub fn all_current_state(&self) -> Vec<Arc<Event>> {
        let mut events: Vec<Arc<Event>> = self.state.values().cloned().collect();
        events.sort_by_key(|event| self.position(event.event_id()));
        events
    }

    /// The current membership of `user_id`.
    pub fn membership_of(&self, user_id: &str) -> Option<Membership> {
        self.current_state(event_type::MEMBER, user_id)?.membership()
    }

    /// Servers with at least one joined member, sorted. Always includes
    /// `local_server`.
    pub fn servers_in_room(&self, local_server: &str) -> Vec<String> {
        let mut servers: BTreeSet<String> = self
            .state
            .iter()
            .filter(|((kind, _), event)| {
                kind == event_type::MEMBER && event.membership() == Some(Membership::Join)
            })
            .filter_map(|((_, user), _)| server_name_of(user).map(str::to_string))
            .collect();
        servers.insert(local_server.to_string());
        servers.into_iter().collect()
    }

    /// The current state events an event with these properties needs for
    /// authorization: create, power levels, the sender's membership, and for
    /// membership changes the target's membership plus (for join, invite
    /// and knock) the join rules.
    pub fn state_needed_for_auth(
        &self,
        event_type: &str,
        sender: &str,
        state_key: Option<&str>,
        content: &Value,
    ) -> Vec<Arc<Event>> {
        let mut wanted: Vec<(&str, &str)> = vec![
            (event_type::CREATE, ""),
            (event_type::POWER_LEVELS, ""),
            (event_type::MEMBER, sender),
        ];
        if event_type == event_type::MEMBER {
            if let Some(target) = state_key {
                wanted.push((event_type::MEMBER, target));
            }
            let membership = content
                .get("membership")
                .and_then(Value::as_str)
                .and_then(|m| m.parse::<Membership>().ok());
            if matches!(
                membership,
                Some(Membership::Join | Membership::Invite | Membership::Knock)
            ) {
                wanted.push((event_type::JOIN_RULES, ""));
            }
        }

        let mut seen = BTreeSet::new();
        let mut events: Vec<Arc<Event>> = wanted
            .into_iter()
            .filter_map(|(kind, key)| self.current_state(kind, key))
            .filter(|event| seen.insert(event.event_id().to_string()))
            .cloned()
            .collect();
        events.sort_by_key(|event| self.position(event.event_id()));
        events
    }

    /// The minimal state a partial-state join response carries: create,
    /// power levels, join rules and `candidate`'s current membership.
    ///
    /// Earlier memberships of `candidate` (an invite or knock before the
    /// join) are not state any more; they reach the response through the
    /// auth chain, since a membership event's auth events include the
    /// target's previous membership.
    pub fn partial_join_state(&self, candidate: &str) -> Vec<Arc<Event>> {
        let mut events: Vec<Arc<Event>> = [
            (event_type::CREATE, ""),
            (event_type::POWER_LEVELS, ""),
            (event_type::JOIN_RULES, ""),
            (event_type::MEMBER, candidate),
        ]
        .into_iter()
        .filter_map(|(kind, key)| self.current_state(kind, key).cloned())
        .collect();
        events.sort_by_key(|event| self.position(event.event_id()));
        events
    }

    /// Builds an unsigned proto event extending the current forward state.
    ///
    /// `prev_events` are the forward extremities, `auth_events` are chosen by
    /// [`Room::state_needed_for_auth`], and `depth` is one past the room's.
    /// Every event but the create event needs the room to have a create
    /// event.
    pub fn proto_event(&self, template: &EventTemplate) -> Result<Value, RoomError> {
        let is_create = template.event_type == event_type::CREATE;
        if !is_create && self.current_state(event_type::CREATE, "").is_none() {
            return Err(RoomError::EventConstruction(format!(
                "room {} has no create event",
                self.room_id
            )));
        }
        if !template.content.is_object() {
            return Err(RoomError::EventConstruction(
                "content must be a JSON object".to_string(),
            ));
        }

        let auth = self.state_needed_for_auth(
            &template.event_type,
            &template.sender,
            template.state_key.as_deref(),
            &template.content,
        );
        let auth_events = auth
            .iter()
            .map(|event| self.version.reference(event))
            .collect::<Result<Vec<_>, _>>()?;
        let prev_events = self
            .forward_extremities
            .iter()
            .map(|id| {
                let event = self
                    .get_event(id)
                    .ok_or_else(|| RoomError::UnknownEvent(id.clone()))?;
                self.version.reference(event)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut proto = Map::new();
        proto.insert("type".into(), json!(template.event_type));
        proto.insert("room_id".into(), json!(self.room_id));
        proto.insert("sender".into(), json!(template.sender));
        proto.insert("content".into(), template.content.clone());
        proto.insert("depth".into(), json!(self.depth + 1));
        proto.insert("prev_events".into(), Value::Array(prev_events));
        proto.insert("auth_events".into(), Value::Array(auth_events));
        if let Some(key) = &template.state_key {
            proto.insert("state_key".into(), json!(key));
        }
        Ok(Value::Object(proto))
    }

    /// Builds, hashes and signs an event authored by the responder itself.
    /// The event is returned, not appended.
    pub fn build_event(
        &self,
        template: &EventTemplate,
        identity: &ServerIdentity,
        now_ms: i64,
    ) -> Result<Event, RoomError> {
        let mut event = self.proto_event(template)?;
        let object = event
            .as_object_mut()
            .ok_or_else(|| RoomError::EventConstruction("proto event is not an object".into()))?;
        object.insert("origin".into(), json!(identity.server_name()));
        object.insert("origin_server_ts".into(), json!(now_ms));
        if self.version.event_id_format() == EventIdFormat::InBand {
            object.insert(
                "event_id".into(),
                json!(format!("${}:{}", uuid::Uuid::new_v4().simple(), identity.server_name())),
            );
        }
        let hash = crate::version::content_hash(&event)?;
        if let Some(object) = event.as_object_mut() {
            object.insert("hashes".into(), json!({ "sha256": hash }));
        }
        sign_event(self.version, identity, &mut event)?;
        self.version.parse_untrusted(&event)
    }
}
