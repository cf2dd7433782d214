//! Parsed, immutable room events.

use serde_json::{Map, Value};

use doppel_identity::{signing::insert_signature, ServerIdentity};
use doppel_types::{event_type, Membership};

use crate::error::RoomError;
use crate::version::RoomVersionRules;

/// A room event (PDU) accepted under a room version's rules.
///
/// The wire JSON is kept verbatim and is what gets served back to peers;
/// the other fields are read out of it once at parse time.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    event_id: String,
    room_version: &'static str,
    room_id: String,
    sender: String,
    event_type: String,
    state_key: Option<String>,
    content: Value,
    prev_events: Vec<String>,
    auth_events: Vec<String>,
    depth: i64,
    json: Value,
}

fn required_str(object: &Map<String, Value>, key: &str) -> Result<String, RoomError> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RoomError::InvalidEvent(format!("missing or non-string {key}")))
}

impl Event {
    pub(crate) fn from_wire(
        event_id: String,
        room_version: &'static str,
        rules: &(impl RoomVersionRules + ?Sized),
        json: Value,
    ) -> Result<Self, RoomError> {
        let object = json
            .as_object()
            .ok_or_else(|| RoomError::InvalidEvent("event is not a JSON object".to_string()))?;

        let state_key = match object.get("state_key") {
            None => None,
            Some(Value::String(key)) => Some(key.clone()),
            Some(_) => return Err(RoomError::InvalidEvent("state_key is not a string".to_string())),
        };
        let content = match object.get("content") {
            None => Value::Object(Map::new()),
            Some(content @ Value::Object(_)) => content.clone(),
            Some(_) => return Err(RoomError::InvalidEvent("content is not an object".to_string())),
        };
        let depth = match object.get("depth") {
            None => 0,
            Some(depth) => depth
                .as_i64()
                .ok_or_else(|| RoomError::InvalidEvent("depth is not an integer".to_string()))?,
        };

        Ok(Self {
            room_id: required_str(object, "room_id")?,
            sender: required_str(object, "sender")?,
            event_type: required_str(object, "type")?,
            prev_events: rules.parse_references("prev_events", object.get("prev_events"))?,
            auth_events: rules.parse_references("auth_events", object.get("auth_events"))?,
            state_key,
            content,
            depth,
            event_id,
            room_version,
            json,
        })
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn room_version(&self) -> &'static str {
        self.room_version
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn state_key(&self) -> Option<&str> {
        self.state_key.as_deref()
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn prev_events(&self) -> &[String] {
        &self.prev_events
    }

    pub fn auth_events(&self) -> &[String] {
        &self.auth_events
    }

    pub fn depth(&self) -> i64 {
        self.depth
    }

    /// The event as it travels on the wire.
    pub fn json(&self) -> &Value {
        &self.json
    }

    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// The `(type, state_key)` pair this event sets, if it is a state event.
    pub fn state_tuple(&self) -> Option<(&str, &str)> {
        self.state_key.as_deref().map(|key| (self.event_type.as_str(), key))
    }

    /// The membership value of an `m.room.member` event.
    pub fn membership(&self) -> Option<Membership> {
        if self.event_type != event_type::MEMBER {
            return None;
        }
        self.content.get("membership")?.as_str()?.parse().ok()
    }
}

/// Adds `identity`'s signature to an event.
///
/// Event signatures cover the redacted form, so they survive redaction.
pub fn sign_event(
    rules: &dyn RoomVersionRules,
    identity: &ServerIdentity,
    event: &mut Value,
) -> Result<(), RoomError> {
    let mut redacted = rules.redact(event);
    identity.sign_json(&mut redacted)?;
    let signature = redacted
        .pointer(&format!(
            "/signatures/{}/{}",
            escape_pointer(identity.server_name()),
            escape_pointer(identity.key_id())
        ))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RoomError::EventConstruction("signature was not recorded".to_string()))?;
    insert_signature(event, identity.server_name(), identity.key_id(), signature)?;
    Ok(())
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::room_version;
    use doppel_identity::{verify_json, DEFAULT_KEY_ID};
    use serde_json::json;

    fn wire(room_version_id: &str) -> Value {
        let mut event = json!({
            "type": "m.room.member",
            "room_id": "!r:remote",
            "sender": "@bob:remote",
            "state_key": "@bob:remote",
            "origin_server_ts": 1,
            "depth": 4,
            "prev_events": ["$p"],
            "auth_events": ["$a1", "$a2"],
            "content": { "membership": "join" },
        });
        if room_version_id == "1" {
            event["event_id"] = json!("$legacy:remote");
            event["prev_events"] = json!([["$p", {}]]);
            event["auth_events"] = json!([["$a1", {}], ["$a2", {}]]);
        }
        let hash = crate::version::content_hash(&event).unwrap();
        event["hashes"] = json!({ "sha256": hash });
        event
    }

    #[test]
    fn parses_fields() {
        let event = room_version("10").unwrap().parse_untrusted(&wire("10")).unwrap();
        assert_eq!(event.room_id(), "!r:remote");
        assert_eq!(event.sender(), "@bob:remote");
        assert_eq!(event.state_tuple(), Some(("m.room.member", "@bob:remote")));
        assert_eq!(event.prev_events(), ["$p"]);
        assert_eq!(event.auth_events(), ["$a1", "$a2"]);
        assert_eq!(event.depth(), 4);
        assert_eq!(event.membership(), Some(Membership::Join));
        assert_eq!(event.room_version(), "10");
        assert!(event.event_id().starts_with('$'));
    }

    #[test]
    fn legacy_versions_use_in_band_ids() {
        let event = room_version("1").unwrap().parse_untrusted(&wire("1")).unwrap();
        assert_eq!(event.event_id(), "$legacy:remote");
        assert_eq!(event.auth_events(), ["$a1", "$a2"]);
    }

    #[test]
    fn claimed_event_id_is_ignored_for_hashed_versions() {
        let rules = room_version("10").unwrap();
        let mut claimed = wire("10");
        claimed["event_id"] = json!("$forged");
        let event = rules.parse_untrusted(&claimed).unwrap();
        assert_ne!(event.event_id(), "$forged");
        assert!(event.json().get("event_id").is_none());
    }

    #[test]
    fn hash_mismatch_redacts_content() {
        let mut tampered = wire("10");
        tampered["content"]["displayname"] = json!("Mallory");
        let event = room_version("10").unwrap().parse_untrusted(&tampered).unwrap();
        assert_eq!(event.content(), &json!({ "membership": "join" }));
    }

    #[test]
    fn missing_room_id_is_invalid() {
        let mut event = wire("10");
        event.as_object_mut().unwrap().remove("room_id");
        assert!(matches!(
            room_version("10").unwrap().parse_untrusted(&event),
            Err(RoomError::InvalidEvent(_))
        ));
        assert!(room_version("10").unwrap().parse_untrusted(&json!("str")).is_err());
    }

    #[test]
    fn non_string_state_key_is_invalid() {
        let mut event = wire("10");
        event["state_key"] = json!(5);
        assert!(room_version("10").unwrap().parse_untrusted(&event).is_err());
    }

    #[test]
    fn signatures_cover_redacted_form() {
        let rules = room_version("10").unwrap();
        let identity = ServerIdentity::generate("hs1", DEFAULT_KEY_ID);
        let mut event = wire("10");
        event["content"]["displayname"] = json!("Bob");
        sign_event(rules, &identity, &mut event).unwrap();

        let redacted = rules.redact(&event);
        verify_json("hs1", DEFAULT_KEY_ID, &identity.verifying_key(), &redacted).unwrap();
    }
}
