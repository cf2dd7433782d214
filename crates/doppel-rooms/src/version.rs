//! Room-version rule sets.
//!
//! Each supported version tag maps to a [`RoomVersionRules`] implementation
//! through [`room_version`]. The rules decide how event IDs are derived, how
//! `prev_events`/`auth_events` references are encoded, and which keys survive
//! redaction.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use doppel_identity::{canonical_json, encode_base64, encode_base64_url};
use doppel_types::event_type;

use crate::error::RoomError;
use crate::event::Event;

/// The version used for rooms declared without an explicit one.
pub const DEFAULT_ROOM_VERSION: &str = "10";

/// How an event's ID is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventIdFormat {
    /// Carried in the event as `event_id` (`$opaque:server`).
    InBand,
    /// `$` + unpadded standard base64 of the reference hash.
    StandardHash,
    /// `$` + unpadded URL-safe base64 of the reference hash.
    UrlSafeHash,
}

/// Version-dependent differences in the redaction algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RedactionRules {
    /// `m.room.aliases` keeps its `aliases` key.
    pub keeps_aliases: bool,
    /// `m.room.join_rules` keeps `allow`.
    pub keeps_join_rule_allow: bool,
    /// `m.room.member` keeps `join_authorised_via_users_server`.
    pub keeps_join_authorised_via: bool,
    /// Version 11 redaction: full create content, `invite` power level,
    /// `redacts` in content, and no `origin`/`membership`/`prev_state`.
    pub v11: bool,
}

/// Event-handling rules selected by a room's version tag.
pub trait RoomVersionRules: Send + Sync + std::fmt::Debug {
    /// The version tag, e.g. `"10"`.
    fn id(&self) -> &'static str;

    fn event_id_format(&self) -> EventIdFormat;

    fn redaction(&self) -> RedactionRules;

    /// Derives the ID of an event in wire format.
    fn event_id(&self, event: &Value) -> Result<String, RoomError>;

    /// Encodes a reference to `event` for `prev_events` / `auth_events`.
    fn reference(&self, event: &Event) -> Result<Value, RoomError>;

    /// Extracts the referenced event IDs from a `prev_events` /
    /// `auth_events` value.
    fn parse_references(&self, field: &str, value: Option<&Value>) -> Result<Vec<String>, RoomError>;

    /// Strips everything the version does not preserve under redaction.
    fn redact(&self, event: &Value) -> Value {
        redact(self.redaction(), event)
    }

    /// Parses an event received from a peer.
    ///
    /// An event whose `hashes.sha256` does not match its content is redacted
    /// and then accepted, as the protocol requires.
    fn parse_untrusted(&self, json: &Value) -> Result<Event, RoomError> {
        let object = json
            .as_object()
            .ok_or_else(|| RoomError::InvalidEvent("event is not a JSON object".to_string()))?;
        let mut wire = object.clone();
        if self.event_id_format() != EventIdFormat::InBand {
            wire.remove("event_id");
        }
        let mut wire = Value::Object(wire);

        let expected = content_hash(&wire)?;
        let claimed = wire.pointer("/hashes/sha256").and_then(Value::as_str);
        if claimed != Some(expected.as_str()) {
            tracing::warn!(
                room_version = self.id(),
                "event content hash mismatch, accepting redacted form"
            );
            wire = self.redact(&wire);
        }

        let event_id = self.event_id(&wire)?;
        Event::from_wire(event_id, self.id(), self, wire)
    }
}

/// Versions 1 and 2: IDs are chosen by the sending server.
#[derive(Debug)]
pub struct InBandIdRules {
    id: &'static str,
    redaction: RedactionRules,
}

/// Version 3 onwards: IDs are derived from the event's reference hash.
#[derive(Debug)]
pub struct HashedIdRules {
    id: &'static str,
    url_safe: bool,
    redaction: RedactionRules,
}

impl RoomVersionRules for InBandIdRules {
    fn id(&self) -> &'static str {
        self.id
    }

    fn event_id_format(&self) -> EventIdFormat {
        EventIdFormat::InBand
    }

    fn redaction(&self) -> RedactionRules {
        self.redaction
    }

    fn event_id(&self, event: &Value) -> Result<String, RoomError> {
        event
            .get("event_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RoomError::InvalidEvent("missing event_id".to_string()))
    }

    fn reference(&self, event: &Event) -> Result<Value, RoomError> {
        let hash = reference_hash(self, event.json())?;
        Ok(json!([event.event_id(), { "sha256": encode_base64(&hash) }]))
    }

    fn parse_references(&self, field: &str, value: Option<&Value>) -> Result<Vec<String>, RoomError> {
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        let items = value
            .as_array()
            .ok_or_else(|| RoomError::InvalidEvent(format!("{field} is not an array")))?;
        items
            .iter()
            .map(|item| {
                item.get(0)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        RoomError::InvalidEvent(format!("{field} entry is not an [id, hashes] pair"))
                    })
            })
            .collect()
    }
}

impl RoomVersionRules for HashedIdRules {
    fn id(&self) -> &'static str {
        self.id
    }

    fn event_id_format(&self) -> EventIdFormat {
        if self.url_safe {
            EventIdFormat::UrlSafeHash
        } else {
            EventIdFormat::StandardHash
        }
    }

    fn redaction(&self) -> RedactionRules {
        self.redaction
    }

    fn event_id(&self, event: &Value) -> Result<String, RoomError> {
        let hash = reference_hash(self, event)?;
        let encoded = if self.url_safe {
            encode_base64_url(&hash)
        } else {
            encode_base64(&hash)
        };
        Ok(format!("${encoded}"))
    }

    fn reference(&self, event: &Event) -> Result<Value, RoomError> {
        Ok(Value::String(event.event_id().to_string()))
    }

    fn parse_references(&self, field: &str, value: Option<&Value>) -> Result<Vec<String>, RoomError> {
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        let items = value
            .as_array()
            .ok_or_else(|| RoomError::InvalidEvent(format!("{field} is not an array")))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| RoomError::InvalidEvent(format!("{field} entry is not a string")))
            })
            .collect()
    }
}

const LEGACY: RedactionRules = RedactionRules {
    keeps_aliases: true,
    keeps_join_rule_allow: false,
    keeps_join_authorised_via: false,
    v11: false,
};
const NO_ALIASES: RedactionRules = RedactionRules {
    keeps_aliases: false,
    ..LEGACY
};
const RESTRICTED: RedactionRules = RedactionRules {
    keeps_join_rule_allow: true,
    ..NO_ALIASES
};
const AUTHORISED_VIA: RedactionRules = RedactionRules {
    keeps_join_authorised_via: true,
    ..RESTRICTED
};
const V11: RedactionRules = RedactionRules {
    v11: true,
    ..AUTHORISED_VIA
};

static V1: InBandIdRules = InBandIdRules { id: "1", redaction: LEGACY };
static V2: InBandIdRules = InBandIdRules { id: "2", redaction: LEGACY };
static V3: HashedIdRules = HashedIdRules { id: "3", url_safe: false, redaction: LEGACY };
static V4: HashedIdRules = HashedIdRules { id: "4", url_safe: true, redaction: LEGACY };
static V5: HashedIdRules = HashedIdRules { id: "5", url_safe: true, redaction: LEGACY };
static V6: HashedIdRules = HashedIdRules { id: "6", url_safe: true, redaction: NO_ALIASES };
static V7: HashedIdRules = HashedIdRules { id: "7", url_safe: true, redaction: NO_ALIASES };
static V8: HashedIdRules = HashedIdRules { id: "8", url_safe: true, redaction: RESTRICTED };
static V9: HashedIdRules = HashedIdRules { id: "9", url_safe: true, redaction: AUTHORISED_VIA };
static V10: HashedIdRules = HashedIdRules { id: "10", url_safe: true, redaction: AUTHORISED_VIA };
static V11_RULES: HashedIdRules = HashedIdRules { id: "11", url_safe: true, redaction: V11 };

static SUPPORTED: [&(dyn RoomVersionRules); 11] = [
    &V1, &V2, &V3, &V4, &V5, &V6, &V7, &V8, &V9, &V10, &V11_RULES,
];

/// Looks up the rules for a version tag.
pub fn room_version(id: &str) -> Option<&'static dyn RoomVersionRules> {
    SUPPORTED.iter().copied().find(|rules| rules.id() == id)
}

/// Looks up the rules for a version tag, failing on unknown tags.
pub fn require_room_version(id: &str) -> Result<&'static dyn RoomVersionRules, RoomError> {
    room_version(id).ok_or_else(|| RoomError::UnsupportedVersion(id.to_string()))
}

/// All supported version tags, oldest first.
pub fn supported_versions() -> impl Iterator<Item = &'static str> {
    SUPPORTED.iter().map(|rules| rules.id())
}

/// SHA-256 over the event with `unsigned`, `signatures` and `hashes`
/// removed, as unpadded standard base64.
pub fn content_hash(event: &Value) -> Result<String, RoomError> {
    let mut stripped = event
        .as_object()
        .ok_or_else(|| RoomError::InvalidEvent("event is not a JSON object".to_string()))?
        .clone();
    stripped.remove("unsigned");
    stripped.remove("signatures");
    stripped.remove("hashes");
    let digest = Sha256::digest(canonical_json(&Value::Object(stripped))?);
    Ok(encode_base64(&digest))
}

/// SHA-256 over the redacted event without signatures.
pub fn reference_hash(rules: &(impl RoomVersionRules + ?Sized), event: &Value) -> Result<Vec<u8>, RoomError> {
    let mut redacted = rules.redact(event);
    if let Some(object) = redacted.as_object_mut() {
        object.remove("signatures");
        object.remove("unsigned");
        if rules.event_id_format() != EventIdFormat::InBand {
            object.remove("event_id");
        }
    }
    Ok(Sha256::digest(canonical_json(&redacted)?).to_vec())
}

const ESSENTIAL_KEYS: &[&str] = &[
    "event_id",
    "type",
    "room_id",
    "sender",
    "state_key",
    "hashes",
    "signatures",
    "depth",
    "prev_events",
    "auth_events",
    "origin_server_ts",
];

const PRE_V11_KEYS: &[&str] = &["origin", "membership", "prev_state"];

const POWER_LEVEL_KEYS: &[&str] = &[
    "ban",
    "events",
    "events_default",
    "kick",
    "redact",
    "state_default",
    "users",
    "users_default",
];

/// Applies the redaction algorithm described by `rules`.
pub fn redact(rules: RedactionRules, event: &Value) -> Value {
    let Some(object) = event.as_object() else {
        return event.clone();
    };

    let mut out = Map::new();
    let keep = |out: &mut Map<String, Value>, key: &str| {
        if let Some(value) = object.get(key) {
            out.insert(key.to_string(), value.clone());
        }
    };
    for key in ESSENTIAL_KEYS {
        keep(&mut out, key);
    }
    if !rules.v11 {
        for key in PRE_V11_KEYS {
            keep(&mut out, key);
        }
    }

    let event_type = object.get("type").and_then(Value::as_str).unwrap_or_default();
    let content = object
        .get("content")
        .and_then(Value::as_object)
        .map(|content| redact_content(rules, event_type, content))
        .unwrap_or_default();
    out.insert("content".to_string(), Value::Object(content));
    Value::Object(out)
}

fn redact_content(rules: RedactionRules, kind: &str, content: &Map<String, Value>) -> Map<String, Value> {
    let mut kept: Vec<&str> = Vec::new();
    match kind {
        event_type::MEMBER => {
            kept.push("membership");
            if rules.keeps_join_authorised_via {
                kept.push("join_authorised_via_users_server");
            }
        }
        event_type::CREATE => {
            if rules.v11 {
                return content.clone();
            }
            kept.push("creator");
        }
        event_type::JOIN_RULES => {
            kept.push("join_rule");
            if rules.keeps_join_rule_allow {
                kept.push("allow");
            }
        }
        event_type::POWER_LEVELS => {
            kept.extend_from_slice(POWER_LEVEL_KEYS);
            if rules.v11 {
                kept.push("invite");
            }
        }
        event_type::HISTORY_VISIBILITY => kept.push("history_visibility"),
        "m.room.aliases" if rules.keeps_aliases => kept.push("aliases"),
        "m.room.redaction" if rules.v11 => kept.push("redacts"),
        _ => {}
    }

    let mut out: Map<String, Value> = kept
        .into_iter()
        .filter_map(|key| content.get(key).map(|v| (key.to_string(), v.clone())))
        .collect();

    if rules.v11 && kind == event_type::MEMBER {
        if let Some(signed) = content.get("third_party_invite").and_then(|t| t.get("signed")) {
            out.insert("third_party_invite".to_string(), json!({ "signed": signed }));
        }
    }
    out
}
