//! Canonical JSON and the unpadded base64 used on the wire.
//!
//! Canonical form: object keys sorted by code point, no insignificant
//! whitespace, strings escaped as by `serde_json`. Key order is enforced
//! here rather than relying on the map type behind `serde_json::Value`.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::Value;

use crate::error::IdentityError;

/// Encodes a value as canonical JSON bytes.
pub fn canonical_json(value: &Value) -> Result<Vec<u8>, IdentityError> {
    let mut out = Vec::with_capacity(256);
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), IdentityError> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(&map[key], out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

/// Encodes bytes as unpadded standard base64.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD_NO_PAD.encode(bytes)
}

/// Encodes bytes as unpadded URL-safe base64.
pub fn encode_base64_url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes base64 in either alphabet, with or without padding.
pub fn decode_base64(input: &str) -> Result<Vec<u8>, IdentityError> {
    let trimmed = input.trim_end_matches('=');
    STANDARD_NO_PAD
        .decode(trimmed)
        .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed))
        .map_err(|e| IdentityError::Base64(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_recursively() {
        let value = json!({ "b": 1, "a": { "d": [true, null], "c": "x" } });
        let bytes = canonical_json(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"c":"x","d":[true,null]},"b":1}"#
        );
    }

    #[test]
    fn non_ascii_is_kept_verbatim() {
        let bytes = canonical_json(&json!({ "one": "日本語" })).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"one":"日本語"}"#);
    }

    #[test]
    fn decode_accepts_both_alphabets_and_padding() {
        let raw = [0xfbu8, 0xff, 0x01];
        assert_eq!(decode_base64(&encode_base64(&raw)).unwrap(), raw);
        assert_eq!(decode_base64(&encode_base64_url(&raw)).unwrap(), raw);
        assert_eq!(decode_base64("+/8B").unwrap(), raw);
        assert_eq!(decode_base64("AQ==").unwrap(), vec![1u8]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_base64("not base64!"),
            Err(IdentityError::Base64(_))
        ));
    }
}
