#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-hash** – Canonical payload encoding and hash-chain computation (C1).
//!
//! Produces a byte-stable encoding of any event payload and folds it,
//! together with the previous event's hash and a stable header, into the
//! SHA-256 `event_hash` that links every event in a business chain.
//!
//! ## Canonical form
//!
//! `spec.md` leaves the exact canonical-encoding rules as an open question.
//! This crate settles it: **sorted-key, NFC-normalized, exact-decimal-text
//! JSON**. Object keys are sorted lexicographically at every nesting level;
//! string content is normalized to Unicode NFC before escaping; numbers are
//! rendered using their original textual form (`serde_json`'s
//! `arbitrary_precision` feature is enabled workspace-wide so that e.g.
//! `1.50` round-trips as `1.50`, not `1.5`); a missing optional field and an
//! explicit `null` canonicalize identically, since both are represented as
//! `serde_json::Value::Null` once parsed.

use bos_types::{BusinessId, BranchId, Event, EventStatus, GENESIS};
use serde_json::Value;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Errors raised while canonicalizing a payload or verifying a chain link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    /// The payload contained a value kind the canonical encoder cannot
    /// represent (there currently are none for valid JSON, but NaN/Infinity
    /// floats are rejected here since they have no canonical textual form).
    #[error("cannot canonically encode payload: {0}")]
    Encoding(String),
    /// Recomputing the hash did not match the stored `event_hash`.
    #[error("hash mismatch: expected {expected}, computed {actual}")]
    Mismatch {
        /// The hash recorded on the event.
        expected: String,
        /// The hash recomputed from the event's current contents.
        actual: String,
    },
}

/// Byte separator placed between the canonical payload, the previous hash
/// and the canonical stable header when computing `event_hash`.
const SEPARATOR: &[u8] = b"\x1F"; // ASCII unit separator

/// Produce the canonical byte encoding of a JSON value.
pub fn canonical(value: &Value) -> Result<Vec<u8>, HashError> {
    let mut out = Vec::new();
    encode_value(value, &mut out)?;
    Ok(out)
}

fn encode_value(value: &Value, out: &mut Vec<u8>) -> Result<(), HashError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        Value::Number(n) => {
            let text = n.to_string();
            if text.eq_ignore_ascii_case("nan") || text.to_lowercase().contains("inf") {
                return Err(HashError::Encoding(format!("non-finite number: {text}")));
            }
            out.extend_from_slice(text.as_bytes());
        }
        Value::String(s) => encode_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                encode_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                encode_string(key, out);
                out.push(b':');
                encode_value(&map[*key], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn encode_string(s: &str, out: &mut Vec<u8>) {
    let normalized: String = s.nfc().collect();
    out.push(b'"');
    for ch in normalized.chars() {
        match ch {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

/// The subset of an event's fields that are folded into `event_hash`
/// alongside the payload and previous hash (§4.1).
struct StableHeader<'a> {
    event_id: uuid::Uuid,
    event_type: &'a str,
    event_version: u32,
    business_id: BusinessId,
    branch_id: Option<BranchId>,
    created_at: chrono::DateTime<chrono::Utc>,
    correlation_id: &'a str,
    causation_id: Option<uuid::Uuid>,
    correction_of: Option<uuid::Uuid>,
    status: EventStatus,
}

impl<'a> StableHeader<'a> {
    fn from_event(event: &'a Event) -> Self {
        Self {
            event_id: event.event_id,
            event_type: &event.event_type,
            event_version: event.event_version,
            business_id: event.business_id,
            branch_id: event.branch_id,
            created_at: event.created_at,
            correlation_id: &event.correlation_id,
            causation_id: event.causation_id,
            correction_of: event.correction_of,
            status: event.status,
        }
    }

    fn canonical(&self) -> Result<Vec<u8>, HashError> {
        let value = serde_json::json!({
            "event_id": self.event_id.to_string(),
            "event_type": self.event_type,
            "event_version": self.event_version,
            "business_id": self.business_id.0.to_string(),
            "branch_id": self.branch_id.map(|b| b.0.to_string()),
            "created_at": self.created_at.to_rfc3339(),
            "correlation_id": self.correlation_id,
            "causation_id": self.causation_id.map(|id| id.to_string()),
            "correction_of": self.correction_of.map(|id| id.to_string()),
            "status": self.status,
        });
        canonical(&value)
    }
}

/// Compute `event_hash = SHA256(canonical(payload) || sep || previous_hash
/// || sep || canonical(stable_header))` for `event` given the previous
/// hash in its business chain.
pub fn compute_event_hash(event: &Event) -> Result<String, HashError> {
    let mut hasher = Sha256::new();
    hasher.update(canonical(&event.payload)?);
    hasher.update(SEPARATOR);
    hasher.update(event.previous_event_hash.as_bytes());
    hasher.update(SEPARATOR);
    hasher.update(StableHeader::from_event(event).canonical()?);
    Ok(hex::encode(hasher.finalize()))
}

/// Recompute `event.event_hash` and compare it against the stored value.
pub fn verify_event_hash(event: &Event) -> Result<(), HashError> {
    let actual = compute_event_hash(event)?;
    if actual != event.event_hash {
        return Err(HashError::Mismatch {
            expected: event.event_hash.clone(),
            actual,
        });
    }
    Ok(())
}

/// The genesis previous-hash sentinel, re-exported for convenience.
pub fn genesis() -> &'static str {
    GENESIS
}

#[cfg(test)]
mod tests {
    use super::*;
    use bos_types::{ActorType, BusinessId};
    use uuid::Uuid;

    fn sample_event(previous_hash: &str) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            event_type: "identity.business.bootstrap.v1".into(),
            event_version: 1,
            business_id: BusinessId::new(),
            branch_id: None,
            source_engine: "identity".into(),
            actor_type: ActorType::Human,
            actor_id: "admin".into(),
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
            payload: serde_json::json!({"b": 2, "a": 1}),
            reference: None,
            created_at: chrono::Utc::now(),
            received_at: chrono::Utc::now(),
            status: EventStatus::Final,
            correction_of: None,
            previous_event_hash: previous_hash.to_string(),
            event_hash: String::new(),
        }
    }

    #[test]
    fn canonical_sorts_object_keys() {
        let a = canonical(&serde_json::json!({"b": 1, "a": 2})).unwrap();
        let b = canonical(&serde_json::json!({"a": 2, "b": 1})).unwrap();
        assert_eq!(a, b);
        assert_eq!(String::from_utf8(a).unwrap(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonical_preserves_decimal_text() {
        let v: Value = serde_json::from_str(r#"{"amount": 1.50}"#).unwrap();
        let bytes = canonical(&v).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"amount":1.50}"#);
    }

    #[test]
    fn hash_is_deterministic_and_verifies() {
        let mut event = sample_event(GENESIS);
        event.event_hash = compute_event_hash(&event).unwrap();
        assert!(verify_event_hash(&event).is_ok());

        let recomputed = compute_event_hash(&event).unwrap();
        assert_eq!(event.event_hash, recomputed);
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let mut event = sample_event(GENESIS);
        event.event_hash = compute_event_hash(&event).unwrap();
        event.payload = serde_json::json!({"b": 2, "a": 999});
        assert!(matches!(verify_event_hash(&event), Err(HashError::Mismatch { .. })));
    }

    #[test]
    fn chain_link_changes_hash() {
        let event1 = sample_event(GENESIS);
        let mut event2 = sample_event("some-other-hash");
        event2.event_id = event1.event_id; // same id, different previous hash
        event2.created_at = event1.created_at;
        event2.correlation_id = event1.correlation_id.clone();
        event2.payload = event1.payload.clone();
        event2.event_version = event1.event_version;
        event2.event_type = event1.event_type.clone();
        event2.business_id = event1.business_id;

        let h1 = compute_event_hash(&event1).unwrap();
        let h2 = compute_event_hash(&event2).unwrap();
        assert_ne!(h1, h2);
    }
}
