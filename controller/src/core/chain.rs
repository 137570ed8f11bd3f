//! Hash chain over session events.
//!
//! Each event digest covers the previous digest and the canonical JSON of the
//! event body, so any edit, insertion, removal, or reordering of a saved log
//! changes every digest that follows it. The first event links to the digest
//! of the session header, which pins the target, goal and attempt bound.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::types::{EventPayload, SessionEvent, SessionHeader};

/// `prev_digest` of the first event of the session described by `header`.
pub fn header_digest(header: &SessionHeader) -> Result<String, serde_json::Error> {
    let body = serde_json::to_vec(header)?;
    Ok(hex::encode(Sha256::digest(&body)))
}

/// Fields of an event covered by its digest.
#[derive(Serialize)]
struct EventBody<'a> {
    seq: u64,
    attempt: u32,
    at: &'a DateTime<Utc>,
    label: &'a str,
    payload: &'a EventPayload,
}

/// Compute the chained digest for an event body.
pub fn event_digest(
    prev_digest: &str,
    seq: u64,
    attempt: u32,
    at: &DateTime<Utc>,
    label: &str,
    payload: &EventPayload,
) -> Result<String, serde_json::Error> {
    let body = serde_json::to_vec(&EventBody {
        seq,
        attempt,
        at,
        label,
        payload,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(prev_digest.as_bytes());
    hasher.update(&body);
    Ok(hex::encode(hasher.finalize()))
}

/// Recompute the chain for `events` starting from `genesis`, returning one
/// message per broken link.
///
/// An empty list means every `seq`, `prev_digest`, and `digest` is consistent.
pub fn verify_chain(events: &[SessionEvent], genesis: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let mut prev = genesis.to_string();
    for (index, event) in events.iter().enumerate() {
        let expected_seq = index as u64 + 1;
        if event.seq != expected_seq {
            errors.push(format!(
                "event {expected_seq}: seq is {} (expected {expected_seq})",
                event.seq
            ));
        }
        if event.prev_digest != prev {
            errors.push(format!("event {}: prev_digest does not match chain", event.seq));
        }
        match event_digest(
            &event.prev_digest,
            event.seq,
            event.attempt,
            &event.at,
            &event.label,
            &event.payload,
        ) {
            Ok(digest) if digest == event.digest => {}
            Ok(_) => errors.push(format!("event {}: digest mismatch", event.seq)),
            Err(err) => errors.push(format!("event {}: cannot encode body: {err}", event.seq)),
        }
        prev = event.digest.clone();
    }
    errors
}

/// Digest of the last event, or `genesis` for an empty log.
pub fn head_digest<'a>(events: &'a [SessionEvent], genesis: &'a str) -> &'a str {
    events.last().map_or(genesis, |event| event.digest.as_str())
}
