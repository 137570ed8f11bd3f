//! Saved session logs: encoding, schema-checked loading, and audit checks.
//!
//! A saved log lives at `sessions/<id>/session.json` in the blob store and is
//! read-only after it is written. Audit tools use [`load_session_log`] and
//! [`verify_session_log`]; neither mutates the store.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::chain::{head_digest, header_digest, verify_chain};
use crate::core::invariants::check_event_invariants;
use crate::core::types::{
    Artifact, CaptureResult, EventPayload, SessionEvent, SessionHeader, SessionStatus,
};
use crate::io::blob_store::BlobStore;

const SESSION_LOG_SCHEMA: &str = include_str!("../../schemas/session_log.schema.json");

/// Current on-disk format version.
pub const SESSION_LOG_FORMAT: u32 = 1;

/// Serialized form of a closed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLog {
    pub format: u32,
    pub session: SessionHeader,
    pub status: SessionStatus,
    pub closed_at: DateTime<Utc>,
    pub head_digest: String,
    pub events: Vec<SessionEvent>,
    pub artifacts: Vec<Artifact>,
}

/// Store key of the event log for `session_id`.
pub fn session_log_key(session_id: &str) -> String {
    format!("sessions/{session_id}/session.json")
}

/// Store key of the human-readable summary for `session_id`.
pub fn summary_key(session_id: &str) -> String {
    format!("sessions/{session_id}/summary.md")
}

/// Pretty JSON with a trailing newline, stable across runs for the same log.
pub fn encode_session_log(log: &SessionLog) -> Result<Vec<u8>> {
    let mut buf = serde_json::to_string_pretty(log).context("serialize session log")?;
    buf.push('\n');
    Ok(buf.into_bytes())
}

/// Parse a session log after validating it against the bundled schema.
pub fn parse_session_log(raw: &str) -> Result<SessionLog> {
    let instance: Value = serde_json::from_str(raw).context("parse session log json")?;
    let schema: Value =
        serde_json::from_str(SESSION_LOG_SCHEMA).context("parse session log schema")?;
    validate_schema(&instance, &schema)?;
    let log: SessionLog =
        serde_json::from_value(instance).context("parse session log as v1 struct")?;
    Ok(log)
}

/// Read and parse the saved log for `session_id`.
///
/// Fails if the log names a different session than the key it was stored
/// under.
pub fn load_session_log(store: &dyn BlobStore, session_id: &str) -> Result<SessionLog> {
    let key = session_log_key(session_id);
    debug!(%key, "loading session log");
    let bytes = store.get_document(&key)?;
    let raw = String::from_utf8(bytes).with_context(|| format!("decode {key} as utf-8"))?;
    let log = parse_session_log(&raw).with_context(|| format!("load {key}"))?;
    if log.session.id != session_id {
        bail!(
            "{key} records session '{}', expected '{session_id}'",
            log.session.id
        );
    }
    Ok(log)
}

/// Validate JSON instance against a JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

/// Audit a parsed log. Returns every problem found; empty means intact.
///
/// Checks the hash chain from the session header onwards, the head digest,
/// the ordering invariants, the closing marker, and that the artifact list
/// matches the capture events.
pub fn verify_session_log(log: &SessionLog) -> Vec<String> {
    let genesis = match header_digest(&log.session) {
        Ok(digest) => digest,
        Err(err) => return vec![format!("cannot encode session header: {err}")],
    };
    let mut errors = verify_chain(&log.events, &genesis);
    if head_digest(&log.events, &genesis) != log.head_digest {
        errors.push("head_digest does not match last event".to_string());
    }
    errors.extend(check_event_invariants(
        &log.events,
        log.session.max_attempts,
    ));

    match log.events.last().map(|event| &event.payload) {
        Some(EventPayload::Closed { status }) if *status == log.status => {}
        Some(EventPayload::Closed { status }) => errors.push(format!(
            "closed marker says {status}, header says {}",
            log.status
        )),
        _ => errors.push("log does not end with a closed marker".to_string()),
    }

    let captured: Vec<&Artifact> = log
        .events
        .iter()
        .filter_map(|event| match &event.payload {
            EventPayload::Capture {
                result: CaptureResult::Captured { artifact },
            } => Some(artifact),
            _ => None,
        })
        .collect();
    if captured.len() != log.artifacts.len()
        || captured.iter().zip(&log.artifacts).any(|(a, b)| *a != b)
    {
        errors.push("artifact list does not match capture events".to_string());
    }
    errors
}

/// Digests referenced by `log` that are missing from `store`.
pub fn missing_artifacts(log: &SessionLog, store: &dyn BlobStore) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for artifact in &log.artifacts {
        if !store.exists(&artifact.digest)? {
            missing.push(artifact.digest.clone());
        }
    }
    Ok(missing)
}
