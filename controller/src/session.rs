//! Session recorder: the append-only, hash-chained audit trail of one run.
//!
//! A recorder is owned by exactly one session and passed by reference to the
//! validation loop. Events are appended in causal order and never mutated.
//! Closing appends a terminal marker; saving writes the log and its summary to
//! the blob store once and returns the same [`StorageReference`] thereafter.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::core::chain::{event_digest, header_digest};
use crate::core::types::{
    Artifact, CaptureResult, EventPayload, SessionEvent, SessionHeader, SessionStatus,
};
use crate::error::ControllerError;
use crate::io::blob_store::BlobStore;
use crate::io::report::render_summary;
use crate::io::session_log::{
    SESSION_LOG_FORMAT, SessionLog, encode_session_log, session_log_key, summary_key,
};

/// Where a saved session can be found for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageReference {
    pub session_id: String,
    pub log_key: String,
    pub summary_key: String,
    /// Digest of the last event; pins the exact log content.
    pub head_digest: String,
    pub event_count: usize,
}

/// Append-only recorder for one session.
pub struct SessionRecorder {
    header: SessionHeader,
    events: Vec<SessionEvent>,
    artifacts: Vec<Artifact>,
    closed: Option<(SessionStatus, DateTime<Utc>)>,
    saved: Option<StorageReference>,
    store: Arc<dyn BlobStore>,
}

impl SessionRecorder {
    /// Open a new session with a fresh id.
    pub fn start(
        target: impl Into<String>,
        goal: impl Into<String>,
        expectation: impl Into<String>,
        max_attempts: u32,
        store: Arc<dyn BlobStore>,
    ) -> Self {
        let header = SessionHeader {
            id: Uuid::new_v4().to_string(),
            target: target.into(),
            goal: goal.into(),
            expectation: expectation.into(),
            max_attempts,
            started_at: Utc::now(),
        };
        debug!(session_id = %header.id, "session started");
        Self {
            header,
            events: Vec::new(),
            artifacts: Vec::new(),
            closed: None,
            saved: None,
            store,
        }
    }

    pub fn id(&self) -> &str {
        &self.header.id
    }

    pub fn header(&self) -> &SessionHeader {
        &self.header
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Terminal status, once closed.
    pub fn status(&self) -> Option<SessionStatus> {
        self.closed.map(|(status, _)| status)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Append one event. Fails once the session is closed.
    pub fn record(
        &mut self,
        attempt: u32,
        label: impl Into<String>,
        payload: EventPayload,
    ) -> Result<&SessionEvent> {
        if matches!(payload, EventPayload::Closed { .. }) {
            bail!("closed markers are appended by close()");
        }
        self.append(attempt, label.into(), payload)
    }

    /// Close the session with a terminal `status`. `reason` is recorded on the
    /// closing marker.
    pub fn close(&mut self, attempt: u32, status: SessionStatus, reason: &str) -> Result<()> {
        self.append(attempt, reason.to_string(), EventPayload::Closed { status })?;
        self.closed = Some((status, Utc::now()));
        info!(session_id = %self.header.id, %status, events = self.events.len(), "session closed");
        Ok(())
    }

    fn append(&mut self, attempt: u32, label: String, payload: EventPayload) -> Result<&SessionEvent> {
        if self.closed.is_some() {
            return Err(ControllerError::SessionClosed {
                session_id: self.header.id.clone(),
            }
            .into());
        }
        let seq = self.events.len() as u64 + 1;
        let at = Utc::now();
        let prev_digest = match self.events.last() {
            Some(last) => last.digest.clone(),
            None => header_digest(&self.header).context("digest session header")?,
        };
        let digest = event_digest(&prev_digest, seq, attempt, &at, &label, &payload)
            .context("digest session event")?;
        if let EventPayload::Capture {
            result: CaptureResult::Captured { artifact },
        } = &payload
        {
            self.artifacts.push(artifact.clone());
        }
        debug!(seq, attempt, kind = ?payload.kind(), %label, "event recorded");
        self.events.push(SessionEvent {
            seq,
            attempt,
            at,
            label,
            payload,
            prev_digest,
            digest,
        });
        Ok(&self.events[self.events.len() - 1])
    }

    /// Snapshot of the closed session in its saved form.
    pub fn to_log(&self) -> Option<SessionLog> {
        let (status, closed_at) = self.closed?;
        let head_digest = self.events.last()?.digest.clone();
        Some(SessionLog {
            format: SESSION_LOG_FORMAT,
            session: self.header.clone(),
            status,
            closed_at,
            head_digest,
            events: self.events.clone(),
            artifacts: self.artifacts.clone(),
        })
    }

    /// Persist the closed session and return its storage reference.
    ///
    /// Idempotent: after the first successful save the cached reference is
    /// returned and nothing is written again.
    #[instrument(skip_all, fields(session_id = %self.header.id))]
    pub fn save(&mut self) -> Result<StorageReference> {
        if let Some(saved) = &self.saved {
            debug!("session already saved");
            return Ok(saved.clone());
        }
        let log = self.to_log().ok_or_else(|| ControllerError::SessionOpen {
            session_id: self.header.id.clone(),
        })?;

        for artifact in &log.artifacts {
            if !self.store.exists(&artifact.digest)? {
                return Err(anyhow!(
                    "artifact #{} ({}) is missing from the blob store",
                    artifact.seq,
                    artifact.digest
                ));
            }
        }

        let log_key = session_log_key(&log.session.id);
        let summary_key = summary_key(&log.session.id);
        self.store
            .put_document(&log_key, &encode_session_log(&log)?)
            .with_context(|| format!("write {log_key}"))?;
        self.store
            .put_document(&summary_key, render_summary(&log)?.as_bytes())
            .with_context(|| format!("write {summary_key}"))?;

        let reference = StorageReference {
            session_id: log.session.id.clone(),
            log_key,
            summary_key,
            head_digest: log.head_digest.clone(),
            event_count: log.events.len(),
        };
        info!(key = %reference.log_key, events = reference.event_count, "session saved");
        self.saved = Some(reference.clone());
        Ok(reference)
    }

    /// Close with `status` and save. Used on every terminal path of the loop.
    pub fn finish(
        &mut self,
        attempt: u32,
        status: SessionStatus,
        reason: &str,
    ) -> Result<StorageReference> {
        self.close(attempt, status, reason)?;
        self.save()
    }
}
