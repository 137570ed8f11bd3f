//! Shared deterministic types for controller core logic.
//!
//! These types define the stable contracts between the validation loop, its
//! collaborators, and the session log. They do no I/O.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

/// Key names accepted by [`Action::KeyPress`]: a keysym, optionally chorded
/// with modifiers (`ctrl+shift+s`).
static KEY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+(\+[A-Za-z0-9_]+)*$").expect("key name regex should be valid")
});

/// A single discrete input action against the focused target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    PointerClick { x: i32, y: i32 },
    KeyPress { key: String },
}

impl Action {
    pub fn pointer_click(x: i32, y: i32) -> Self {
        Self::PointerClick { x, y }
    }

    pub fn key_press(key: impl Into<String>) -> Self {
        Self::KeyPress { key: key.into() }
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        match self {
            Self::PointerClick { .. } => Ok(()),
            Self::KeyPress { key } if KEY_NAME.is_match(key) => Ok(()),
            Self::KeyPress { key } => Err(ControllerError::InvalidAction(format!(
                "unsupported key name '{key}'"
            ))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PointerClick { x, y } => write!(f, "pointer_click({x},{y})"),
            Self::KeyPress { key } => write!(f, "key_press({key})"),
        }
    }
}

/// An action together with its mandatory reason.
///
/// The reason is persisted verbatim and handed to the match predicate as the
/// intent behind the expected change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: Action,
    pub reason: String,
}

impl ActionRequest {
    pub fn new(action: Action, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.reason.trim().is_empty() {
            return Err(ControllerError::InvalidAction(format!(
                "{} is missing a reason",
                self.action
            )));
        }
        self.action.validate()
    }
}

/// Terminal status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Success,
    Exhausted,
    FocusFailure,
    Aborted,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Exhausted => "exhausted",
            Self::FocusFailure => "focus_failure",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one validation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub id: String,
    /// Target application the focus gate guards.
    pub target: String,
    /// Goal label shared by every attempt of the run.
    pub goal: String,
    /// Expected visual outcome handed to the match predicate.
    pub expectation: String,
    pub max_attempts: u32,
    pub started_at: DateTime<Utc>,
}

/// Judgment returned by the match predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub matched: bool,
    pub rationale: String,
}

impl Verdict {
    pub fn matched(rationale: impl Into<String>) -> Self {
        Self {
            matched: true,
            rationale: rationale.into(),
        }
    }

    pub fn mismatch(rationale: impl Into<String>) -> Self {
        Self {
            matched: false,
            rationale: rationale.into(),
        }
    }
}

/// Immutable reference to a captured screenshot.
///
/// The bytes live in the blob store under `digest`; the session only keeps
/// this reference. `seq` is unique per capture service, so two captures with
/// the same label stay distinguishable even when their bytes are identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub seq: u32,
    pub label: String,
    pub captured_at: DateTime<Utc>,
    pub digest: String,
    pub size_bytes: u64,
}

/// Result payload of a capture event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaptureResult {
    Captured { artifact: Artifact },
    Failed { error: String },
}

/// Result payload of an action event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionResult {
    Performed,
    Failed { error: String },
}

/// Kind discriminant for [`EventPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FocusCheck,
    Capture,
    Action,
    Evaluation,
    Closed,
}

/// Typed result payload carried by each session event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    FocusCheck {
        focused: bool,
        detail: Option<String>,
    },
    Capture {
        result: CaptureResult,
    },
    Action {
        action: Action,
        result: ActionResult,
    },
    Evaluation {
        matched: bool,
        rationale: String,
        artifact_digest: String,
    },
    /// Terminal marker appended when the session closes.
    Closed {
        status: SessionStatus,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::FocusCheck { .. } => EventKind::FocusCheck,
            Self::Capture { .. } => EventKind::Capture,
            Self::Action { .. } => EventKind::Action,
            Self::Evaluation { .. } => EventKind::Evaluation,
            Self::Closed { .. } => EventKind::Closed,
        }
    }
}

/// One append-only entry in a session's event log.
///
/// `label` holds the event's label or reason: the focus target, capture label,
/// action reason, evaluation expectation, or close reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub seq: u64,
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub label: String,
    pub payload: EventPayload,
    pub prev_digest: String,
    pub digest: String,
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
