//! Typed controller failures.
//!
//! These travel inside `anyhow::Error`; callers classify them with
//! `err.downcast_ref::<ControllerError>()`.

use thiserror::Error;

/// Failure kinds surfaced by the validation loop and session recorder.
///
/// Non-error terminal outcomes (`success`, `exhausted`, `focus_failure`, and a
/// requested abort) are reported through [`crate::validation::LoopOutcome`]
/// instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// The screen could not be observed. The loop never guesses visual state.
    #[error("capture '{label}' failed in attempt {attempt}: {detail}")]
    CaptureFailed {
        attempt: u32,
        label: String,
        detail: String,
    },

    /// The input layer could not perform the requested action.
    #[error("action '{action}' failed in attempt {attempt}: {detail}")]
    ActionFailed {
        attempt: u32,
        action: String,
        detail: String,
    },

    /// The match predicate could not produce a verdict.
    #[error("evaluation failed in attempt {attempt}: {detail}")]
    EvaluationFailed { attempt: u32, detail: String },

    /// The configured per-attempt wall-clock budget ran out.
    #[error("attempt {attempt} exceeded its {timeout_ms}ms budget")]
    AttemptTimedOut { attempt: u32, timeout_ms: u64 },

    /// An action was rejected before reaching the executor.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// An action was issued without focus confirmed in the same attempt.
    #[error("focus not confirmed for attempt {attempt}")]
    FocusNotConfirmed { attempt: u32 },

    /// The session was already closed; no further events are accepted.
    #[error("session {session_id} is closed")]
    SessionClosed { session_id: String },

    /// `save()` was called before the session reached a terminal status.
    #[error("session {session_id} is still open")]
    SessionOpen { session_id: String },
}
