//! Validation loop state machine.
//!
//! Transitions are pure: [`LoopState::advance`] maps a state and an observed
//! [`Signal`] to the next state without performing any I/O. The orchestration
//! in `validation` feeds it signals produced by the collaborators.

use crate::core::types::{Artifact, SessionStatus, Verdict};

/// States of a single validation run. Attempts are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Init { attempt: u32 },
    Focused { attempt: u32 },
    BaselineCaptured { attempt: u32, baseline: Artifact },
    ActionIssued { attempt: u32, baseline: Artifact },
    PostCaptured { attempt: u32, baseline: Artifact, post: Artifact },
    Evaluated { attempt: u32, post: Artifact, verdict: Verdict },
    Retry { attempt: u32 },
    Success { attempt: u32 },
    Exhausted { attempt: u32 },
    FocusFailure { attempt: u32 },
    Aborted { attempt: u32, reason: String },
}

/// Observation that drives a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Result of a focus gate check.
    Focus(bool),
    /// A capture completed.
    Captured(Artifact),
    /// The action executor reported success.
    ActionPerformed,
    /// The match predicate returned a verdict.
    Judged(Verdict),
    /// Automatic resolution of an evaluated attempt.
    Resolve,
    /// The caller supplied a corrective action for the next attempt.
    Corrected,
    /// The run must stop without a verdict (abort request, collaborator failure).
    Abort(String),
}

/// A signal that does not apply to the current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("signal {signal} is not valid in state {state}")]
pub struct TransitionError {
    pub state: &'static str,
    pub signal: String,
}

impl LoopState {
    pub fn initial() -> Self {
        Self::Init { attempt: 1 }
    }

    pub fn attempt(&self) -> u32 {
        match self {
            Self::Init { attempt }
            | Self::Focused { attempt }
            | Self::BaselineCaptured { attempt, .. }
            | Self::ActionIssued { attempt, .. }
            | Self::PostCaptured { attempt, .. }
            | Self::Evaluated { attempt, .. }
            | Self::Retry { attempt }
            | Self::Success { attempt }
            | Self::Exhausted { attempt }
            | Self::FocusFailure { attempt }
            | Self::Aborted { attempt, .. } => *attempt,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Focused { .. } => "focused",
            Self::BaselineCaptured { .. } => "baseline_captured",
            Self::ActionIssued { .. } => "action_issued",
            Self::PostCaptured { .. } => "post_captured",
            Self::Evaluated { .. } => "evaluated",
            Self::Retry { .. } => "retry",
            Self::Success { .. } => "success",
            Self::Exhausted { .. } => "exhausted",
            Self::FocusFailure { .. } => "focus_failure",
            Self::Aborted { .. } => "aborted",
        }
    }

    /// Session status for terminal states, `None` while the run is live.
    pub fn status(&self) -> Option<SessionStatus> {
        match self {
            Self::Success { .. } => Some(SessionStatus::Success),
            Self::Exhausted { .. } => Some(SessionStatus::Exhausted),
            Self::FocusFailure { .. } => Some(SessionStatus::FocusFailure),
            Self::Aborted { .. } => Some(SessionStatus::Aborted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some()
    }

    /// Whether an external abort request may take effect in this state.
    ///
    /// Once an action is issued the run must observe and judge its effect
    /// before stopping, so `ActionIssued` and `PostCaptured` defer aborts.
    pub fn accepts_abort(&self) -> bool {
        !self.is_terminal() && !matches!(self, Self::ActionIssued { .. } | Self::PostCaptured { .. })
    }

    /// Compute the next state for `signal`.
    ///
    /// `max_attempts` bounds the retry chain: an evaluated mismatch in attempt
    /// `max_attempts` resolves to `Exhausted`.
    pub fn advance(&self, signal: Signal, max_attempts: u32) -> Result<Self, TransitionError> {
        let attempt = self.attempt();
        let next = match (self, signal) {
            (state, Signal::Abort(reason)) if !state.is_terminal() => {
                Self::Aborted { attempt, reason }
            }
            (Self::Init { .. }, Signal::Focus(true)) => Self::Focused { attempt },
            (Self::Init { .. }, Signal::Focus(false)) => Self::FocusFailure { attempt },
            (Self::Focused { .. }, Signal::Captured(baseline)) => {
                Self::BaselineCaptured { attempt, baseline }
            }
            (Self::BaselineCaptured { baseline, .. }, Signal::ActionPerformed) => {
                Self::ActionIssued {
                    attempt,
                    baseline: baseline.clone(),
                }
            }
            (Self::ActionIssued { baseline, .. }, Signal::Captured(post)) => Self::PostCaptured {
                attempt,
                baseline: baseline.clone(),
                post,
            },
            (Self::PostCaptured { post, .. }, Signal::Judged(verdict)) => Self::Evaluated {
                attempt,
                post: post.clone(),
                verdict,
            },
            (Self::Evaluated { verdict, .. }, Signal::Resolve) => {
                if verdict.matched {
                    Self::Success { attempt }
                } else if attempt < max_attempts {
                    Self::Retry { attempt }
                } else {
                    Self::Exhausted { attempt }
                }
            }
            (Self::Retry { .. }, Signal::Corrected) => Self::Init {
                attempt: attempt + 1,
            },
            (state, signal) => {
                return Err(TransitionError {
                    state: state.name(),
                    signal: format!("{signal:?}"),
                });
            }
        };
        Ok(next)
    }
}
