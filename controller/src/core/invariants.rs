//! Ordering invariants over a session's event log.

use std::collections::HashSet;

use crate::core::types::{ActionResult, CaptureResult, EventPayload, SessionEvent};

/// Check the causal-ordering invariants of an event log:
/// - A performed action is followed by exactly one capture, then exactly one
///   evaluation of that capture, before anything else.
/// - A failed action, or a failed post-action capture, ends the session.
/// - The closest preceding focus check of every action is `true` and belongs to
///   the same attempt.
/// - At most one action per attempt and at most `max_attempts` actions.
/// - A `closed` marker, if present, is the last event.
pub fn check_event_invariants(events: &[SessionEvent], max_attempts: u32) -> Vec<String> {
    let mut errors = Vec::new();
    let mut last_focus: Option<(u32, bool)> = None;
    let mut attempts_with_action = HashSet::new();
    let mut action_count = 0u32;

    for (index, event) in events.iter().enumerate() {
        match &event.payload {
            EventPayload::FocusCheck { focused, .. } => {
                last_focus = Some((event.attempt, *focused));
            }
            EventPayload::Action { result, .. } => {
                action_count += 1;
                check_focus_precondition(event, last_focus, &mut errors);
                if !attempts_with_action.insert(event.attempt) {
                    errors.push(format!(
                        "event {}: second action in attempt {}",
                        event.seq, event.attempt
                    ));
                }
                if event.attempt > max_attempts {
                    errors.push(format!(
                        "event {}: attempt {} exceeds max_attempts {max_attempts}",
                        event.seq, event.attempt
                    ));
                }
                match result {
                    ActionResult::Performed => check_observation(events, index, &mut errors),
                    ActionResult::Failed { .. } => expect_end(events, index + 1, event, &mut errors),
                }
            }
            EventPayload::Closed { .. } => {
                if index + 1 != events.len() {
                    errors.push(format!("event {}: closed marker is not last", event.seq));
                }
            }
            EventPayload::Capture { .. } | EventPayload::Evaluation { .. } => {}
        }
    }

    if action_count > max_attempts {
        errors.push(format!(
            "{action_count} actions exceed max_attempts {max_attempts}"
        ));
    }
    errors
}

fn check_focus_precondition(
    action: &SessionEvent,
    last_focus: Option<(u32, bool)>,
    errors: &mut Vec<String>,
) {
    match last_focus {
        None => errors.push(format!("event {}: action without focus check", action.seq)),
        Some((_, false)) => errors.push(format!(
            "event {}: action after failed focus check",
            action.seq
        )),
        Some((attempt, true)) if attempt != action.attempt => errors.push(format!(
            "event {}: focus was confirmed in attempt {attempt}, not {}",
            action.seq, action.attempt
        )),
        Some(_) => {}
    }
}

/// Verify the capture + evaluation pair that must follow the action at `index`.
fn check_observation(events: &[SessionEvent], index: usize, errors: &mut Vec<String>) {
    let action = &events[index];
    let Some(capture) = events.get(index + 1) else {
        errors.push(format!("event {}: action has no post-capture", action.seq));
        return;
    };
    let artifact = match &capture.payload {
        EventPayload::Capture {
            result: CaptureResult::Captured { artifact },
        } => artifact,
        EventPayload::Capture {
            result: CaptureResult::Failed { .. },
        } => {
            expect_end(events, index + 2, capture, errors);
            return;
        }
        _ => {
            errors.push(format!(
                "event {}: action must be followed by a capture",
                action.seq
            ));
            return;
        }
    };
    match events.get(index + 2) {
        Some(SessionEvent {
            seq,
            payload: EventPayload::Evaluation {
                artifact_digest, ..
            },
            ..
        }) => {
            if artifact_digest != &artifact.digest {
                errors.push(format!(
                    "event {seq}: evaluation does not judge the post-capture"
                ));
            }
        }
        _ => errors.push(format!(
            "event {}: post-capture must be followed by an evaluation",
            capture.seq
        )),
    }
}

/// Only a closed marker, or nothing, may follow the `failed` event.
fn expect_end(events: &[SessionEvent], index: usize, failed: &SessionEvent, errors: &mut Vec<String>) {
    match events.get(index).map(|event| &event.payload) {
        None | Some(EventPayload::Closed { .. }) => {}
        Some(_) => errors.push(format!(
            "event {}: session continued after a failure",
            failed.seq
        )),
    }
}
