//! End-to-end validation runs against scripted collaborators.
//!
//! Each test drives a full `ValidationLoop::run` and then audits the saved
//! session log the way an external reviewer would: load it from the store,
//! verify the hash chain and ordering invariants, and count events.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use controller::core::types::{
    Action, ActionRequest, ActionResult, CaptureResult, EventKind, EventPayload, SessionStatus,
    Verdict,
};
use controller::error::ControllerError;
use controller::io::action::{ActionExecutor, CommandActionExecutor};
use controller::io::blob_store::BlobStore;
use controller::io::capture::{CaptureService, CommandScreenSource};
use controller::io::config::{ControllerConfig, load_config, write_config};
use controller::io::focus::CommandFocusGate;
use controller::io::predicate::EvaluationRequest;
use controller::io::session_log::{SessionLog, load_session_log, verify_session_log};
use controller::logging;
use controller::session::SessionRecorder;
use controller::validation::{
    AbortHandle, AttemptReport, Collaborators, Goal, LoopConfig, LoopOutcome, ValidationLoop,
    open_session,
};
use controller::test_support::{
    MemoryBlobStore, ScriptedActionExecutor, ScriptedFocusGate, ScriptedPredicate, ScriptedScreen,
};

const TARGET: &str = "Editor";

struct Harness {
    store: Arc<MemoryBlobStore>,
    focus: ScriptedFocusGate,
    screen: ScriptedScreen,
    executor: ScriptedActionExecutor,
    predicate: ScriptedPredicate,
    config: LoopConfig,
}

impl Harness {
    fn new(focus: Vec<bool>, verdicts: Vec<bool>) -> Self {
        let _ = logging::init();
        Self {
            store: Arc::new(MemoryBlobStore::default()),
            focus: ScriptedFocusGate::new(focus),
            screen: ScriptedScreen::sequential(),
            executor: ScriptedActionExecutor::succeeding(),
            predicate: ScriptedPredicate::new(verdicts),
            config: LoopConfig::default(),
        }
    }

    fn recorder(&self) -> SessionRecorder {
        open_session(TARGET, &goal(), &self.config, self.store.clone())
    }

    /// Run to completion, returning the loop result and the recorder.
    fn run<F>(&self, correct: F) -> (Result<LoopOutcome>, SessionRecorder)
    where
        F: FnMut(&AttemptReport) -> Option<ActionRequest>,
    {
        self.run_with(&self.executor, |_| {}, correct)
    }

    fn run_with<F>(
        &self,
        executor: &dyn ActionExecutor,
        before: impl FnOnce(&AbortHandle),
        correct: F,
    ) -> (Result<LoopOutcome>, SessionRecorder)
    where
        F: FnMut(&AttemptReport) -> Option<ActionRequest>,
    {
        let mut recorder = self.recorder();
        let capture = CaptureService::new(&self.screen, self.store.clone(), 1 << 20);
        let collaborators = Collaborators {
            focus: &self.focus,
            capture: &capture,
            executor,
            predicate: &self.predicate,
        };
        let result = ValidationLoop::new(collaborators, self.config.clone(), goal(), &mut recorder)
            .and_then(|run| {
                before(&run.abort_handle());
                run.run(correct)
            });
        (result, recorder)
    }

    fn saved_log(&self, session_id: &str) -> SessionLog {
        let log = load_session_log(self.store.as_ref(), session_id).expect("load session log");
        let problems = verify_session_log(&log);
        assert!(problems.is_empty(), "saved log failed audit: {problems:?}");
        log
    }
}

fn goal() -> Goal {
    Goal::new(
        "open settings",
        "settings dialog visible",
        ActionRequest::new(Action::pointer_click(100, 200), "activate_feature"),
    )
    .expect("goal")
}

fn shift_right(report: &AttemptReport) -> Option<ActionRequest> {
    let Action::PointerClick { x, y } = report.action.action else {
        return None;
    };
    Some(ActionRequest::new(
        Action::pointer_click(x + 5, y),
        "activate_feature",
    ))
}

fn count(log: &SessionLog, kind: EventKind) -> usize {
    log.events.iter().filter(|event| event.kind() == kind).count()
}

fn kinds(log: &SessionLog) -> Vec<EventKind> {
    log.events.iter().map(|event| event.kind()).collect()
}

#[test]
fn success_on_first_try() {
    let harness = Harness::new(vec![true], vec![true]);
    let (result, _recorder) = harness.run(shift_right);
    let outcome = result.expect("run");
    assert_eq!(outcome.status, SessionStatus::Success);
    assert_eq!(outcome.attempts, 1);

    let log = harness.saved_log(&outcome.session_id);
    assert_eq!(log.status, SessionStatus::Success);
    assert_eq!(
        kinds(&log),
        vec![
            EventKind::FocusCheck,
            EventKind::Capture,
            EventKind::Action,
            EventKind::Capture,
            EventKind::Evaluation,
            EventKind::Closed,
        ]
    );
    assert_eq!(count(&log, EventKind::Action), 1);

    let action = &log.events[2];
    assert_eq!(action.label, "activate_feature");
    assert_eq!(
        action.payload,
        EventPayload::Action {
            action: Action::pointer_click(100, 200),
            result: ActionResult::Performed,
        }
    );
    let labels: Vec<&str> = log.artifacts.iter().map(|a| a.label.as_str()).collect();
    assert_eq!(labels, vec!["s0", "s1"]);

    let seen = harness.predicate.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].post_label, "s1");
    assert_eq!(seen[0].baseline_label, "s0");
    assert_eq!(seen[0].expectation, "settings dialog visible");
    assert_eq!(seen[0].reason, "activate_feature");
}

#[test]
fn retry_then_success() {
    let harness = Harness::new(vec![true, true], vec![false, true]);
    let (result, _recorder) = harness.run(shift_right);
    let outcome = result.expect("run");
    assert_eq!(outcome.status, SessionStatus::Success);
    assert_eq!(outcome.attempts, 2);

    let log = harness.saved_log(&outcome.session_id);
    assert_eq!(count(&log, EventKind::Action), 2);
    assert_eq!(count(&log, EventKind::Evaluation), 2);
    assert_eq!(count(&log, EventKind::FocusCheck), 2);

    for (index, event) in log.events.iter().enumerate() {
        if event.kind() != EventKind::Action {
            continue;
        }
        let last_focus = log.events[..index]
            .iter()
            .rev()
            .find(|prior| prior.kind() == EventKind::FocusCheck)
            .expect("focus check before action");
        assert_eq!(last_focus.attempt, event.attempt);
        assert!(matches!(
            last_focus.payload,
            EventPayload::FocusCheck { focused: true, .. }
        ));
    }

    let performed = harness.executor.performed();
    assert_eq!(performed[0].action, Action::pointer_click(100, 200));
    assert_eq!(performed[1].action, Action::pointer_click(105, 200));
}

#[test]
fn exhaustion_after_five_mismatches() {
    let harness = Harness::new(vec![true; 5], vec![false; 5]);
    let mut corrections = 0;
    let (result, _recorder) = harness.run(|report: &AttemptReport| {
        corrections += 1;
        assert!(report.attempt < report.max_attempts);
        shift_right(report)
    });
    let outcome = result.expect("exhaustion is a reported outcome");
    assert_eq!(outcome.status, SessionStatus::Exhausted);
    assert_eq!(outcome.attempts, 5);
    assert_eq!(corrections, 4);

    let log = harness.saved_log(&outcome.session_id);
    assert_eq!(count(&log, EventKind::Action), 5);
    assert_eq!(count(&log, EventKind::Evaluation), 5);
    assert_eq!(harness.executor.performed().len(), 5);
    assert_eq!(harness.focus.calls(), 5);
}

#[test]
fn focus_loss_on_retry_halts_before_corrective_action() {
    let harness = Harness::new(vec![true, false], vec![false]);
    let (result, _recorder) = harness.run(shift_right);
    let outcome = result.expect("focus failure is a reported outcome");
    assert_eq!(outcome.status, SessionStatus::FocusFailure);
    assert_eq!(outcome.attempts, 2);

    let log = harness.saved_log(&outcome.session_id);
    assert_eq!(count(&log, EventKind::Action), 1);
    assert_eq!(
        log.events[log.events.len() - 2].payload,
        EventPayload::FocusCheck {
            focused: false,
            detail: None
        }
    );
    assert_eq!(harness.executor.performed().len(), 1);
}

#[test]
fn focus_gate_error_is_recorded_as_focus_failure() {
    let mut harness = Harness::new(Vec::new(), Vec::new());
    harness.focus = ScriptedFocusGate::from_results(vec![Err("no display".to_string())]);
    let (result, _recorder) = harness.run(shift_right);
    let outcome = result.expect("run");
    assert_eq!(outcome.status, SessionStatus::FocusFailure);

    let log = harness.saved_log(&outcome.session_id);
    assert_eq!(
        log.events[0].payload,
        EventPayload::FocusCheck {
            focused: false,
            detail: Some("no display".to_string())
        }
    );
    assert!(harness.screen.labels().is_empty());
}

#[test]
fn post_capture_failure_aborts_without_a_verdict() {
    let mut harness = Harness::new(vec![true], vec![true]);
    harness.screen = ScriptedScreen::new(vec![
        Ok(b"baseline".to_vec()),
        Err("display disconnected".to_string()),
    ]);
    let (result, mut recorder) = harness.run(shift_right);
    let err = result.unwrap_err();
    match err.downcast_ref::<ControllerError>() {
        Some(ControllerError::CaptureFailed { attempt, label, .. }) => {
            assert_eq!(*attempt, 1);
            assert_eq!(label, "s1");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let reference = recorder.save().expect("session already saved");
    let log = harness.saved_log(&reference.session_id);
    assert_eq!(log.status, SessionStatus::Aborted);
    assert_eq!(count(&log, EventKind::Evaluation), 0);
    assert!(matches!(
        log.events[3].payload,
        EventPayload::Capture {
            result: CaptureResult::Failed { .. }
        }
    ));
    assert!(harness.predicate.seen().is_empty());
}

#[test]
fn action_failure_is_recorded_before_surfacing() {
    let harness = Harness::new(vec![true], vec![true]);
    let executor = ScriptedActionExecutor::new(vec![Err("xdotool: no such window".to_string())]);
    let (result, recorder) = harness.run_with(&executor, |_| {}, shift_right);
    let err = result.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ControllerError>(),
        Some(ControllerError::ActionFailed { attempt: 1, .. })
    ));

    assert_eq!(recorder.status(), Some(SessionStatus::Aborted));
    let log = harness.saved_log(recorder.id());
    assert_eq!(
        kinds(&log),
        vec![
            EventKind::FocusCheck,
            EventKind::Capture,
            EventKind::Action,
            EventKind::Closed,
        ]
    );
    assert_eq!(harness.screen.labels(), vec!["s0"]);
}

#[test]
fn predicate_error_is_recorded_as_a_failed_evaluation() {
    let mut harness = Harness::new(vec![true], Vec::new());
    harness.predicate = ScriptedPredicate::from_results(vec![Err("model offline".to_string())]);
    let (result, recorder) = harness.run(shift_right);
    let err = result.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ControllerError>(),
        Some(ControllerError::EvaluationFailed { attempt: 1, .. })
    ));

    let log = harness.saved_log(recorder.id());
    match &log.events[4].payload {
        EventPayload::Evaluation {
            matched, rationale, ..
        } => {
            assert!(!matched);
            assert!(rationale.contains("model offline"));
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[test]
fn abort_before_start_performs_no_actions() {
    let harness = Harness::new(vec![true], vec![true]);
    let (result, _recorder) = harness.run_with(&harness.executor, AbortHandle::abort, shift_right);
    let outcome = result.expect("requested abort is an outcome");
    assert_eq!(outcome.status, SessionStatus::Aborted);
    assert_eq!(outcome.reason, "abort requested");

    let log = harness.saved_log(&outcome.session_id);
    assert_eq!(kinds(&log), vec![EventKind::Closed]);
    assert_eq!(harness.focus.calls(), 0);
}

/// Executor that requests an abort while its action is in flight.
struct AbortingExecutor {
    handle: std::sync::Mutex<Option<AbortHandle>>,
}

impl ActionExecutor for AbortingExecutor {
    fn execute(&self, _request: &ActionRequest, _timeout: Duration) -> Result<()> {
        if let Some(handle) = self.handle.lock().expect("handle lock").as_ref() {
            handle.abort();
        }
        Ok(())
    }
}

#[test]
fn abort_during_action_still_observes_and_judges_it() {
    let harness = Harness::new(vec![true, true], vec![false, true]);
    let executor = AbortingExecutor {
        handle: std::sync::Mutex::new(None),
    };
    let (result, _recorder) = harness.run_with(
        &executor,
        |handle| {
            *executor.handle.lock().expect("handle lock") = Some(handle.clone());
        },
        shift_right,
    );
    let outcome = result.expect("run");
    assert_eq!(outcome.status, SessionStatus::Aborted);
    assert_eq!(outcome.attempts, 1);

    let log = harness.saved_log(&outcome.session_id);
    assert_eq!(
        kinds(&log),
        vec![
            EventKind::FocusCheck,
            EventKind::Capture,
            EventKind::Action,
            EventKind::Capture,
            EventKind::Evaluation,
            EventKind::Closed,
        ]
    );
}

#[test]
fn independent_sessions_run_concurrently() {
    let store = Arc::new(MemoryBlobStore::default());
    let handles: Vec<_> = ["Editor", "Browser", "Terminal"]
        .into_iter()
        .map(|target| {
            let store = store.clone();
            thread::spawn(move || {
                let focus = ScriptedFocusGate::new(vec![true, true]);
                let screen = ScriptedScreen::sequential();
                let executor = ScriptedActionExecutor::succeeding();
                let predicate = ScriptedPredicate::new(vec![false, true]);
                let config = LoopConfig::default();
                let shared: Arc<dyn BlobStore> = store;
                let mut recorder = open_session(target, &goal(), &config, shared.clone());
                let capture = CaptureService::new(&screen, shared, 1 << 20);
                let collaborators = Collaborators {
                    focus: &focus,
                    capture: &capture,
                    executor: &executor,
                    predicate: &predicate,
                };
                let outcome = ValidationLoop::new(collaborators, config, goal(), &mut recorder)
                    .and_then(|run| run.run(shift_right))
                    .expect("run");
                assert_eq!(focus.targets(), vec![target, target]);
                outcome
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        let outcome = handle.join().expect("session thread");
        assert_eq!(outcome.status, SessionStatus::Success);
        let log = load_session_log(store.as_ref(), &outcome.session_id).expect("load");
        assert!(verify_session_log(&log).is_empty());
        assert_eq!(log.events.len(), 11);
        ids.push(outcome.session_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

fn screen_changed(request: &EvaluationRequest<'_>) -> Result<Verdict> {
    Ok(if request.post.image != request.baseline.image {
        Verdict::matched("screen changed")
    } else {
        Verdict::mismatch("screen unchanged")
    })
}

#[cfg(unix)]
#[test]
fn command_backed_collaborators_complete_a_run() {
    let _ = logging::init();
    let temp = tempfile::tempdir().expect("tempdir");
    let config_path = temp.path().join("controller.toml");
    let mut config = ControllerConfig::default();
    config.attempt_timeout_secs = Some(60);
    config.focus.activate = vec!["true".to_string()];
    config.focus.verify = vec!["echo".to_string(), "{{ target }} - untitled".to_string()];
    config.focus.window_pattern = Some(format!("{TARGET} - .*"));
    config.capture.command = vec!["printf".to_string(), "frame-{{ label }}".to_string()];
    config.capture.from_stdout = true;
    config.input.click = vec!["true".to_string()];
    config.input.key = vec!["true".to_string()];
    write_config(&config_path, &config).expect("write config");
    let config = load_config(&config_path).expect("load config");

    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::default());
    let focus = CommandFocusGate::new(&config.focus, config.command_output_limit_bytes)
        .expect("focus gate");
    let screen = CommandScreenSource::new(&config.capture).expect("screen");
    let executor = CommandActionExecutor::new(&config.input, config.command_output_limit_bytes)
        .expect("executor");
    let capture = CaptureService::new(&screen, store.clone(), config.capture.max_image_bytes);
    let loop_config = LoopConfig::from(&config);
    let mut recorder = open_session(TARGET, &goal(), &loop_config, store.clone());
    let collaborators = Collaborators {
        focus: &focus,
        capture: &capture,
        executor: &executor,
        predicate: &screen_changed,
    };
    let outcome = ValidationLoop::new(collaborators, loop_config, goal(), &mut recorder)
        .and_then(|run| run.run(shift_right))
        .expect("run");
    assert_eq!(outcome.status, SessionStatus::Success);

    let log = load_session_log(store.as_ref(), &outcome.session_id).expect("load");
    assert!(verify_session_log(&log).is_empty());
    let post = store.get(&log.artifacts[1].digest).expect("post capture");
    assert_eq!(post, b"frame-s1");
}
