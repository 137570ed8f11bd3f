//! Orchestration of one visual validation run.
//!
//! [`ValidationLoop`] drives [`LoopState`] through focus, baseline capture,
//! action, post-capture and evaluation, retrying with caller-supplied
//! corrections until the expectation matches or the attempt bound is reached.
//! Every collaborator result is recorded before the loop acts on it, and every
//! terminal path closes and saves the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::budget::clamp_timeout;
use crate::core::machine::{LoopState, Signal};
use crate::core::types::{
    ActionRequest, ActionResult, Artifact, CaptureResult, EventPayload, SessionStatus, Verdict,
};
use crate::error::ControllerError;
use crate::io::action::{ActionExecutor, execute_action};
use crate::io::blob_store::BlobStore;
use crate::io::capture::{CaptureService, Observation};
use crate::io::config::{ControllerConfig, MAX_ATTEMPTS_LIMIT};
use crate::io::focus::{FocusConfirmed, FocusGate, FocusRequest, check_focus};
use crate::io::predicate::{EvaluationRequest, MatchPredicate};
use crate::session::{SessionRecorder, StorageReference};

/// What a run is trying to achieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal {
    /// Shared by every attempt of the retry chain.
    pub label: String,
    /// Expected visual outcome, handed to the match predicate.
    pub expectation: String,
    /// Action for the first attempt.
    pub action: ActionRequest,
}

impl Goal {
    pub fn new(
        label: impl Into<String>,
        expectation: impl Into<String>,
        action: ActionRequest,
    ) -> Result<Self, ControllerError> {
        let goal = Self {
            label: label.into(),
            expectation: expectation.into(),
            action,
        };
        goal.validate()?;
        Ok(goal)
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.expectation.trim().is_empty() {
            return Err(ControllerError::InvalidAction(format!(
                "goal '{}' has no expectation",
                self.label
            )));
        }
        self.action.validate()
    }
}

/// External collaborators of one run. Each run should own its focus target.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub focus: &'a dyn FocusGate,
    pub capture: &'a CaptureService<'a>,
    pub executor: &'a dyn ActionExecutor,
    pub predicate: &'a dyn MatchPredicate,
}

/// Loop bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_attempts: u32,
    /// Wall-clock budget per attempt. `None` means unbounded.
    pub attempt_timeout: Option<Duration>,
    /// Upper bound for any single collaborator call.
    pub command_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout: None,
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&ControllerConfig> for LoopConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            attempt_timeout: config.attempt_timeout(),
            command_timeout: config.command_timeout(),
        }
    }
}

/// Cloneable request to stop a run between states.
///
/// The loop honors it at the next state boundary that accepts an abort; an
/// action already issued is still observed and judged first.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of an attempt that did not match, handed to the corrector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub attempt: u32,
    pub max_attempts: u32,
    pub action: ActionRequest,
    pub post: Artifact,
    pub verdict: Verdict,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    /// Attempt the run ended in.
    pub attempts: u32,
    /// Close reason recorded on the session's final event.
    pub reason: String,
    pub storage: StorageReference,
}

/// Open a recorder whose header matches `goal` and `config`.
pub fn open_session(
    target: &str,
    goal: &Goal,
    config: &LoopConfig,
    store: Arc<dyn BlobStore>,
) -> SessionRecorder {
    SessionRecorder::start(
        target,
        goal.label.as_str(),
        goal.expectation.as_str(),
        config.max_attempts,
        store,
    )
}

fn baseline_label(attempt: u32) -> String {
    format!("s{}", 2 * (u64::from(attempt) - 1))
}

fn post_label(attempt: u32) -> String {
    format!("s{}", 2 * u64::from(attempt) - 1)
}

/// One validation run over an exclusively borrowed session recorder.
pub struct ValidationLoop<'a> {
    collaborators: Collaborators<'a>,
    config: LoopConfig,
    goal: Goal,
    recorder: &'a mut SessionRecorder,
    state: LoopState,
    action: ActionRequest,
    focus: Option<FocusConfirmed>,
    baseline: Option<Observation>,
    post: Option<Observation>,
    report: Option<AttemptReport>,
    deadline: Option<Instant>,
    abort: AbortHandle,
    storage: Option<StorageReference>,
}

impl<'a> ValidationLoop<'a> {
    /// Prepare a run. `recorder` must be fresh and opened for `config`.
    pub fn new(
        collaborators: Collaborators<'a>,
        config: LoopConfig,
        goal: Goal,
        recorder: &'a mut SessionRecorder,
    ) -> Result<Self> {
        if config.max_attempts == 0 || config.max_attempts > MAX_ATTEMPTS_LIMIT {
            bail!("max_attempts must be between 1 and {MAX_ATTEMPTS_LIMIT}");
        }
        if recorder.header().target.trim().is_empty() {
            bail!("session {} has no focus target", recorder.id());
        }
        goal.validate()?;
        if !recorder.events().is_empty() || recorder.is_closed() {
            bail!("session {} has already recorded events", recorder.id());
        }
        if recorder.header().max_attempts != config.max_attempts {
            bail!(
                "session {} was opened for {} attempts, loop is configured for {}",
                recorder.id(),
                recorder.header().max_attempts,
                config.max_attempts
            );
        }
        let action = goal.action.clone();
        Ok(Self {
            collaborators,
            config,
            goal,
            recorder,
            state: LoopState::initial(),
            action,
            focus: None,
            baseline: None,
            post: None,
            report: None,
            deadline: None,
            abort: AbortHandle::default(),
            storage: None,
        })
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn session_id(&self) -> &str {
        self.recorder.id()
    }

    /// Drive the run to a terminal state.
    ///
    /// `correct` is consulted after every mismatch that leaves attempts to
    /// spare; returning `None` aborts the run. Success, exhaustion, focus
    /// failure and requested aborts are `Ok`; collaborator failures and
    /// timeouts are recorded, saved, and returned as [`ControllerError`].
    #[instrument(skip_all, fields(session_id = %self.recorder.id(), goal = %self.goal.label))]
    pub fn run<F>(mut self, mut correct: F) -> Result<LoopOutcome>
    where
        F: FnMut(&AttemptReport) -> Option<ActionRequest>,
    {
        while !self.state.is_terminal() {
            self.step(&mut correct)?;
        }
        self.outcome()
    }

    /// Perform exactly one transition.
    pub fn step(
        &mut self,
        correct: &mut dyn FnMut(&AttemptReport) -> Option<ActionRequest>,
    ) -> Result<&LoopState> {
        if self.abort.is_aborted() && self.state.accepts_abort() {
            info!(state = self.state.name(), "abort requested");
            self.transition(Signal::Abort("abort requested".to_string()))?;
            return Ok(&self.state);
        }

        let attempt = self.state.attempt();
        match self.state.clone() {
            LoopState::Init { .. } => {
                self.deadline = self
                    .config
                    .attempt_timeout
                    .map(|limit| Instant::now() + limit);
                let timeout = self.bounded_timeout()?;
                self.confirm_focus(attempt, timeout)?;
            }
            LoopState::Focused { .. } => {
                let timeout = self.bounded_timeout()?;
                let observation = self.capture(attempt, &baseline_label(attempt), timeout)?;
                let artifact = observation.artifact.clone();
                self.baseline = Some(observation);
                self.transition(Signal::Captured(artifact))?;
            }
            LoopState::BaselineCaptured { .. } => {
                let timeout = self.bounded_timeout()?;
                self.perform_action(attempt, timeout)?;
            }
            LoopState::ActionIssued { .. } => {
                // The effect of an issued action is always observed, even
                // past the attempt budget.
                let observation =
                    self.capture(attempt, &post_label(attempt), self.config.command_timeout)?;
                let artifact = observation.artifact.clone();
                self.post = Some(observation);
                self.transition(Signal::Captured(artifact))?;
            }
            LoopState::PostCaptured { .. } => {
                self.evaluate(attempt)?;
            }
            LoopState::Evaluated { post, verdict, .. } => {
                if verdict.matched {
                    info!(attempt, rationale = %verdict.rationale, "expectation matched");
                } else {
                    warn!(attempt, rationale = %verdict.rationale, "expectation not matched");
                }
                self.report = Some(AttemptReport {
                    attempt,
                    max_attempts: self.config.max_attempts,
                    action: self.action.clone(),
                    post,
                    verdict,
                });
                self.transition(Signal::Resolve)?;
            }
            LoopState::Retry { .. } => {
                self.apply_correction(attempt, correct)?;
            }
            LoopState::Success { .. }
            | LoopState::Exhausted { .. }
            | LoopState::FocusFailure { .. }
            | LoopState::Aborted { .. } => {
                bail!("validation loop already ended in state {}", self.state.name());
            }
        }
        Ok(&self.state)
    }

    /// Outcome of a finished run.
    pub fn outcome(&self) -> Result<LoopOutcome> {
        let status = self
            .state
            .status()
            .ok_or_else(|| anyhow!("validation loop is still in state {}", self.state.name()))?;
        let storage = self
            .storage
            .clone()
            .ok_or_else(|| anyhow!("session {} was not saved", self.recorder.id()))?;
        Ok(LoopOutcome {
            session_id: self.recorder.id().to_string(),
            status,
            attempts: self.state.attempt(),
            reason: self.close_reason(),
            storage,
        })
    }

    fn confirm_focus(&mut self, attempt: u32, timeout: Duration) -> Result<()> {
        let request = FocusRequest {
            target: self.recorder.header().target.clone(),
            timeout,
        };
        let check = check_focus(self.collaborators.focus, &request, attempt);
        let focused = check.confirmed.is_some();
        self.recorder.record(
            attempt,
            request.target,
            EventPayload::FocusCheck {
                focused,
                detail: check.detail,
            },
        )?;
        self.focus = check.confirmed;
        self.transition(Signal::Focus(focused))
    }

    fn capture(&mut self, attempt: u32, label: &str, timeout: Duration) -> Result<Observation> {
        match self.collaborators.capture.capture(label, timeout) {
            Ok(observation) => {
                self.recorder.record(
                    attempt,
                    label,
                    EventPayload::Capture {
                        result: CaptureResult::Captured {
                            artifact: observation.artifact.clone(),
                        },
                    },
                )?;
                Ok(observation)
            }
            Err(err) => {
                let detail = format!("{err:#}");
                self.recorder.record(
                    attempt,
                    label,
                    EventPayload::Capture {
                        result: CaptureResult::Failed {
                            error: detail.clone(),
                        },
                    },
                )?;
                Err(self.fail(ControllerError::CaptureFailed {
                    attempt,
                    label: label.to_string(),
                    detail,
                }))
            }
        }
    }

    fn perform_action(&mut self, attempt: u32, timeout: Duration) -> Result<()> {
        let Some(focus) = self.focus else {
            return Err(self.fail(ControllerError::FocusNotConfirmed { attempt }));
        };
        let request = self.action.clone();
        let result = execute_action(self.collaborators.executor, focus, attempt, &request, timeout);
        let payload_result = match &result {
            Ok(()) => ActionResult::Performed,
            Err(err) => ActionResult::Failed {
                error: format!("{err:#}"),
            },
        };
        self.recorder.record(
            attempt,
            request.reason.as_str(),
            EventPayload::Action {
                action: request.action.clone(),
                result: payload_result,
            },
        )?;
        match result {
            Ok(()) => self.transition(Signal::ActionPerformed),
            Err(err) => {
                let failure = match err.downcast_ref::<ControllerError>() {
                    Some(typed) => typed.clone(),
                    None => ControllerError::ActionFailed {
                        attempt,
                        action: request.action.to_string(),
                        detail: format!("{err:#}"),
                    },
                };
                Err(self.fail(failure))
            }
        }
    }

    fn evaluate(&mut self, attempt: u32) -> Result<()> {
        let (Some(baseline), Some(post)) = (self.baseline.as_ref(), self.post.as_ref()) else {
            bail!("attempt {attempt} has no observations to evaluate");
        };
        let request = EvaluationRequest {
            baseline,
            post,
            expectation: &self.goal.expectation,
            reason: &self.action.reason,
        };
        let artifact_digest = post.artifact.digest.clone();
        match self.collaborators.predicate.evaluate(&request) {
            Ok(verdict) => {
                self.recorder.record(
                    attempt,
                    self.goal.expectation.as_str(),
                    EventPayload::Evaluation {
                        matched: verdict.matched,
                        rationale: verdict.rationale.clone(),
                        artifact_digest,
                    },
                )?;
                self.transition(Signal::Judged(verdict))
            }
            Err(err) => {
                let detail = format!("{err:#}");
                self.recorder.record(
                    attempt,
                    self.goal.expectation.as_str(),
                    EventPayload::Evaluation {
                        matched: false,
                        rationale: format!("predicate error: {detail}"),
                        artifact_digest,
                    },
                )?;
                Err(self.fail(ControllerError::EvaluationFailed { attempt, detail }))
            }
        }
    }

    fn apply_correction(
        &mut self,
        attempt: u32,
        correct: &mut dyn FnMut(&AttemptReport) -> Option<ActionRequest>,
    ) -> Result<()> {
        let report = self
            .report
            .take()
            .ok_or_else(|| anyhow!("attempt {attempt} has no evaluation to correct"))?;
        let Some(next) = correct(&report) else {
            info!(attempt, "no corrective action supplied");
            return self.transition(Signal::Abort("no corrective action supplied".to_string()));
        };
        if let Err(err) = next.validate() {
            return Err(self.fail(err));
        }
        debug!(attempt, action = %next.action, reason = %next.reason, "corrective action accepted");
        self.action = next;
        self.focus = None;
        self.baseline = None;
        self.post = None;
        self.transition(Signal::Corrected)
    }

    /// Collaborator timeout clamped to the attempt budget. Running out of
    /// budget aborts the run.
    fn bounded_timeout(&mut self) -> Result<Duration> {
        match clamp_timeout(self.config.command_timeout, self.deadline) {
            Some(timeout) => Ok(timeout),
            None => {
                let attempt = self.state.attempt();
                let timeout_ms = self
                    .config
                    .attempt_timeout
                    .map(|limit| limit.as_millis() as u64)
                    .unwrap_or_default();
                warn!(attempt, timeout_ms, state = self.state.name(), "attempt budget exhausted");
                Err(self.fail(ControllerError::AttemptTimedOut {
                    attempt,
                    timeout_ms,
                }))
            }
        }
    }

    /// Abort the run for `failure`, save the session, and return the error to
    /// surface.
    fn fail(&mut self, failure: ControllerError) -> anyhow::Error {
        warn!(err = %failure, "validation run failed");
        match self.transition(Signal::Abort(failure.to_string())) {
            Ok(()) => failure.into(),
            Err(save_err) => save_err.context(failure),
        }
    }

    fn transition(&mut self, signal: Signal) -> Result<()> {
        let next = self.state.advance(signal, self.config.max_attempts)?;
        debug!(from = self.state.name(), to = next.name(), attempt = next.attempt(), "transition");
        self.state = next;
        if let Some(status) = self.state.status() {
            let reason = self.close_reason();
            let storage = self
                .recorder
                .finish(self.state.attempt(), status, &reason)
                .with_context(|| format!("close session {}", self.recorder.id()))?;
            info!(%status, attempts = self.state.attempt(), key = %storage.log_key, "validation run finished");
            self.storage = Some(storage);
        }
        Ok(())
    }

    fn close_reason(&self) -> String {
        match &self.state {
            LoopState::Success { .. } => "expectation matched".to_string(),
            LoopState::Exhausted { attempt } => format!("no match after {attempt} attempts"),
            LoopState::FocusFailure { .. } => "focus not confirmed".to_string(),
            LoopState::Aborted { reason, .. } => reason.clone(),
            state => state.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::invariants::check_event_invariants;
    use crate::core::types::{Action, EventKind};
    use crate::test_support::{
        MemoryBlobStore, ScriptedActionExecutor, ScriptedFocusGate, ScriptedPredicate,
        ScriptedScreen,
    };

    struct Fixture {
        store: Arc<MemoryBlobStore>,
        focus: ScriptedFocusGate,
        screen: ScriptedScreen,
        executor: ScriptedActionExecutor,
        predicate: ScriptedPredicate,
    }

    impl Fixture {
        fn new(focus: Vec<bool>, verdicts: Vec<bool>) -> Self {
            Self {
                store: Arc::new(MemoryBlobStore::default()),
                focus: ScriptedFocusGate::new(focus),
                screen: ScriptedScreen::sequential(),
                executor: ScriptedActionExecutor::succeeding(),
                predicate: ScriptedPredicate::new(verdicts),
            }
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

    fn nudge(report: &AttemptReport) -> Option<ActionRequest> {
        Some(ActionRequest::new(
            Action::pointer_click(100 + report.attempt as i32 * 10, 200),
            "activate_feature",
        ))
    }

    #[test]
    fn step_walks_the_documented_states() {
        let fixture = Fixture::new(vec![true], vec![true]);
        let config = LoopConfig::default();
        let mut recorder = open_session("Editor", &goal(), &config, fixture.store.clone());
        let capture = CaptureService::new(&fixture.screen, fixture.store.clone(), 1024);
        let collaborators = Collaborators {
            focus: &fixture.focus,
            capture: &capture,
            executor: &fixture.executor,
            predicate: &fixture.predicate,
        };
        let mut run = ValidationLoop::new(collaborators, config, goal(), &mut recorder)
            .expect("loop");

        let mut names = vec![run.state().name()];
        while !run.state().is_terminal() {
            names.push(run.step(&mut nudge).expect("step").name());
        }
        assert_eq!(
            names,
            vec![
                "init",
                "focused",
                "baseline_captured",
                "action_issued",
                "post_captured",
                "evaluated",
                "success"
            ]
        );
        assert!(run.step(&mut nudge).is_err());
        let outcome = run.outcome().expect("outcome");
        assert_eq!(outcome.status, SessionStatus::Success);
        assert_eq!(outcome.reason, "expectation matched");
    }

    #[test]
    fn retries_use_fresh_labels_and_recheck_focus() {
        let fixture = Fixture::new(vec![true, true], vec![false, true]);
        let config = LoopConfig::default();
        let mut recorder = open_session("Editor", &goal(), &config, fixture.store.clone());
        let capture = CaptureService::new(&fixture.screen, fixture.store.clone(), 1024);
        let collaborators = Collaborators {
            focus: &fixture.focus,
            capture: &capture,
            executor: &fixture.executor,
            predicate: &fixture.predicate,
        };
        let outcome = ValidationLoop::new(collaborators, config, goal(), &mut recorder)
            .expect("loop")
            .run(nudge)
            .expect("run");
        assert_eq!(outcome.status, SessionStatus::Success);
        assert_eq!(outcome.attempts, 2);

        let labels: Vec<&str> = recorder
            .artifacts()
            .iter()
            .map(|artifact| artifact.label.as_str())
            .collect();
        assert_eq!(labels, vec!["s0", "s1", "s2", "s3"]);
        assert_eq!(fixture.focus.calls(), 2);
        assert_eq!(
            fixture.executor.performed()[1].action,
            Action::pointer_click(110, 200)
        );
        assert!(check_event_invariants(recorder.events(), 5).is_empty());
    }

    #[test]
    fn declined_correction_aborts() {
        let fixture = Fixture::new(vec![true], vec![false]);
        let config = LoopConfig::default();
        let mut recorder = open_session("Editor", &goal(), &config, fixture.store.clone());
        let capture = CaptureService::new(&fixture.screen, fixture.store.clone(), 1024);
        let collaborators = Collaborators {
            focus: &fixture.focus,
            capture: &capture,
            executor: &fixture.executor,
            predicate: &fixture.predicate,
        };
        let outcome = ValidationLoop::new(collaborators, config, goal(), &mut recorder)
            .expect("loop")
            .run(|_| None)
            .expect("run");
        assert_eq!(outcome.status, SessionStatus::Aborted);
        assert_eq!(outcome.reason, "no corrective action supplied");
        assert_eq!(recorder.status(), Some(SessionStatus::Aborted));
    }

    #[test]
    fn invalid_correction_is_rejected_before_execution() {
        let fixture = Fixture::new(vec![true, true], vec![false, true]);
        let config = LoopConfig::default();
        let mut recorder = open_session("Editor", &goal(), &config, fixture.store.clone());
        let capture = CaptureService::new(&fixture.screen, fixture.store.clone(), 1024);
        let collaborators = Collaborators {
            focus: &fixture.focus,
            capture: &capture,
            executor: &fixture.executor,
            predicate: &fixture.predicate,
        };
        let err = ValidationLoop::new(collaborators, config, goal(), &mut recorder)
            .expect("loop")
            .run(|_| Some(ActionRequest::new(Action::key_press("Return"), " ")))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ControllerError>(),
            Some(ControllerError::InvalidAction(_))
        ));
        assert_eq!(fixture.executor.performed().len(), 1);
        assert_eq!(recorder.status(), Some(SessionStatus::Aborted));
        assert_eq!(
            recorder.events().last().map(|event| event.kind()),
            Some(EventKind::Closed)
        );
    }

    #[test]
    fn expired_budget_times_out_before_acting() {
        let fixture = Fixture::new(vec![true], vec![true]);
        let config = LoopConfig {
            attempt_timeout: Some(Duration::from_millis(50)),
            ..LoopConfig::default()
        };
        let mut recorder = open_session("Editor", &goal(), &config, fixture.store.clone());
        let capture = CaptureService::new(&fixture.screen, fixture.store.clone(), 1024);
        let collaborators = Collaborators {
            focus: &fixture.focus,
            capture: &capture,
            executor: &fixture.executor,
            predicate: &fixture.predicate,
        };
        let mut run =
            ValidationLoop::new(collaborators, config, goal(), &mut recorder).expect("loop");
        run.step(&mut nudge).expect("focus");
        std::thread::sleep(Duration::from_millis(120));
        let err = run.step(&mut nudge).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ControllerError>(),
            Some(&ControllerError::AttemptTimedOut {
                attempt: 1,
                timeout_ms: 50
            })
        );
        assert_eq!(run.state().status(), Some(SessionStatus::Aborted));
        drop(run);
        assert!(fixture.executor.performed().is_empty());
        assert!(recorder.is_closed());
    }

    #[test]
    fn recorder_must_match_loop_bounds() {
        let fixture = Fixture::new(vec![true], vec![true]);
        let mut recorder = open_session(
            "Editor",
            &goal(),
            &LoopConfig::default(),
            fixture.store.clone(),
        );
        let capture = CaptureService::new(&fixture.screen, fixture.store.clone(), 1024);
        let collaborators = Collaborators {
            focus: &fixture.focus,
            capture: &capture,
            executor: &fixture.executor,
            predicate: &fixture.predicate,
        };
        let config = LoopConfig {
            max_attempts: 3,
            ..LoopConfig::default()
        };
        let err = ValidationLoop::new(collaborators, config, goal(), &mut recorder)
            .err()
            .expect("mismatched bounds");
        assert!(err.to_string().contains("opened for 5 attempts"));
    }

    #[test]
    fn blank_target_and_oversized_bounds_are_refused() {
        let fixture = Fixture::new(vec![true], vec![true]);
        let capture = CaptureService::new(&fixture.screen, fixture.store.clone(), 1024);
        let collaborators = Collaborators {
            focus: &fixture.focus,
            capture: &capture,
            executor: &fixture.executor,
            predicate: &fixture.predicate,
        };

        let mut blank = open_session(" ", &goal(), &LoopConfig::default(), fixture.store.clone());
        let err = ValidationLoop::new(collaborators, LoopConfig::default(), goal(), &mut blank)
            .err()
            .expect("blank target");
        assert!(err.to_string().contains("no focus target"));

        let config = LoopConfig {
            max_attempts: u32::MAX,
            ..LoopConfig::default()
        };
        let mut huge = open_session("Editor", &goal(), &config, fixture.store.clone());
        let err = ValidationLoop::new(collaborators, config, goal(), &mut huge)
            .err()
            .expect("unbounded attempts");
        assert!(err.to_string().contains("max_attempts must be between"));
        assert!(fixture.focus.targets().is_empty());

        assert_eq!(baseline_label(u32::MAX), format!("s{}", 2 * (u64::from(u32::MAX) - 1)));
        assert_eq!(post_label(u32::MAX), format!("s{}", 2 * u64::from(u32::MAX) - 1));
    }

    #[test]
    fn loop_config_follows_controller_config() {
        let config = ControllerConfig {
            max_attempts: 3,
            attempt_timeout_secs: Some(90),
            command_timeout_secs: 10,
            ..ControllerConfig::default()
        };
        assert_eq!(
            LoopConfig::from(&config),
            LoopConfig {
                max_attempts: 3,
                attempt_timeout: Some(Duration::from_secs(90)),
                command_timeout: Duration::from_secs(10),
            }
        );
        assert_eq!(
            LoopConfig::from(&ControllerConfig::default()),
            LoopConfig::default()
        );
    }

    #[test]
    fn goal_requires_expectation() {
        let err = Goal::new(
            "open settings",
            "",
            ActionRequest::new(Action::pointer_click(1, 1), "open"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no expectation"));
    }
}
