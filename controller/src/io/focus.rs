//! Focus gate: confirms the target owns input focus before any action.
//!
//! The gate performs no retries of its own; retry policy belongs to the
//! validation loop, which re-checks focus at the start of every attempt.

use std::time::Duration;

use anyhow::{Result, bail};
use minijinja::context;
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::io::config::{FocusConfig, window_regex};
use crate::io::process::run_command;
use crate::io::template::CommandTemplate;

/// Parameters for a focus check.
#[derive(Debug, Clone)]
pub struct FocusRequest {
    /// Target application, as named in the session header.
    pub target: String,
    /// Maximum time the gate may spend.
    pub timeout: Duration,
}

/// Abstraction over focus backends.
pub trait FocusGate {
    /// Try to bring the target to the foreground. `Ok(true)` only when focus is
    /// confirmed.
    fn ensure_focus(&self, request: &FocusRequest) -> Result<bool>;
}

/// Proof that focus was confirmed in a specific attempt.
///
/// Only [`check_focus`] constructs it, and the action executor demands one for
/// the attempt it runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusConfirmed {
    attempt: u32,
}

impl FocusConfirmed {
    pub fn attempt(self) -> u32 {
        self.attempt
    }
}

/// Outcome of one gate call, ready to be recorded.
#[derive(Debug, Clone)]
pub struct FocusCheck {
    pub confirmed: Option<FocusConfirmed>,
    /// Why focus was not confirmed, when the gate errored.
    pub detail: Option<String>,
}

/// Run the gate for `attempt`. Gate errors count as "not focused".
#[instrument(skip_all, fields(target = %request.target, attempt = attempt))]
pub fn check_focus(gate: &dyn FocusGate, request: &FocusRequest, attempt: u32) -> FocusCheck {
    match gate.ensure_focus(request) {
        Ok(true) => {
            debug!("focus confirmed");
            FocusCheck {
                confirmed: Some(FocusConfirmed { attempt }),
                detail: None,
            }
        }
        Ok(false) => {
            warn!("target did not take focus");
            FocusCheck {
                confirmed: None,
                detail: None,
            }
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "focus gate failed");
            FocusCheck {
                confirmed: None,
                detail: Some(format!("{err:#}")),
            }
        }
    }
}

/// Focus gate backed by window-manager commands (e.g. `wmctrl` + `xdotool`).
pub struct CommandFocusGate {
    activate: CommandTemplate,
    verify: Option<CommandTemplate>,
    window_pattern: Option<Regex>,
    output_limit_bytes: usize,
}

impl CommandFocusGate {
    pub fn new(config: &FocusConfig, output_limit_bytes: usize) -> Result<Self> {
        let verify = if config.verify.is_empty() {
            None
        } else {
            Some(CommandTemplate::new("focus.verify", config.verify.clone())?)
        };
        let window_pattern = config
            .window_pattern
            .as_deref()
            .map(window_regex)
            .transpose()?;
        Ok(Self {
            activate: CommandTemplate::new("focus.activate", config.activate.clone())?,
            verify,
            window_pattern,
            output_limit_bytes,
        })
    }

    /// Whether the reported window name identifies `target`.
    fn names_target(&self, focused_window: &str, target: &str) -> bool {
        let name = focused_window.trim();
        match &self.window_pattern {
            Some(pattern) => pattern.is_match(name),
            None => name == target.trim(),
        }
    }
}

impl FocusGate for CommandFocusGate {
    fn ensure_focus(&self, request: &FocusRequest) -> Result<bool> {
        let target = request.target.as_str();
        if target.trim().is_empty() {
            bail!("focus target is empty");
        }
        let activate = self.activate.command(context! { target })?;
        let output = run_command(activate, request.timeout, self.output_limit_bytes)?;
        if output.timed_out || !output.status.success() {
            debug!(exit_code = ?output.status.code(), "activation command failed");
            return Ok(false);
        }

        let Some(verify) = &self.verify else {
            return Ok(true);
        };
        let output = run_command(
            verify.command(context! { target })?,
            request.timeout,
            self.output_limit_bytes,
        )?;
        output.ensure_success()?;
        let focused_window = output.stdout_text();
        debug!(%focused_window, "focused window");
        Ok(self.names_target(&focused_window, target))
    }
}
