//! Action executor: performs one input action against the focused target.

use std::time::Duration;

use anyhow::Result;
use minijinja::context;
use tracing::{info, instrument};

use crate::core::types::{Action, ActionRequest};
use crate::error::ControllerError;
use crate::io::config::InputConfig;
use crate::io::focus::FocusConfirmed;
use crate::io::process::run_command;
use crate::io::template::CommandTemplate;

/// Abstraction over input-injection backends.
pub trait ActionExecutor {
    /// Perform `request.action`. Returning `Ok` means the input was delivered,
    /// not that it had the intended visual effect.
    fn execute(&self, request: &ActionRequest, timeout: Duration) -> Result<()>;
}

/// Validate and perform an action in `attempt`.
///
/// `focus` must come from a focus check in the same attempt.
#[instrument(skip_all, fields(action = %request.action, attempt = attempt))]
pub fn execute_action(
    executor: &dyn ActionExecutor,
    focus: FocusConfirmed,
    attempt: u32,
    request: &ActionRequest,
    timeout: Duration,
) -> Result<()> {
    if focus.attempt() != attempt {
        return Err(ControllerError::FocusNotConfirmed { attempt }.into());
    }
    request.validate()?;
    info!(reason = %request.reason, "executing action");
    executor.execute(request, timeout)
}

/// Action executor backed by input commands (e.g. `xdotool`).
pub struct CommandActionExecutor {
    click: CommandTemplate,
    key: CommandTemplate,
    output_limit_bytes: usize,
}

impl CommandActionExecutor {
    pub fn new(config: &InputConfig, output_limit_bytes: usize) -> Result<Self> {
        Ok(Self {
            click: CommandTemplate::new("input.click", config.click.clone())?,
            key: CommandTemplate::new("input.key", config.key.clone())?,
            output_limit_bytes,
        })
    }
}

impl ActionExecutor for CommandActionExecutor {
    fn execute(&self, request: &ActionRequest, timeout: Duration) -> Result<()> {
        let cmd = match &request.action {
            Action::PointerClick { x, y } => self.click.command(context! { x, y })?,
            Action::KeyPress { key } => self.key.command(context! { key })?,
        };
        run_command(cmd, timeout, self.output_limit_bytes)?.ensure_success()
    }
}
