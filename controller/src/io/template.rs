//! Argv templates for command-backed collaborators.
//!
//! Each configured argument is rendered independently with minijinja and the
//! result is passed to the child as a single argv entry. No shell is involved,
//! so rendered values cannot split into extra arguments.

use std::process::Command;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

/// A command line whose arguments may reference template variables.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    name: &'static str,
    argv: Vec<String>,
}

impl CommandTemplate {
    pub fn new(name: &'static str, argv: Vec<String>) -> Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("{name} command must not be empty"));
        }
        Ok(Self { name, argv })
    }

    /// Whether any argument mentions `variable`.
    pub fn references(&self, variable: &str) -> bool {
        self.argv.iter().any(|arg| arg.contains(variable))
    }

    /// Render every argument with `ctx`. Unknown variables are errors.
    pub fn render<S: Serialize>(&self, ctx: S) -> Result<Vec<String>> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        let ctx = minijinja::Value::from_serialize(&ctx);
        self.argv
            .iter()
            .map(|arg| {
                env.render_str(arg, &ctx)
                    .with_context(|| format!("render {} argument '{arg}'", self.name))
            })
            .collect()
    }

    /// Render into a ready-to-spawn [`Command`].
    pub fn command<S: Serialize>(&self, ctx: S) -> Result<Command> {
        let argv = self.render(ctx)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("{} command rendered empty", self.name))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        Ok(cmd)
    }
}
