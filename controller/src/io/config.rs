//! Controller configuration stored as TOML (e.g. `controller.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Controller configuration (TOML).
///
/// Missing fields default to the values below. The per-attempt timeout has no
/// default: attempts are only bounded by `max_attempts` unless one is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Maximum action/observe/evaluate cycles per validation run.
    pub max_attempts: u32,

    /// Optional wall-clock budget for a single attempt, in seconds.
    pub attempt_timeout_secs: Option<u64>,

    /// Upper bound for any single external command, in seconds.
    pub command_timeout_secs: u64,

    /// Truncate command stdout/stderr beyond this many bytes.
    pub command_output_limit_bytes: usize,

    pub focus: FocusConfig,
    pub capture: CaptureConfig,
    pub input: InputConfig,
}

/// Upper bound accepted for `max_attempts`.
pub const MAX_ATTEMPTS_LIMIT: u32 = 1_000;

/// Commands backing the focus gate. Templates see `{{ target }}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FocusConfig {
    /// Raise and focus the target window.
    pub activate: Vec<String>,
    /// Print the focused window's name. Focus is confirmed when the trimmed
    /// output equals the target. Empty means activation success is
    /// confirmation.
    pub verify: Vec<String>,
    /// Regex the whole focused window name must match instead of equality,
    /// for applications that decorate their titles.
    pub window_pattern: Option<String>,
}

/// Command backing the screen source. Templates see `{{ output }}` and `{{ label }}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CaptureConfig {
    pub command: Vec<String>,
    /// Read the image from stdout instead of `{{ output }}`.
    pub from_stdout: bool,
    /// Captures larger than this are rejected rather than truncated.
    pub max_image_bytes: usize,
}

/// Commands backing the action executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InputConfig {
    /// Pointer click; templates see `{{ x }}` and `{{ y }}`.
    pub click: Vec<String>,
    /// Key press; templates see `{{ key }}`.
    pub key: Vec<String>,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            activate: argv(&["wmctrl", "-a", "{{ target }}"]),
            verify: argv(&["xdotool", "getactivewindow", "getwindowname"]),
            window_pattern: None,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            command: argv(&["import", "-window", "root", "{{ output }}"]),
            from_stdout: false,
            max_image_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            click: argv(&["xdotool", "mousemove", "{{ x }}", "{{ y }}", "click", "1"]),
            key: argv(&["xdotool", "key", "{{ key }}"]),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout_secs: None,
            command_timeout_secs: 30,
            command_output_limit_bytes: 100_000,
            focus: FocusConfig::default(),
            capture: CaptureConfig::default(),
            input: InputConfig::default(),
        }
    }
}

/// Compile a focus window pattern so that it must match the whole name.
pub fn window_regex(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$"))
        .with_context(|| format!("focus.window_pattern '{pattern}' is not a valid regex"))
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_string()).collect()
}

fn require_command(name: &str, command: &[String]) -> Result<()> {
    if command.is_empty() || command[0].trim().is_empty() {
        return Err(anyhow!("{name} must be a non-empty array"));
    }
    Ok(())
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(anyhow!(
                "max_attempts must be between 1 and {MAX_ATTEMPTS_LIMIT}"
            ));
        }
        if self.attempt_timeout_secs == Some(0) {
            return Err(anyhow!("attempt_timeout_secs must be > 0 when set"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.command_output_limit_bytes == 0 {
            return Err(anyhow!("command_output_limit_bytes must be > 0"));
        }
        if self.capture.max_image_bytes == 0 {
            return Err(anyhow!("capture.max_image_bytes must be > 0"));
        }
        require_command("focus.activate", &self.focus.activate)?;
        if let Some(pattern) = &self.focus.window_pattern {
            window_regex(pattern)?;
        }
        require_command("capture.command", &self.capture.command)?;
        require_command("input.click", &self.input.click)?;
        require_command("input.key", &self.input.key)?;
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_secs.map(Duration::from_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ControllerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ControllerConfig> {
    if !path.exists() {
        let cfg = ControllerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ControllerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ControllerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
