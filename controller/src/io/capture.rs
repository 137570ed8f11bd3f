//! Capture service: labeled, content-addressed screenshots.
//!
//! A [`ScreenSource`] grabs raw image bytes; [`CaptureService`] stores them in
//! the blob store and returns an immutable [`Artifact`]. A capture either
//! yields a stored artifact or fails. Empty or oversized grabs are failures,
//! never placeholder artifacts.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use minijinja::context;
use tracing::{debug, instrument};

use crate::core::types::Artifact;
use crate::io::blob_store::BlobStore;
use crate::io::config::CaptureConfig;
use crate::io::process::run_command;
use crate::io::template::CommandTemplate;

/// Parameters for a single screen grab.
#[derive(Debug, Clone)]
pub struct GrabRequest {
    pub label: String,
    pub timeout: Duration,
}

/// Abstraction over screen capture backends.
pub trait ScreenSource {
    /// Return the encoded image bytes of the current screen state.
    fn grab(&self, request: &GrabRequest) -> Result<Vec<u8>>;
}

/// A stored capture plus the bytes handed to the match predicate.
#[derive(Debug, Clone)]
pub struct Observation {
    pub artifact: Artifact,
    pub image: Vec<u8>,
}

/// Turns screen grabs into stored artifacts.
///
/// Sequence numbers are per service, so one service should serve one session.
pub struct CaptureService<'a> {
    screen: &'a dyn ScreenSource,
    store: Arc<dyn BlobStore>,
    max_image_bytes: usize,
    next_seq: AtomicU32,
}

impl<'a> CaptureService<'a> {
    pub fn new(screen: &'a dyn ScreenSource, store: Arc<dyn BlobStore>, max_image_bytes: usize) -> Self {
        Self {
            screen,
            store,
            max_image_bytes,
            next_seq: AtomicU32::new(1),
        }
    }

    /// Grab, validate, and store a screenshot labeled `label`.
    #[instrument(skip_all, fields(label = %label))]
    pub fn capture(&self, label: &str, timeout: Duration) -> Result<Observation> {
        let image = self
            .screen
            .grab(&GrabRequest {
                label: label.to_string(),
                timeout,
            })
            .context("grab screen")?;
        if image.is_empty() {
            bail!("screen source returned no image data");
        }
        if image.len() > self.max_image_bytes {
            bail!(
                "image of {} bytes exceeds limit of {} bytes",
                image.len(),
                self.max_image_bytes
            );
        }

        let digest = self.store.put(&image).context("store capture")?;
        let artifact = Artifact {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            label: label.to_string(),
            captured_at: Utc::now(),
            digest,
            size_bytes: image.len() as u64,
        };
        debug!(seq = artifact.seq, digest = %artifact.digest, "capture stored");
        Ok(Observation { artifact, image })
    }
}

/// Screen source backed by a capture command (e.g. ImageMagick `import`).
pub struct CommandScreenSource {
    command: CommandTemplate,
    from_stdout: bool,
    max_image_bytes: usize,
}

impl CommandScreenSource {
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        let command = CommandTemplate::new("capture.command", config.command.clone())?;
        if !config.from_stdout && !command.references("output") {
            return Err(anyhow!(
                "capture.command must write to {{{{ output }}}} unless from_stdout is set"
            ));
        }
        Ok(Self {
            command,
            from_stdout: config.from_stdout,
            max_image_bytes: config.max_image_bytes,
        })
    }
}

impl ScreenSource for CommandScreenSource {
    fn grab(&self, request: &GrabRequest) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir().context("create capture dir")?;
        let output_path = dir.path().join("capture.png");
        let output = output_path.display().to_string();
        let label = request.label.as_str();
        let cmd = self.command.command(context! { output, label })?;

        // One extra byte lets an oversized stdout image show up as too large
        // instead of silently truncated.
        let result = run_command(cmd, request.timeout, self.max_image_bytes + 1)?;
        result.ensure_success()?;
        if self.from_stdout {
            if result.stdout_truncated > 0 {
                bail!("capture output exceeded {} bytes", self.max_image_bytes);
            }
            return Ok(result.stdout);
        }
        fs::read(&output_path).with_context(|| format!("read capture {}", output_path.display()))
    }
}
