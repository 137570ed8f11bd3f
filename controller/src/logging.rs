//! Diagnostic tracing for operators watching a validation run.
//!
//! Each attempt's collaborator calls run inside `#[instrument]` spans carrying
//! the session id, target and attempt number. State transitions are emitted at
//! `debug`, terminal outcomes at `info`, and retries, deadline overruns and
//! collaborator failures at `warn`. Sessions may run on separate threads, so
//! lines carry the thread name.
//!
//! None of this output is part of the audit trail. The saved session log
//! (`io/session_log`) is written regardless of `RUST_LOG`.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the stderr subscriber with [`DEFAULT_DIRECTIVE`].
///
/// ```bash
/// RUST_LOG=controller::validation=debug cargo test -p controller
/// ```
pub fn init() -> Result<()> {
    init_with(DEFAULT_DIRECTIVE)
}

/// Install the stderr subscriber, falling back to `default_directive` when
/// `RUST_LOG` is unset. Fails if the host already installed a global
/// subscriber.
pub fn init_with(default_directive: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter(default_directive))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .compact(),
        )
        .try_init()?;
    Ok(())
}

fn filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}
