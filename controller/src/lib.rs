//! Visual validation controller.
//!
//! Drives a focus → capture → act → capture → evaluate loop against a desktop
//! application, retrying with caller-supplied corrections until the observed
//! screen matches a stated expectation or the attempt bound is reached. Every
//! step is appended to a hash-chained session log that is saved for audit.
//!
//! - **[`core`]**: Pure, deterministic logic (state machine, hash chain, ordering
//!   invariants). No I/O.
//! - **[`io`]**: Collaborator seams and their process-backed adapters, the blob
//!   store, configuration, and saved session logs.
//!
//! [`validation`] orchestrates a run over an exclusively owned
//! [`session::SessionRecorder`].

pub mod core;
pub mod error;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validation;
