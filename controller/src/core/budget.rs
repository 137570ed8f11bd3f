//! Per-attempt time budget helpers.

use std::time::{Duration, Instant};

/// Remaining budget until `deadline`, or `None` once it has passed.
pub fn remaining_budget(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|remaining| !remaining.is_zero())
}

/// Clamp a collaborator timeout to what is left of the attempt budget.
pub fn clamp_timeout(limit: Duration, deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        None => Some(limit),
        Some(deadline) => remaining_budget(deadline).map(|remaining| remaining.min(limit)),
    }
}
