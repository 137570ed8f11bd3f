//! Match predicate boundary.
//!
//! Deciding whether a screenshot shows the expected state is external to the
//! controller. It hands the predicate the post-action capture, the baseline
//! for comparison, and the stated expectation, and treats the verdict as opaque.

use anyhow::Result;

use crate::core::types::{Artifact, Verdict};
use crate::io::capture::Observation;

/// Inputs for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    pub baseline: &'a Observation,
    pub post: &'a Observation,
    /// Expected visual outcome of the goal.
    pub expectation: &'a str,
    /// Reason recorded with the action that was just performed.
    pub reason: &'a str,
}

impl EvaluationRequest<'_> {
    pub fn artifact(&self) -> &Artifact {
        &self.post.artifact
    }
}

/// External judgment of visual state.
pub trait MatchPredicate {
    fn evaluate(&self, request: &EvaluationRequest<'_>) -> Result<Verdict>;
}

impl<F> MatchPredicate for F
where
    F: Fn(&EvaluationRequest<'_>) -> Result<Verdict>,
{
    fn evaluate(&self, request: &EvaluationRequest<'_>) -> Result<Verdict> {
        self(request)
    }
}
