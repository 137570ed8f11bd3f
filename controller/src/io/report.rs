//! Human-readable summary rendered next to each saved session log.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{ActionResult, CaptureResult, EventPayload, SessionEvent};
use crate::io::session_log::SessionLog;

const SUMMARY_TEMPLATE: &str = include_str!("templates/summary.md");

#[derive(Debug, Serialize)]
struct EventRow {
    seq: u64,
    attempt: u32,
    kind: &'static str,
    label: String,
    result: String,
}

impl EventRow {
    fn from_event(event: &SessionEvent) -> Self {
        let (kind, result) = match &event.payload {
            EventPayload::FocusCheck { focused, detail } => (
                "focus_check",
                match detail {
                    Some(detail) => format!("{focused} ({detail})"),
                    None => focused.to_string(),
                },
            ),
            EventPayload::Capture { result } => (
                "capture",
                match result {
                    CaptureResult::Captured { artifact } => {
                        format!("#{} {}", artifact.seq, short(&artifact.digest))
                    }
                    CaptureResult::Failed { error } => format!("failed: {error}"),
                },
            ),
            EventPayload::Action { action, result } => (
                "action",
                match result {
                    ActionResult::Performed => action.to_string(),
                    ActionResult::Failed { error } => format!("{action} failed: {error}"),
                },
            ),
            EventPayload::Evaluation {
                matched, rationale, ..
            } => (
                "evaluation",
                format!("{} ({rationale})", if *matched { "match" } else { "no match" }),
            ),
            EventPayload::Closed { status } => ("closed", status.to_string()),
        };
        Self {
            seq: event.seq,
            attempt: event.attempt,
            kind,
            label: escape_cell(&event.label),
            result: escape_cell(&result),
        }
    }
}

fn short(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

/// Keep free text from breaking the markdown table.
fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Render the markdown summary for `log`.
pub fn render_summary(log: &SessionLog) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("summary", SUMMARY_TEMPLATE)?;
    let rows: Vec<EventRow> = log.events.iter().map(EventRow::from_event).collect();
    let attempts = log.events.last().map_or(0, |event| event.attempt);
    let rendered = env.get_template("summary")?.render(context! {
        session => &log.session,
        status => log.status.as_str(),
        closed_at => log.closed_at.to_rfc3339(),
        head_digest => &log.head_digest,
        attempts => attempts,
        rows => rows,
        artifacts => &log.artifacts,
    })?;
    Ok(rendered)
}
