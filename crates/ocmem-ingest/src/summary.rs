// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-of-session summary compilation.
//!
//! The generator reads a session's observations in time order and maps
//! them into five fixed rubrics by observation kind:
//! task/workflow -> request, research/fact -> investigated,
//! learning/decision -> learned, bugfix/completed -> completed, and the
//! remaining kinds -> next_steps.

use ocmem_core::{Observation, ObservationKind, OcmemError};
use ocmem_storage::Database;
use ocmem_storage::queries::observations;
use ocmem_storage::queries::summaries::{self, SummaryDraft};

/// Character cap for the `request` field.
const REQUEST_CAP: usize = 500;

/// Character cap for the other four fields.
const FIELD_CAP: usize = 1_000;

/// Compile and store the summary for a session.
///
/// Called best-effort at session completion; a session with no
/// observations gets no summary row.
pub async fn generate_from_session(db: &Database, session_id: &str) -> Result<(), OcmemError> {
    let observations = observations::observations_for_session(db, session_id).await?;
    if observations.is_empty() {
        return Ok(());
    }

    let mut request = Vec::new();
    let mut investigated = Vec::new();
    let mut learned = Vec::new();
    let mut completed = Vec::new();
    let mut next_steps = Vec::new();

    for obs in &observations {
        let bucket = match obs.kind {
            ObservationKind::Task | ObservationKind::Workflow => &mut request,
            ObservationKind::Research | ObservationKind::Fact => &mut investigated,
            ObservationKind::Learning | ObservationKind::Decision => &mut learned,
            ObservationKind::Bugfix | ObservationKind::Completed => &mut completed,
            ObservationKind::Config | ObservationKind::Architecture | ObservationKind::General => {
                &mut next_steps
            }
        };
        bucket.push(line_for(obs));
    }

    let draft = SummaryDraft {
        request: compile(request, REQUEST_CAP),
        investigated: compile(investigated, FIELD_CAP),
        learned: compile(learned, FIELD_CAP),
        completed: compile(completed, FIELD_CAP),
        next_steps: compile(next_steps, FIELD_CAP),
    };
    summaries::upsert_summary(db, session_id, draft).await
}

fn line_for(obs: &Observation) -> String {
    match &obs.subtitle {
        Some(subtitle) if !subtitle.is_empty() => format!("{}: {}", obs.title, subtitle),
        _ => obs.title.clone(),
    }
}

/// Join lines and truncate to the field cap on a character boundary.
fn compile(lines: Vec<String>, cap: usize) -> Option<String> {
    if lines.is_empty() {
        return None;
    }
    let joined = lines.join("; ");
    if joined.chars().count() <= cap {
        Some(joined)
    } else {
        Some(joined.chars().take(cap).collect())
    }
}
