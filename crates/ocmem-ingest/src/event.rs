// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The closed set of ingestable events.
//!
//! Producers post `{eventType, sessionId, project, data}` envelopes; the
//! gateway flattens them into this tagged union before enqueueing. An
//! unknown type fails deserialization and is dead-lettered by the
//! processor rather than silently dropped.

use serde::{Deserialize, Serialize};

use ocmem_core::types::{ObservationDraft, SessionStatus};

/// One event consumed from the durable ingest queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestEvent {
    /// A session opened (or re-opened).
    SessionStart { session_id: String, project: String },

    /// A session reached a terminal state.
    SessionEnd {
        session_id: String,
        project: String,
        #[serde(default)]
        status: Option<SessionStatus>,
    },

    /// A new observation to append.
    Observation {
        #[serde(flatten)]
        draft: ObservationDraft,
    },

    /// A user prompt to number and record.
    UserPrompt {
        session_id: String,
        project: String,
        text: String,
    },
}

impl IngestEvent {
    /// The session the event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionStart { session_id, .. }
            | Self::SessionEnd { session_id, .. }
            | Self::UserPrompt { session_id, .. } => session_id,
            Self::Observation { draft } => &draft.session_id,
        }
    }

    /// The project the event belongs to.
    pub fn project(&self) -> &str {
        match self {
            Self::SessionStart { project, .. }
            | Self::SessionEnd { project, .. }
            | Self::UserPrompt { project, .. } => project,
            Self::Observation { draft } => &draft.project,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocmem_core::ObservationKind;

    #[test]
    fn tagged_round_trip() {
        let event = IngestEvent::SessionStart {
            session_id: "s-1".into(),
            project: "demo".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session_start");
        let back: IngestEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.session_id(), "s-1");
    }

    #[test]
    fn observation_fields_flatten() {
        let json = serde_json::json!({
            "type": "observation",
            "session_id": "s-1",
            "project": "demo",
            "kind": "bugfix",
            "title": "Fixed panic on empty query",
            "text": "Guarded the tokenizer against empty input",
            "facts": ["empty query no longer panics"]
        });
        let event: IngestEvent = serde_json::from_value(json).unwrap();
        let IngestEvent::Observation { draft } = &event else {
            panic!("expected observation");
        };
        assert_eq!(draft.kind, ObservationKind::Bugfix);
        assert_eq!(event.project(), "demo");
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let json = serde_json::json!({ "type": "telemetry_blob", "session_id": "s" });
        assert!(serde_json::from_value::<IngestEvent>(json).is_err());
    }

    #[test]
    fn session_end_status_is_optional() {
        let json = serde_json::json!({
            "type": "session_end", "session_id": "s", "project": "p"
        });
        let event: IngestEvent = serde_json::from_value(json).unwrap();
        let IngestEvent::SessionEnd { status, .. } = event else {
            panic!("expected session_end");
        };
        assert!(status.is_none());
    }
}
