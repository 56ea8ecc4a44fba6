// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across the opencode-mem workspace.
//!
//! All timestamps are UTC epoch milliseconds (`i64`). Identifiers coming
//! from the host (session ids, memory ids) are opaque strings; rows owned
//! by the store use SQLite rowids.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Current UTC time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Lifecycle state of a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session is open and receiving events.
    Active,
    /// Session finished normally. Terminal.
    Completed,
    /// Session ended abnormally (crash, abort). Terminal.
    Failed,
}

/// A coding session, created on first reference and completed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session identifier assigned by the host.
    pub session_id: String,
    /// Project this session belongs to.
    pub project: String,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// When the session was opened.
    pub started_at_ms: i64,
    /// When the session reached a terminal state. `None` while active.
    pub completed_at_ms: Option<i64>,
}

/// Category of an observation or memory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ObservationKind {
    Bugfix,
    Decision,
    Fact,
    Workflow,
    Config,
    Architecture,
    Learning,
    Task,
    Research,
    Completed,
    General,
}

impl Default for ObservationKind {
    fn default() -> Self {
        Self::General
    }
}

/// An append-only record of something noteworthy during a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Store-assigned rowid.
    pub id: i64,
    /// Session that produced this observation.
    pub session_id: String,
    /// Project the session belongs to.
    pub project: String,
    /// Observation category.
    pub kind: ObservationKind,
    /// Short action description.
    pub title: String,
    /// One-sentence elaboration.
    pub subtitle: Option<String>,
    /// Full narrative text.
    pub text: String,
    /// Concise factual statements.
    pub facts: Vec<String>,
    /// Files read while producing this observation.
    pub files_read: Vec<String>,
    /// Files modified while producing this observation.
    pub files_modified: Vec<String>,
    /// Prompt the observation was generated under, if known.
    pub prompt_number: Option<i64>,
    /// Insertion timestamp.
    pub created_at_ms: i64,
}

/// Fields supplied by the producer when appending an observation.
///
/// The store assigns `id` and `created_at_ms`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationDraft {
    pub session_id: String,
    pub project: String,
    #[serde(default)]
    pub kind: ObservationKind,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub text: String,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub prompt_number: Option<i64>,
}

/// A user prompt within a session, numbered server-side from 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPrompt {
    pub id: i64,
    pub session_id: String,
    pub prompt_number: i64,
    pub text: String,
    pub created_at_ms: i64,
}

/// A free-form knowledge item, possibly handwritten.
///
/// Memories feed the context-injection path; observations feed search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Opaque identifier (uuid for system-created memories).
    pub id: String,
    pub project: String,
    pub content: String,
    /// Short display form, preferred over `content` when present.
    pub summary: Option<String>,
    pub kind: ObservationKind,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Session that produced this memory, if any.
    pub session_id: Option<String>,
    pub created_at_ms: i64,
}

/// Per-session rollup compiled at completion, one row per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub session_id: String,
    pub request: Option<String>,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub created_at_ms: i64,
}

/// A durable queue entry awaiting processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: i64,
    pub queue_name: String,
    pub entity_id: String,
    /// JSON payload, opaque to the queue.
    pub payload: String,
    pub dedup_key: Option<String>,
    pub retry_count: i64,
    pub max_retries: i64,
    pub created_at_ms: i64,
    /// Earliest time the entry becomes visible again. `None` = immediately.
    pub next_retry_at_ms: Option<i64>,
}

/// Outcome of a durable enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new pending row was inserted.
    Queued(i64),
    /// A pending row with the same `(queue_name, dedup_key)` already
    /// existed; its id is returned.
    Coalesced(i64),
    /// The dedup key was already marked processed; nothing was enqueued.
    Duplicate,
}

impl EnqueueOutcome {
    /// The pending message id, or `-1` for the duplicate sentinel.
    pub fn message_id(&self) -> i64 {
        match self {
            Self::Queued(id) | Self::Coalesced(id) => *id,
            Self::Duplicate => -1,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

/// Terminal resting place for a message that exhausted its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: i64,
    pub queue_name: String,
    pub entity_id: String,
    pub payload: String,
    pub reason: String,
    pub created_at_ms: i64,
}

/// Outcome state of a replication run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    Running,
    Success,
    Failed,
}

/// Bookkeeping row for one replication pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: i64,
    pub provider: String,
    pub project: Option<String>,
    pub status: SyncRunStatus,
    pub synced_count: i64,
    pub failed_count: i64,
    pub conflict_count: i64,
    pub retry_count: i64,
    pub started_at_ms: i64,
    pub ended_at_ms: Option<i64>,
    pub details: Option<String>,
}

/// Convert an f32 vector to little-endian bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert a stored BLOB back to an f32 vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn session_status_round_trips() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            let s = status.to_string();
            assert_eq!(SessionStatus::from_str(&s).unwrap(), status);
        }
    }

    #[test]
    fn observation_kind_parses_case_insensitive() {
        assert_eq!(
            ObservationKind::from_str("Bugfix").unwrap(),
            ObservationKind::Bugfix
        );
        assert_eq!(
            ObservationKind::from_str("decision").unwrap(),
            ObservationKind::Decision
        );
        assert!(ObservationKind::from_str("nonsense").is_err());
    }

    #[test]
    fn observation_kind_defaults_to_general() {
        assert_eq!(ObservationKind::default(), ObservationKind::General);
    }

    #[test]
    fn draft_deserializes_with_minimal_fields() {
        let json = r#"{
            "session_id": "s-1",
            "project": "demo",
            "title": "Fixed the retry loop",
            "text": "Retries now back off exponentially"
        }"#;
        let draft: ObservationDraft = serde_json::from_str(json).unwrap();
        assert_eq!(draft.kind, ObservationKind::General);
        assert!(draft.facts.is_empty());
        assert!(draft.prompt_number.is_none());
    }

    #[test]
    fn enqueue_outcome_sentinel() {
        assert_eq!(EnqueueOutcome::Queued(7).message_id(), 7);
        assert_eq!(EnqueueOutcome::Coalesced(7).message_id(), 7);
        assert_eq!(EnqueueOutcome::Duplicate.message_id(), -1);
        assert!(EnqueueOutcome::Duplicate.is_duplicate());
    }

    #[test]
    fn blob_round_trip() {
        let original = vec![0.25_f32, -1.5, 3.75, 0.0];
        let blob = vec_to_blob(&original);
        assert_eq!(blob.len(), 16);
        let recovered = blob_to_vec(&blob);
        assert_eq!(original, recovered);
    }

    #[test]
    fn now_ms_is_plausible() {
        // Any date after 2020-01-01 in milliseconds.
        assert!(now_ms() > 1_577_836_800_000);
    }
}
