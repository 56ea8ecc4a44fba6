// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live event types broadcast to stream subscribers.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::types::now_ms;

/// Kind of a live event, serialized in snake_case on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionInit,
    SessionStart,
    SessionEnd,
    SessionComplete,
    ObservationAdded,
    UserPrompt,
    MemorySaved,
}

/// A typed event delivered to stream subscribers.
///
/// `project` and `session_id` select the target subscriber set; both unset
/// means broadcast to everyone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub payload: serde_json::Value,
    pub timestamp: i64,
}

impl LiveEvent {
    /// Create an event stamped with the current time.
    pub fn new(
        kind: EventKind,
        project: Option<String>,
        session_id: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            project,
            session_id,
            payload,
            timestamp: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::ObservationAdded).unwrap();
        assert_eq!(json, "\"observation_added\"");
        let json = serde_json::to_string(&EventKind::SessionComplete).unwrap();
        assert_eq!(json, "\"session_complete\"");
    }

    #[test]
    fn live_event_wire_shape() {
        let event = LiveEvent::new(
            EventKind::MemorySaved,
            Some("demo".into()),
            None,
            serde_json::json!({"id": "mem-1"}),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "memory_saved");
        assert_eq!(value["project"], "demo");
        assert!(value.get("session_id").is_none());
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }
}
