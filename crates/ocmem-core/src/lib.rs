// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the opencode-mem memory service.
//!
//! This crate provides the error type, domain model, live-event types, and
//! the trait seams shared by every other crate in the workspace. It has no
//! I/O of its own.

pub mod error;
pub mod events;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::OcmemError;
pub use events::{EventKind, LiveEvent};
pub use traits::{EmbeddingProvider, EventSink, NullEventSink};
pub use types::{
    DeadLetter, EnqueueOutcome, Memory, Observation, ObservationDraft, ObservationKind,
    PendingMessage, Session, SessionStatus, Summary, SyncRun, SyncRunStatus, UserPrompt, now_ms,
};
