// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingestion for the opencode-mem memory service: the durable-queue
//! processor, session lifecycle service, and summary generation.

pub mod event;
pub mod processor;
pub mod session;
pub mod summary;

pub use event::IngestEvent;
pub use processor::{
    DEAD_REASON_RETRIES, DEAD_REASON_UNKNOWN, INGEST_QUEUE, IngestProcessor, IngestStats,
    enqueue_event,
};
pub use session::SessionService;
