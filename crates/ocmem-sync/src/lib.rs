// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! External vector-store replication for the opencode-mem service.

pub mod chroma;
pub mod replicator;

pub use chroma::{ChromaClient, ChromaRecord};
pub use replicator::{ReplayReport, Replicator, SYNC_QUEUE, SyncReport};
