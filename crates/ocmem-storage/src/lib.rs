// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the opencode-mem memory service.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a
//! single-writer concurrency model via `tokio-rusqlite`, and typed query
//! modules for sessions, prompts, observations (with their FTS5 mirror),
//! memories, vectors, the durable queue, and replication bookkeeping.

pub mod database;
pub mod migrations;
pub mod queries;

pub use database::Database;
