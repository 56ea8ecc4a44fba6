// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP/SSE gateway: the public API surface of the opencode-mem service.
//!
//! Routes, handlers, the live-event broadcaster, and per-route latency
//! accounting. All state is constructor-injected through [`AppState`].

pub mod broadcast;
pub mod error;
pub mod handlers;
pub mod server;
pub mod sse;
pub mod stats;

pub use broadcast::Broadcaster;
pub use server::{AppState, RuntimeSettings, build_router, start_server};
pub use stats::LatencyRecorder;
