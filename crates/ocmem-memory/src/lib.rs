// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retrieval pipeline for the opencode-mem memory service.
//!
//! - [`embedder`]: HTTP embedding provider client and the single-consumer
//!   worker that turns observations into stored vectors.
//! - [`ranker`]: pure multi-signal scoring (lexical, semantic, recency,
//!   tag boost).
//! - [`search`]: the orchestrator fanning queries across FTS, semantic,
//!   and fallback strategies.
//! - [`context`]: the token-budgeted context-injection builder.

pub mod context;
pub mod embedder;
pub mod ranker;
pub mod search;

pub use context::{ContextInjection, ContextRequest, build_context, estimate_tokens};
pub use embedder::{EmbeddingStats, EmbeddingWorker, HttpEmbeddingClient, cosine_similarity};
pub use ranker::{RankedObservation, Ranker, RankerWeights, SignalScores, recency_bucket};
pub use search::{SearchDiagnostics, SearchOptions, SearchOrchestrator, SearchOutcome};
