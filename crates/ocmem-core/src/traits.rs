// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams implemented by external collaborators.

use async_trait::async_trait;

use crate::error::OcmemError;
use crate::events::LiveEvent;

/// Produces embedding vectors for text, typically via an HTTP endpoint.
///
/// The provider is non-authoritative: its failure must never block
/// ingestion or lexical search. Callers own retry and dead-letter policy.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OcmemError>;

    /// Identifier of the model producing the vectors.
    fn model(&self) -> &str;
}

/// Receives live events for fan-out to stream subscribers.
///
/// Emission must be non-blocking; implementations buffer or drop rather
/// than stall the producer.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LiveEvent);
}

/// Sink that discards every event. For tests and headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: LiveEvent) {}
}
