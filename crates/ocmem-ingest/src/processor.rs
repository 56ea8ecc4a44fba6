// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The ingest queue processor.
//!
//! Polls the durable queue, dispatches each message to its handler, and
//! enforces at-least-once semantics: success marks the event processed
//! (by dedup key) before removing the message; failure schedules a retry
//! until the budget is spent, then dead-letters under `session_ingest`.
//! Privacy rejects and unparseable events are terminal: they never retry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ocmem_config::model::IngestConfig;
use ocmem_core::types::{EnqueueOutcome, ObservationDraft, PendingMessage, SessionStatus};
use ocmem_core::{EventKind, EventSink, LiveEvent, OcmemError};
use ocmem_memory::EmbeddingWorker;
use ocmem_privacy::{PrivacyFilter, redact_secrets};
use ocmem_storage::Database;
use ocmem_storage::queries::{observations, prompts, queue, sessions};

use crate::event::IngestEvent;
use crate::session::SessionService;

/// Queue consumed by this processor.
pub const INGEST_QUEUE: &str = "session_ingest";

/// Dead-letter reason when the retry budget is spent.
pub const DEAD_REASON_RETRIES: &str = "max_retries_exceeded";

/// Dead-letter reason for events that fail to parse.
pub const DEAD_REASON_UNKNOWN: &str = "unknown_event_type";

/// Processor counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IngestStats {
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Outcome of one poll tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickReport {
    pub handled: usize,
}

/// Durable-queue consumer dispatching ingest events.
pub struct IngestProcessor {
    db: Database,
    privacy: PrivacyFilter,
    embedding: Option<Arc<EmbeddingWorker>>,
    sessions: Arc<SessionService>,
    events: Arc<dyn EventSink>,
    config: IngestConfig,
    in_flight: AtomicBool,
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Serialize an event and enqueue it durably.
pub async fn enqueue_event(
    db: &Database,
    event: &IngestEvent,
    dedup_key: Option<&str>,
    max_retries: Option<i64>,
    delay_ms: Option<i64>,
) -> Result<EnqueueOutcome, OcmemError> {
    let payload = serde_json::to_value(event)
        .map_err(|e| OcmemError::Internal(format!("event serialization failed: {e}")))?;
    queue::enqueue(
        db,
        INGEST_QUEUE,
        event.session_id(),
        &payload,
        max_retries,
        delay_ms,
        dedup_key,
    )
    .await
}

impl IngestProcessor {
    pub fn new(
        db: Database,
        privacy: PrivacyFilter,
        embedding: Option<Arc<EmbeddingWorker>>,
        sessions: Arc<SessionService>,
        events: Arc<dyn EventSink>,
        config: IngestConfig,
    ) -> Self {
        Self {
            db,
            privacy,
            embedding,
            sessions,
            events,
            config,
            in_flight: AtomicBool::new(false),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> IngestStats {
        IngestStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// One poll tick. Returns `None` when the previous tick is still
    /// running (reentrancy guard).
    pub async fn process_queue(&self) -> Result<Option<TickReport>, OcmemError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("previous ingest tick still running, skipping");
            return Ok(None);
        }
        let result = self.process_batch().await;
        self.in_flight.store(false, Ordering::SeqCst);
        result.map(Some)
    }

    async fn process_batch(&self) -> Result<TickReport, OcmemError> {
        let batch = queue::get_ready(&self.db, Some(INGEST_QUEUE), self.config.batch_size).await?;
        let mut report = TickReport::default();

        for message in batch {
            self.process_message(&message).await?;
            report.handled += 1;
        }
        Ok(report)
    }

    async fn process_message(&self, message: &PendingMessage) -> Result<(), OcmemError> {
        let event: IngestEvent = match serde_json::from_str(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(message_id = message.id, error = %e, "unparseable ingest event");
                queue::write_dead_letter(
                    &self.db,
                    INGEST_QUEUE,
                    &message.entity_id,
                    &message.payload,
                    DEAD_REASON_UNKNOWN,
                )
                .await?;
                queue::mark_processed(&self.db, message.id).await?;
                self.failed.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        };

        if let Some(key) = &message.dedup_key
            && queue::is_event_processed(&self.db, key).await?
        {
            debug!(message_id = message.id, dedup_key = %key, "event already processed");
            queue::mark_processed(&self.db, message.id).await?;
            return Ok(());
        }

        match self.handle(&event).await {
            Ok(()) => {
                if let Some(key) = &message.dedup_key {
                    queue::mark_event_processed(&self.db, key, INGEST_QUEUE, Some(&message.entity_id))
                        .await?;
                }
                queue::mark_processed(&self.db, message.id).await?;
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e @ (OcmemError::Validation { .. } | OcmemError::Blocked { .. })) => {
                // Privacy and validation rejects are permanent: no retry,
                // no partial persist.
                warn!(message_id = message.id, reason = %e, "ingest event rejected");
                queue::mark_processed(&self.db, message.id).await?;
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(message_id = message.id, error = %e, "ingest handler failed");
                let will_retry =
                    queue::increment_retry(&self.db, message.id, Some(self.config.retry_delay_ms))
                        .await?;
                if !will_retry {
                    queue::write_dead_letter(
                        &self.db,
                        INGEST_QUEUE,
                        &message.entity_id,
                        &message.payload,
                        DEAD_REASON_RETRIES,
                    )
                    .await?;
                    queue::mark_processed(&self.db, message.id).await?;
                }
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn handle(&self, event: &IngestEvent) -> Result<(), OcmemError> {
        match event {
            IngestEvent::SessionStart {
                session_id,
                project,
            } => {
                self.sessions.init_session(session_id, project).await?;
                self.events.emit(LiveEvent::new(
                    EventKind::SessionStart,
                    Some(project.clone()),
                    Some(session_id.clone()),
                    serde_json::json!({ "sessionId": session_id }),
                ));
                Ok(())
            }
            IngestEvent::SessionEnd {
                session_id,
                project,
                status,
            } => {
                self.sessions
                    .complete_session(
                        session_id,
                        project,
                        status.unwrap_or(SessionStatus::Completed),
                    )
                    .await?;
                self.events.emit(LiveEvent::new(
                    EventKind::SessionEnd,
                    Some(project.clone()),
                    Some(session_id.clone()),
                    serde_json::json!({ "sessionId": session_id }),
                ));
                Ok(())
            }
            IngestEvent::Observation { draft } => self.handle_observation(draft).await,
            IngestEvent::UserPrompt {
                session_id,
                project,
                text,
            } => {
                let clean = self.privacy.sanitize(text)?;
                sessions::ensure_session(&self.db, session_id, project).await?;
                let prompt = prompts::insert_user_prompt(&self.db, session_id, &clean.text).await?;
                self.events.emit(LiveEvent::new(
                    EventKind::UserPrompt,
                    Some(project.clone()),
                    Some(session_id.clone()),
                    serde_json::json!({
                        "sessionId": session_id,
                        "promptNumber": prompt.prompt_number,
                    }),
                ));
                Ok(())
            }
        }
    }

    async fn handle_observation(&self, draft: &ObservationDraft) -> Result<(), OcmemError> {
        let title = self.privacy.sanitize(&draft.title)?;
        let text = self.privacy.sanitize(&draft.text)?;

        let mut clean = draft.clone();
        clean.title = title.text;
        clean.text = text.text;
        clean.subtitle = clean.subtitle.map(|s| redact_secrets(&s).0);
        clean.facts = clean.facts.iter().map(|f| redact_secrets(f).0).collect();

        sessions::ensure_session(&self.db, &clean.session_id, &clean.project).await?;
        let observation = observations::insert_observation(&self.db, clean).await?;

        if let Some(worker) = &self.embedding {
            worker.enqueue(observation.id);
        }

        info!(
            observation_id = observation.id,
            session_id = %observation.session_id,
            kind = %observation.kind,
            "observation appended"
        );
        self.events.emit(LiveEvent::new(
            EventKind::ObservationAdded,
            Some(observation.project.clone()),
            Some(observation.session_id.clone()),
            serde_json::json!({
                "id": observation.id,
                "title": observation.title,
                "kind": observation.kind,
            }),
        ));
        Ok(())
    }

    /// Poll loop: one tick per interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(10)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.process_queue().await {
                        Ok(Some(report)) if report.handled > 0 => {
                            debug!(handled = report.handled, "ingest tick done");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "ingest tick failed (non-fatal)"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("ingest processor shutting down");
                    break;
                }
            }
        }
    }
}
