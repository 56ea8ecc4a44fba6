// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cursor-driven replication of observations into the external vector
//! collection.
//!
//! Each pass reads observations with `id > cursor`, upserts them with
//! bounded retry, detects content drift via stored content hashes, and
//! records a sync_runs row. Upserts that exhaust their retries are
//! dead-lettered under the `chroma_sync` queue; the cursor still advances
//! past them, and [`Replicator::replay_failed`] re-attempts dead letters
//! on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ocmem_config::model::ChromaConfig;
use ocmem_core::{EmbeddingProvider, Observation, OcmemError, SyncRunStatus};
use ocmem_storage::Database;
use ocmem_storage::queries::{observations, queue, sync};

use crate::chroma::{ChromaClient, ChromaRecord};

/// Queue name recorded on replication dead letters.
pub const SYNC_QUEUE: &str = "chroma_sync";

/// Provider name recorded on sync runs.
const PROVIDER: &str = "chroma";

/// Upsert attempts per observation within a run.
const UPSERT_ATTEMPTS: u32 = 3;

/// Base backoff between upsert attempts; actual is `base * attempt`.
const UPSERT_BACKOFF: Duration = Duration::from_millis(200);

/// Counters for one completed sync pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SyncReport {
    pub synced: i64,
    pub failed: i64,
    pub conflicts: i64,
    pub retries: i64,
    pub duration_ms: u64,
}

/// Counters for one replay pass over dead letters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReplayReport {
    pub replayed: i64,
    pub failed: i64,
}

/// Replicates observations into the external vector collection.
pub struct Replicator {
    db: Database,
    client: Option<ChromaClient>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    config: ChromaConfig,
    is_syncing: AtomicBool,
}

impl Replicator {
    pub fn new(
        db: Database,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        config: ChromaConfig,
    ) -> Result<Self, OcmemError> {
        let client = match &config.url {
            Some(url) => Some(ChromaClient::new(
                url.clone(),
                config.collection.clone(),
                Duration::from_millis(config.timeout_ms),
            )?),
            None => None,
        };
        Ok(Self {
            db,
            client,
            embedder,
            config,
            is_syncing: AtomicBool::new(false),
        })
    }

    /// Whether a collection endpoint is configured.
    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    fn cursor_key(project: Option<&str>) -> String {
        format!("chroma.cursor.{}", project.unwrap_or("__all__"))
    }

    fn hash_key(observation_id: i64) -> String {
        format!("chroma.hash.observation.{observation_id}")
    }

    /// FNV-1a 64-bit over the replicated content, as lowercase hex.
    pub fn content_hash(observation: &Observation) -> String {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in observation
            .title
            .as_bytes()
            .iter()
            .chain(observation.text.as_bytes())
        {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        format!("{hash:016x}")
    }

    fn record_for(&self, observation: &Observation, embedding: Vec<f32>) -> ChromaRecord {
        ChromaRecord {
            id: format!("obs-{}", observation.id),
            document: format!("{} {}", observation.title, observation.text),
            embedding,
            metadata: serde_json::json!({
                "observation_id": observation.id,
                "project": observation.project,
                "session_id": observation.session_id,
                "kind": observation.kind.to_string(),
                "created_at_ms": observation.created_at_ms,
            }),
        }
    }

    /// Run one sync pass.
    ///
    /// Returns `Ok(None)` when a pass is already in flight (non-reentrant
    /// guard). Errors when no collection endpoint is configured.
    pub async fn sync(&self, project: Option<&str>) -> Result<Option<SyncReport>, OcmemError> {
        let Some(client) = &self.client else {
            return Err(OcmemError::validation(
                "FEATURE_OFF",
                "vector-store replication is not configured",
            ));
        };

        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync already in flight, skipping");
            return Ok(None);
        }
        let result = self.sync_inner(client, project).await;
        self.is_syncing.store(false, Ordering::SeqCst);
        result.map(Some)
    }

    async fn sync_inner(
        &self,
        client: &ChromaClient,
        project: Option<&str>,
    ) -> Result<SyncReport, OcmemError> {
        let started = Instant::now();
        let run_id = sync::start_run(&self.db, PROVIDER, project).await?;
        let cursor_key = Self::cursor_key(project);
        let cursor: i64 = sync::get_state(&self.db, &cursor_key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let batch =
            observations::observations_after_id(&self.db, cursor, project, self.config.batch_size)
                .await?;

        let mut report = SyncReport::default();
        let mut max_seen = cursor;

        for observation in &batch {
            let current_hash = Self::content_hash(observation);
            let hash_key = Self::hash_key(observation.id);
            let stored_hash = sync::get_state(&self.db, &hash_key).await?;
            if stored_hash.as_deref().is_some_and(|h| h != current_hash) {
                // Drift from what was previously replicated; re-upsert wins.
                report.conflicts += 1;
            }

            let embedding = match &self.embedder {
                Some(embedder) => {
                    let text = format!("{} {}", observation.title, observation.text);
                    match embedder.embed(&[text]).await {
                        Ok(mut vectors) => vectors.pop().unwrap_or_default(),
                        Err(e) => {
                            debug!(error = %e, "embedding for replication failed, sending empty");
                            Vec::new()
                        }
                    }
                }
                None => Vec::new(),
            };

            let record = self.record_for(observation, embedding);
            match self.upsert_with_retry(client, &record, &mut report.retries).await {
                Ok(()) => {
                    sync::set_state(&self.db, &hash_key, &current_hash).await?;
                    report.synced += 1;
                }
                Err(e) => {
                    warn!(
                        observation_id = observation.id,
                        error = %e,
                        "upsert exhausted retries, dead-lettering"
                    );
                    queue::write_dead_letter(
                        &self.db,
                        SYNC_QUEUE,
                        &observation.id.to_string(),
                        &serde_json::to_string(&record).unwrap_or_default(),
                        "upsert_failed_after_retries",
                    )
                    .await?;
                    report.failed += 1;
                }
            }
            max_seen = max_seen.max(observation.id);
        }

        sync::set_state(&self.db, &cursor_key, &max_seen.to_string()).await?;
        report.duration_ms = started.elapsed().as_millis() as u64;

        let status = if report.failed > 0 {
            SyncRunStatus::Failed
        } else {
            SyncRunStatus::Success
        };
        sync::finish_run(
            &self.db,
            run_id,
            status,
            report.synced,
            report.failed,
            report.conflicts,
            report.retries,
            Some(&format!("{} observation(s) scanned", batch.len())),
        )
        .await?;

        info!(
            synced = report.synced,
            failed = report.failed,
            conflicts = report.conflicts,
            cursor = max_seen,
            "sync pass finished"
        );
        Ok(report)
    }

    async fn upsert_with_retry(
        &self,
        client: &ChromaClient,
        record: &ChromaRecord,
        retries: &mut i64,
    ) -> Result<(), OcmemError> {
        let mut last_error = None;
        for attempt in 1..=UPSERT_ATTEMPTS {
            match client.upsert(std::slice::from_ref(record)).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < UPSERT_ATTEMPTS {
                        *retries += 1;
                        tokio::time::sleep(UPSERT_BACKOFF * attempt).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| OcmemError::Internal("upsert retry underflow".into())))
    }

    /// Re-attempt the oldest `limit` replication dead letters.
    pub async fn replay_failed(&self, limit: usize) -> Result<ReplayReport, OcmemError> {
        let Some(client) = &self.client else {
            return Err(OcmemError::validation(
                "FEATURE_OFF",
                "vector-store replication is not configured",
            ));
        };

        let letters = queue::list_dead_letters(&self.db, Some(SYNC_QUEUE), limit).await?;
        let mut report = ReplayReport::default();

        for letter in letters {
            let Ok(record) = serde_json::from_str::<ChromaRecord>(&letter.payload) else {
                warn!(dead_letter_id = letter.id, "unparseable dead letter, dropping");
                queue::delete_dead_letter(&self.db, letter.id).await?;
                report.failed += 1;
                continue;
            };
            match client.upsert(std::slice::from_ref(&record)).await {
                Ok(()) => {
                    queue::delete_dead_letter(&self.db, letter.id).await?;
                    report.replayed += 1;
                }
                Err(e) => {
                    debug!(dead_letter_id = letter.id, error = %e, "replay attempt failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Best-effort delete of a project's records at the endpoint, then
    /// clear the project cursor.
    pub async fn delete_by_project(&self, project: &str) -> Result<(), OcmemError> {
        if let Some(client) = &self.client
            && let Err(e) = client.delete_by_project(project).await
        {
            warn!(error = %e, project, "remote delete failed (best effort)");
        }
        sync::delete_state(&self.db, &Self::cursor_key(Some(project))).await
    }

    /// Periodic sync loop: fixed interval, no-op when unconfigured,
    /// non-reentrant by the same in-flight guard as manual syncs.
    pub async fn run_periodic(&self, cancel: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        interval.tick().await; // skip the immediate first tick

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.is_configured() {
                        continue;
                    }
                    match self.sync(None).await {
                        Ok(Some(report)) => {
                            debug!(synced = report.synced, "periodic sync tick done");
                        }
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "periodic sync failed (non-fatal)"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("replicator shutting down");
                    break;
                }
            }
        }
    }
}
