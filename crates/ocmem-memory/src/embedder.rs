// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding production: HTTP provider client and the in-process worker.
//!
//! The worker owns a bounded-attempt in-memory FIFO. Ingestion pushes
//! observation ids; a single consumer loop embeds `title + " " + text`
//! (truncated to 8000 chars) and stores the vector. Provider failures back
//! off per attempt and dead-letter after the attempt budget; they never
//! block ingestion or lexical search.

use std::collections::VecDeque;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ocmem_config::model::EmbeddingConfig;
use ocmem_core::{EmbeddingProvider, OcmemError};
use ocmem_storage::Database;
use ocmem_storage::queries::{observations, queue, vectors};

/// Queue name recorded on embedding dead letters.
pub const EMBEDDING_QUEUE: &str = "embedding_queue";

/// Dead-letter reason after the attempt budget is spent.
pub const EMBEDDING_DEAD_REASON: &str = "embedding_failed_after_retries";

/// Input text cap sent to the provider.
const MAX_EMBED_CHARS: usize = 8_000;

/// Wire request for the pluggable embedding endpoint.
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Wire response from the embedding endpoint.
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP client for the configured embedding endpoint.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl HttpEmbeddingClient {
    pub fn new(endpoint: String, model: String, timeout: Duration) -> Result<Self, OcmemError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OcmemError::Provider {
                message: format!("failed to build embedding HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            endpoint,
            model,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OcmemError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| OcmemError::Provider {
                message: format!("embedding request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcmemError::Provider {
                message: format!("embedding endpoint returned {status}: {body}"),
                source: None,
            });
        }

        let parsed: EmbedResponse = response.json().await.map_err(|e| OcmemError::Provider {
            message: format!("failed to parse embedding response: {e}"),
            source: Some(Box::new(e)),
        })?;

        if parsed.embeddings.len() != texts.len() {
            return Err(OcmemError::Provider {
                message: format!(
                    "embedding count mismatch: {} inputs, {} vectors",
                    texts.len(),
                    parsed.embeddings.len()
                ),
                source: None,
            });
        }
        Ok(parsed.embeddings)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Cosine similarity between two vectors of equal length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueItem {
    observation_id: i64,
    attempt: u32,
}

/// Worker counters, surfaced through queue diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EmbeddingStats {
    pub enqueued: u64,
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub pending: u64,
    pub max_depth: u64,
}

/// Single-consumer embedding worker over an in-memory FIFO.
pub struct EmbeddingWorker {
    db: Database,
    provider: std::sync::Arc<dyn EmbeddingProvider>,
    config: EmbeddingConfig,
    fifo: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
    enqueued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    max_depth: AtomicU64,
}

impl EmbeddingWorker {
    pub fn new(
        db: Database,
        provider: std::sync::Arc<dyn EmbeddingProvider>,
        config: EmbeddingConfig,
    ) -> Self {
        Self {
            db,
            provider,
            config,
            fifo: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            enqueued: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            max_depth: AtomicU64::new(0),
        }
    }

    /// Queue an observation for embedding. Already-queued ids are a no-op.
    pub fn enqueue(&self, observation_id: i64) {
        self.push(QueueItem {
            observation_id,
            attempt: 1,
        });
    }

    fn push(&self, item: QueueItem) {
        {
            let mut fifo = self.fifo.lock().expect("embedding fifo poisoned");
            if fifo.iter().any(|i| i.observation_id == item.observation_id) {
                return;
            }
            fifo.push_back(item);
            let depth = fifo.len() as u64;
            self.max_depth.fetch_max(depth, Ordering::Relaxed);
        }
        if item.attempt == 1 {
            self.enqueued.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<QueueItem> {
        self.fifo.lock().expect("embedding fifo poisoned").pop_front()
    }

    /// Enqueue the most recent observations still lacking a vector.
    pub async fn backfill(&self, limit: usize) -> Result<usize, OcmemError> {
        let missing = observations::recent_missing_vectors(&self.db, limit).await?;
        let count = missing.len();
        for id in missing {
            self.enqueue(id);
        }
        Ok(count)
    }

    /// Current counters.
    pub fn stats(&self) -> EmbeddingStats {
        EmbeddingStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            pending: self.fifo.lock().expect("embedding fifo poisoned").len() as u64,
            max_depth: self.max_depth.load(Ordering::Relaxed),
        }
    }

    /// Single consumer loop. Runs until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.pop() {
                Some(item) => {
                    if let Err(e) = self.process(item, &cancel).await {
                        warn!(error = %e, observation_id = item.observation_id,
                              "embedding item processing errored");
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }
        debug!("embedding worker stopped");
    }

    /// Drain the FIFO without waiting. Test and shutdown helper.
    pub async fn drain(&self) {
        let never = CancellationToken::new();
        while let Some(item) = self.pop() {
            if let Err(e) = self.process(item, &never).await {
                warn!(error = %e, "embedding drain item errored");
            }
        }
    }

    async fn process(&self, item: QueueItem, cancel: &CancellationToken) -> Result<(), OcmemError> {
        if vectors::has_vector(&self.db, item.observation_id).await? {
            return Ok(());
        }
        let Some(obs) = observations::get_observation(&self.db, item.observation_id).await? else {
            return Ok(());
        };

        let input: String = format!("{} {}", obs.title, obs.text)
            .chars()
            .take(MAX_EMBED_CHARS)
            .collect();

        match self.provider.embed(&[input]).await {
            Ok(mut embeddings) => {
                let embedding = embeddings.pop().unwrap_or_default();
                vectors::upsert_vector(
                    &self.db,
                    item.observation_id,
                    &embedding,
                    self.provider.model(),
                )
                .await?;
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if item.attempt >= self.config.max_attempts => {
                warn!(
                    observation_id = item.observation_id,
                    attempts = item.attempt,
                    error = %e,
                    "embedding exhausted retries, dead-lettering"
                );
                queue::write_dead_letter(
                    &self.db,
                    EMBEDDING_QUEUE,
                    &item.observation_id.to_string(),
                    &serde_json::json!({ "observation_id": item.observation_id }).to_string(),
                    EMBEDDING_DEAD_REASON,
                )
                .await?;
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                debug!(
                    observation_id = item.observation_id,
                    attempt = item.attempt,
                    error = %e,
                    "embedding attempt failed, backing off"
                );
                let delay =
                    Duration::from_millis(self.config.retry_delay_ms * item.attempt as u64);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Ok(()),
                }
                self.retried.fetch_add(1, Ordering::Relaxed);
                self.push(QueueItem {
                    observation_id: item.observation_id,
                    attempt: item.attempt + 1,
                });
            }
        }
        Ok(())
    }

    /// Semantic search: embed the query, compare against every stored
    /// vector for the project, return the top `k` as id -> similarity.
    pub async fn semantic_search(
        &self,
        query: &str,
        project: &str,
        k: usize,
    ) -> Result<HashMap<i64, f64>, OcmemError> {
        let mut query_vecs = self.provider.embed(&[query.to_string()]).await?;
        let query_vec = query_vecs.pop().unwrap_or_default();

        let stored = vectors::vectors_for_project(&self.db, project).await?;
        let mut scored: Vec<(i64, f64)> = stored
            .into_iter()
            .map(|(id, vec)| (id, cosine_similarity(&query_vec, &vec)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    use ocmem_core::ObservationDraft;
    use ocmem_storage::queries::sessions::init_session;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Provider that fails a configurable number of times before succeeding.
    struct FlakyProvider {
        failures: AtomicU32,
        vector: Vec<f32>,
    }

    impl FlakyProvider {
        fn new(failures: u32, vector: Vec<f32>) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                vector,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OcmemError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(OcmemError::Provider {
                    message: "simulated outage".into(),
                    source: None,
                });
            }
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }

        fn model(&self) -> &str {
            "flaky-test-model"
        }
    }

    async fn setup_db_with_observation(text: &str) -> (Database, i64) {
        let db = Database::open_in_memory().await.unwrap();
        init_session(&db, "sess-1", "demo").await.unwrap();
        let obs = observations::insert_observation(
            &db,
            ObservationDraft {
                session_id: "sess-1".into(),
                project: "demo".into(),
                title: "title".into(),
                text: text.into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        (db, obs.id)
    }

    fn fast_config() -> EmbeddingConfig {
        EmbeddingConfig {
            retry_delay_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn processes_enqueued_observation() {
        let (db, obs_id) = setup_db_with_observation("some text").await;
        let worker = EmbeddingWorker::new(
            db.clone(),
            Arc::new(FlakyProvider::new(0, vec![0.1, 0.2, 0.3])),
            fast_config(),
        );

        worker.enqueue(obs_id);
        worker.drain().await;

        assert!(vectors::has_vector(&db, obs_id).await.unwrap());
        let stats = worker.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_noop() {
        let (db, obs_id) = setup_db_with_observation("text").await;
        let worker = EmbeddingWorker::new(
            db,
            Arc::new(FlakyProvider::new(0, vec![0.5])),
            fast_config(),
        );

        worker.enqueue(obs_id);
        worker.enqueue(obs_id);
        let stats = worker.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let (db, obs_id) = setup_db_with_observation("text").await;
        let worker = EmbeddingWorker::new(
            db.clone(),
            Arc::new(FlakyProvider::new(2, vec![0.7])),
            fast_config(),
        );

        worker.enqueue(obs_id);
        worker.drain().await;

        assert!(vectors::has_vector(&db, obs_id).await.unwrap());
        let stats = worker.stats();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter() {
        let (db, obs_id) = setup_db_with_observation("text").await;
        let worker = EmbeddingWorker::new(
            db.clone(),
            Arc::new(FlakyProvider::new(10, vec![0.7])),
            fast_config(),
        );

        worker.enqueue(obs_id);
        worker.drain().await;

        assert!(!vectors::has_vector(&db, obs_id).await.unwrap());
        let letters = queue::list_dead_letters(&db, Some(EMBEDDING_QUEUE), 10)
            .await
            .unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, EMBEDDING_DEAD_REASON);
        assert_eq!(worker.stats().failed, 1);
    }

    #[tokio::test]
    async fn backfill_picks_up_unembedded_rows() {
        let (db, _obs_id) = setup_db_with_observation("text").await;
        let worker = EmbeddingWorker::new(
            db.clone(),
            Arc::new(FlakyProvider::new(0, vec![1.0, 0.0])),
            fast_config(),
        );

        let queued = worker.backfill(50).await.unwrap();
        assert_eq!(queued, 1);
        worker.drain().await;
        assert_eq!(vectors::count_vectors(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn semantic_search_ranks_by_cosine() {
        let db = Database::open_in_memory().await.unwrap();
        init_session(&db, "sess-1", "demo").await.unwrap();
        let mut ids = Vec::new();
        for title in ["a", "b"] {
            let obs = observations::insert_observation(
                &db,
                ObservationDraft {
                    session_id: "sess-1".into(),
                    project: "demo".into(),
                    title: title.into(),
                    text: "text".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
            ids.push(obs.id);
        }
        vectors::upsert_vector(&db, ids[0], &[1.0, 0.0], "m").await.unwrap();
        vectors::upsert_vector(&db, ids[1], &[0.0, 1.0], "m").await.unwrap();

        // Query vector aligned with the first observation.
        let worker = EmbeddingWorker::new(
            db,
            Arc::new(FlakyProvider::new(0, vec![1.0, 0.0])),
            fast_config(),
        );
        let scores = worker.semantic_search("anything", "demo", 10).await.unwrap();
        assert!((scores[&ids[0]] - 1.0).abs() < 1e-6);
        assert!(scores[&ids[1]].abs() < 1e-6);
    }

    #[tokio::test]
    async fn http_client_round_trips() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2], [0.3, 0.4]]
            })))
            .mount(&server)
            .await;

        let client = HttpEmbeddingClient::new(
            format!("{}/embed", server.uri()),
            "test-model".into(),
            Duration::from_secs(2),
        )
        .unwrap();

        let vectors = client
            .embed(&["one".to_string(), "two".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![0.3, 0.4]);
    }

    #[tokio::test]
    async fn http_client_surfaces_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpEmbeddingClient::new(
            format!("{}/embed", server.uri()),
            "test-model".into(),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = client.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("503"), "got: {err}");
    }

    #[tokio::test]
    async fn http_client_rejects_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1]]
            })))
            .mount(&server)
            .await;

        let client = HttpEmbeddingClient::new(
            format!("{}/embed", server.uri()),
            "test-model".into(),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = client
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("mismatch"), "got: {err}");
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
