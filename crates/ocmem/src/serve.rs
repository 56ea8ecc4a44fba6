// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ocmem serve` command implementation.
//!
//! Construction is sequenced: config, then the store (migrations are
//! fatal), then the queue workers, then the HTTP server. All subsystems
//! are explicit `Arc` handles; the cancellation token from the signal
//! handler stops the poll loops before the store is closed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ocmem_config::{load_config, load_config_from_str};
use ocmem_core::{EmbeddingProvider, EventSink, OcmemError};
use ocmem_gateway::{AppState, Broadcaster, LatencyRecorder, RuntimeSettings, start_server};
use ocmem_ingest::{IngestProcessor, SessionService};
use ocmem_memory::{EmbeddingWorker, HttpEmbeddingClient, Ranker, SearchOrchestrator};
use ocmem_privacy::PrivacyFilter;
use ocmem_storage::Database;
use ocmem_storage::queries::sessions;
use ocmem_sync::Replicator;

/// Observations considered for embedding backfill at startup.
const BACKFILL_LIMIT: usize = 100;

/// Run the `serve` command until a shutdown signal.
pub async fn run_serve(config_path: Option<PathBuf>) -> Result<(), OcmemError> {
    let config = match config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                OcmemError::Config(format!("cannot read {}: {e}", path.display()))
            })?;
            load_config_from_str(&raw)
                .map_err(|e| OcmemError::Config(format!("invalid config: {e}")))?
        }
        None => load_config().map_err(|e| OcmemError::Config(format!("invalid config: {e}")))?,
    };

    init_tracing(&config.server.log_level);
    info!("starting opencode-mem serve");

    // Store first: a migration failure must abort startup.
    let db_path = config.storage.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            OcmemError::Config(format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    let db = Database::open(&db_path).await?;
    info!(path = %db_path.display(), "database ready");

    // Crash recovery: sessions left active by a previous process.
    let swept = sessions::sweep_stale_sessions(&db).await?;
    if swept > 0 {
        info!(count = swept, "marked stale sessions as failed");
    }

    let broadcaster = Arc::new(Broadcaster::new());
    let events: Arc<dyn EventSink> = broadcaster.clone();

    // Embedding is optional; its absence degrades search to lexical only.
    let (embedding_worker, embedding_provider) = if config.embedding.is_active() {
        let endpoint = config.embedding.endpoint.clone().unwrap_or_default();
        let client = Arc::new(HttpEmbeddingClient::new(
            endpoint,
            config.embedding.model.clone(),
            Duration::from_millis(config.embedding.timeout_ms),
        )?);
        let worker = Arc::new(EmbeddingWorker::new(
            db.clone(),
            client.clone(),
            config.embedding.clone(),
        ));
        match worker.backfill(BACKFILL_LIMIT).await {
            Ok(queued) if queued > 0 => info!(queued, "embedding backfill queued"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "embedding backfill failed (non-fatal)"),
        }
        (
            Some(worker),
            Some(client as Arc<dyn EmbeddingProvider>),
        )
    } else {
        info!("embeddings disabled (no endpoint configured)");
        (None, None)
    };

    let session_service = Arc::new(SessionService::new(db.clone(), events.clone()));
    let processor = Arc::new(IngestProcessor::new(
        db.clone(),
        PrivacyFilter::new(config.privacy.strip_private_tags),
        embedding_worker.clone(),
        session_service.clone(),
        events.clone(),
        config.ingest.clone(),
    ));
    let search = Arc::new(SearchOrchestrator::new(
        db.clone(),
        embedding_worker.clone(),
        Ranker::default(),
    ));
    let replicator = Arc::new(Replicator::new(
        db.clone(),
        embedding_provider,
        config.chroma.clone(),
    )?);
    if replicator.is_configured() {
        info!(
            interval_secs = config.chroma.interval_secs,
            "vector-store replication enabled"
        );
    } else {
        info!("vector-store replication disabled (no url configured)");
    }

    let cancel = install_signal_handler();
    let queue_running = Arc::new(AtomicBool::new(false));
    let mut tasks = Vec::new();

    {
        let processor = processor.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            processor.run(cancel).await;
        }));
        queue_running.store(true, Ordering::Relaxed);
    }
    if let Some(worker) = embedding_worker.clone() {
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            worker.run(cancel).await;
        }));
    }
    {
        let replicator = replicator.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            replicator.run_periodic(cancel).await;
        }));
    }

    let state = AppState {
        db: db.clone(),
        config: Arc::new(config.clone()),
        search,
        embedding: embedding_worker,
        processor,
        sessions: session_service,
        replicator,
        broadcaster,
        settings: Arc::new(RwLock::new(RuntimeSettings::from_config(&config))),
        latency: Arc::new(LatencyRecorder::new()),
        started_at: Instant::now(),
        queue_running: queue_running.clone(),
    };

    start_server(&config.server.host, config.server.port, state, cancel.clone()).await?;

    // Poll loops stop before the store closes.
    cancel.cancel();
    queue_running.store(false, Ordering::Relaxed);
    for task in tasks {
        let _ = task.await;
    }
    db.close().await?;

    info!("opencode-mem shutdown complete");
    Ok(())
}

/// Installs handlers for SIGTERM and SIGINT (Ctrl+C).
///
/// Returns a [`CancellationToken`] cancelled when either signal arrives.
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("received SIGINT (Ctrl+C), initiating shutdown");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, initiating shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, initiating shutdown");
        }

        token_clone.cancel();
    });

    token
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ocmem={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
