// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, latency middleware, CORS, and shared state. State is a
//! `Clone` bundle of constructor-injected `Arc` handles so tests can build
//! it without the binary's wiring.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use ocmem_config::OcmemConfig;
use ocmem_core::OcmemError;
use ocmem_ingest::{IngestProcessor, SessionService};
use ocmem_memory::{EmbeddingWorker, SearchOrchestrator};
use ocmem_storage::Database;
use ocmem_sync::Replicator;

use crate::broadcast::Broadcaster;
use crate::error::not_found;
use crate::handlers;
use crate::sse;
use crate::stats::LatencyRecorder;

/// Runtime-adjustable flags served by `/api/settings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    pub use_fts: bool,
    pub use_semantic: bool,
    pub sse_enabled: bool,
    pub privacy_strip_tags: bool,
}

impl RuntimeSettings {
    pub fn from_config(config: &OcmemConfig) -> Self {
        Self {
            use_fts: config.search.use_fts,
            use_semantic: config.search.use_semantic,
            sse_enabled: config.server.sse_enabled,
            privacy_strip_tags: config.privacy.strip_private_tags,
        }
    }
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<OcmemConfig>,
    pub search: Arc<SearchOrchestrator>,
    pub embedding: Option<Arc<EmbeddingWorker>>,
    pub processor: Arc<IngestProcessor>,
    pub sessions: Arc<SessionService>,
    pub replicator: Arc<Replicator>,
    pub broadcaster: Arc<Broadcaster>,
    pub settings: Arc<RwLock<RuntimeSettings>>,
    pub latency: Arc<LatencyRecorder>,
    pub started_at: Instant,
    /// True while the ingest poll loop is running.
    pub queue_running: Arc<AtomicBool>,
}

/// Record per-route latency and error rate.
async fn track_latency(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    let is_error = response.status().is_client_error() || response.status().is_server_error();
    state
        .latency
        .record(&route, started.elapsed().as_millis() as u64, is_error);
    response
}

/// Build the full API router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/stats", get(handlers::stats))
        .route("/api/sessions/init", post(handlers::session_init))
        .route("/api/sessions/complete", post(handlers::session_complete))
        .route("/api/events/ingest", post(handlers::ingest))
        .route("/api/search", get(handlers::search))
        .route("/api/timeline", get(handlers::timeline))
        .route("/api/observations/batch", post(handlers::observations_batch))
        .route("/api/memory/list", get(handlers::memory_list))
        .route("/api/memory/save", post(handlers::memory_save))
        .route("/api/memory/by-session", get(handlers::memory_by_session))
        .route("/api/memory/{id}", delete(handlers::memory_delete))
        .route("/api/context/inject", get(handlers::context_inject))
        .route("/api/diagnostics/queue", get(handlers::diagnostics_queue))
        .route("/api/diagnostics/search", get(handlers::diagnostics_search))
        .route("/api/diagnostics/sync", get(handlers::diagnostics_sync))
        .route("/api/diagnostics/sync/replay", post(handlers::sync_replay))
        .route("/api/stream", get(sse::stream))
        .route(
            "/api/settings",
            get(handlers::settings_get).post(handlers::settings_update),
        )
        .route("/api/cleanup/run", post(handlers::cleanup_run))
        .route("/api/cleanup/purge", post(handlers::cleanup_purge))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), track_latency))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the cancellation token fires.
pub async fn start_server(
    host: &str,
    port: u16,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), OcmemError> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| OcmemError::Internal(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| OcmemError::Internal(format!("gateway server error: {e}")))?;
    Ok(())
}
