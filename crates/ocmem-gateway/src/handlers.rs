// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the public API.
//!
//! Every response carries `success: bool`; errors flow through
//! [`crate::error::ApiError`]. Request and response field names follow
//! the host wire conventions (camelCase envelopes; search results keep
//! their historical snake_case keys).

use std::str::FromStr;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ocmem_core::types::now_ms;
use ocmem_core::{
    EventKind, EventSink, LiveEvent, Memory, Observation, ObservationKind, OcmemError,
    SessionStatus,
};
use ocmem_ingest::{IngestEvent, enqueue_event};
use ocmem_memory::context::{ContextRequest, build_context};
use ocmem_memory::ranker::RankedObservation;
use ocmem_memory::search::{SearchDiagnostics, SearchOptions};
use ocmem_privacy::PrivacyFilter;
use ocmem_storage::queries::{
    cleanup, memories, observations, prompts, queue, sessions, sync, vectors,
};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Snippet cap in the search response.
const SNIPPET_CHARS: usize = 150;

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(OcmemError::validation("BAD_REQUEST", message))
}

fn parse_kind(raw: Option<&str>) -> ApiResult<Option<ObservationKind>> {
    match raw {
        None => Ok(None),
        Some(s) => ObservationKind::from_str(s)
            .map(Some)
            .map_err(|_| bad_request(format!("unknown type: {s}"))),
    }
}

// ---- health ----

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub name: String,
    pub ok: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub success: bool,
    pub status: String,
    pub db_connected: bool,
    pub vector_enabled: bool,
    pub queue_running: bool,
    pub sse_clients: usize,
    pub checks: Vec<HealthCheck>,
    pub version: String,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_connected = sessions::count_sessions(&state.db).await.is_ok();
    let vector_enabled = state.embedding.is_some();
    let queue_running = state.queue_running.load(std::sync::atomic::Ordering::Relaxed);

    let checks = vec![
        HealthCheck {
            name: "database".into(),
            ok: db_connected,
        },
        HealthCheck {
            name: "embedding".into(),
            ok: vector_enabled,
        },
        HealthCheck {
            name: "replication".into(),
            ok: state.replicator.is_configured(),
        },
    ];

    Json(HealthResponse {
        success: db_connected,
        status: if db_connected { "ok" } else { "error" }.into(),
        db_connected,
        vector_enabled,
        queue_running,
        sse_clients: state.broadcaster.client_count(),
        checks,
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

// ---- stats ----

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsCounts {
    pub sessions: i64,
    pub observations: i64,
    pub memories: i64,
    pub vectors: i64,
    pub dead_letters: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: i64,
    pub ingest: ocmem_ingest::IngestStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<ocmem_memory::EmbeddingStats>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub success: bool,
    pub counts: StatsCounts,
    pub queue: QueueStats,
    pub routes: Vec<crate::stats::RouteLatency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_run: Option<ocmem_core::SyncRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_search: Option<SearchDiagnostics>,
}

/// GET /api/stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let counts = StatsCounts {
        sessions: sessions::count_sessions(&state.db).await?,
        observations: observations::count_observations(&state.db).await?,
        memories: memories::count_memories(&state.db).await?,
        vectors: vectors::count_vectors(&state.db).await?,
        dead_letters: queue::count_dead_letters(&state.db, None).await?,
    };
    let queue_stats = QueueStats {
        pending: queue::count_pending(&state.db, None).await?,
        ingest: state.processor.stats(),
        embedding: state.embedding.as_ref().map(|w| w.stats()),
    };

    Ok(Json(StatsResponse {
        success: true,
        counts,
        queue: queue_stats,
        routes: state.latency.snapshot(),
        last_sync_run: sync::last_run(&state.db).await?,
        last_search: state.search.last_diagnostics(),
    }))
}

// ---- sessions ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInitRequest {
    pub session_id: String,
    pub project: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInitResponse {
    pub success: bool,
    pub session_id: String,
    pub status: SessionStatus,
}

/// POST /api/sessions/init
pub async fn session_init(
    State(state): State<AppState>,
    Json(body): Json<SessionInitRequest>,
) -> ApiResult<Json<SessionInitResponse>> {
    if body.session_id.is_empty() || body.project.is_empty() {
        return Err(bad_request("sessionId and project are required"));
    }
    let session = state.sessions.init_session(&body.session_id, &body.project).await?;
    Ok(Json(SessionInitResponse {
        success: true,
        session_id: session.session_id,
        status: session.status,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCompleteRequest {
    pub session_id: String,
    pub project: String,
    #[serde(default)]
    pub status: Option<SessionStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCompleteResponse {
    pub success: bool,
    pub completed: bool,
}

/// POST /api/sessions/complete
pub async fn session_complete(
    State(state): State<AppState>,
    Json(body): Json<SessionCompleteRequest>,
) -> ApiResult<Json<SessionCompleteResponse>> {
    if body.session_id.is_empty() || body.project.is_empty() {
        return Err(bad_request("sessionId and project are required"));
    }
    let status = body.status.unwrap_or(SessionStatus::Completed);
    if status == SessionStatus::Active {
        return Err(bad_request("completion status must be terminal"));
    }
    let completed = state
        .sessions
        .complete_session(&body.session_id, &body.project, status)
        .await?;
    Ok(Json(SessionCompleteResponse {
        success: true,
        completed,
    }))
}

// ---- event ingest ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub event_type: String,
    pub session_id: String,
    pub project: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub dedup_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub success: bool,
    pub queued: bool,
    pub duplicate: bool,
    pub queue_message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
}

/// POST /api/events/ingest
///
/// Validates the event against the closed type set before the durable
/// enqueue; unknown types are a 400, not a silent drop.
pub async fn ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestRequest>,
) -> ApiResult<Json<IngestResponse>> {
    if body.session_id.is_empty() || body.project.is_empty() {
        return Err(bad_request("sessionId and project are required"));
    }

    let mut envelope = serde_json::Map::new();
    envelope.insert("type".into(), serde_json::Value::String(body.event_type.clone()));
    envelope.insert("session_id".into(), serde_json::Value::String(body.session_id.clone()));
    envelope.insert("project".into(), serde_json::Value::String(body.project.clone()));
    if let serde_json::Value::Object(data) = body.data {
        for (key, value) in data {
            envelope.entry(key).or_insert(value);
        }
    }

    let event: IngestEvent = serde_json::from_value(serde_json::Value::Object(envelope))
        .map_err(|e| bad_request(format!("invalid event: {e}")))?;

    let outcome = enqueue_event(
        &state.db,
        &event,
        body.dedup_key.as_deref(),
        Some(state.config.ingest.max_retries),
        None,
    )
    .await?;

    Ok(Json(IngestResponse {
        success: true,
        queued: !outcome.is_duplicate(),
        duplicate: outcome.is_duplicate(),
        queue_message_id: outcome.message_id(),
        dedup_key: body.dedup_key,
    }))
}

// ---- search ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub query: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub date_start: Option<i64>,
    #[serde(default)]
    pub date_end: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub include_diagnostics: bool,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct ResultScores {
    pub lexical: f64,
    pub semantic: f64,
    pub recency: f64,
}

#[derive(Debug, Serialize)]
pub struct SearchResultItem {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub snippet: String,
    #[serde(rename = "type")]
    pub kind: ObservationKind,
    pub prompt_number: Option<i64>,
    pub created_at_epoch: i64,
    /// Final score scaled to 0..100.
    pub similarity: u32,
    pub scores: ResultScores,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub success: bool,
    pub results: Vec<SearchResultItem>,
    pub total: usize,
    pub strategies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<SearchDiagnostics>,
    pub timing_ms: u64,
}

fn snippet_of(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(SNIPPET_CHARS).collect();
        format!("{cut}…")
    }
}

fn result_item(ranked: &RankedObservation) -> SearchResultItem {
    let obs = &ranked.observation;
    SearchResultItem {
        id: obs.id,
        title: obs.title.clone(),
        subtitle: obs.subtitle.clone(),
        snippet: snippet_of(&obs.text),
        kind: obs.kind,
        prompt_number: obs.prompt_number,
        created_at_epoch: obs.created_at_ms,
        similarity: (ranked.final_score.clamp(0.0, 1.0) * 100.0).round() as u32,
        scores: ResultScores {
            lexical: ranked.scores.lexical,
            semantic: ranked.scores.semantic,
            recency: ranked.scores.recency,
        },
    }
}

/// GET /api/search
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchResponse>> {
    if params.query.trim().is_empty() {
        return Err(bad_request("query is required"));
    }
    let kind = parse_kind(params.kind.as_deref())?;
    let settings = state.settings.read().expect("settings lock poisoned").clone();

    let options = SearchOptions {
        project: params.project,
        kind,
        date_start_ms: params.date_start,
        date_end_ms: params.date_end,
        limit: params.limit,
        offset: params.offset,
        use_fts: settings.use_fts,
        use_semantic: settings.use_semantic,
        relevance_threshold: state.config.search.relevance_threshold,
    };
    let outcome = state.search.search(&params.query, &options).await?;

    Ok(Json(SearchResponse {
        success: true,
        results: outcome.results.iter().map(result_item).collect(),
        total: outcome.total,
        strategies: outcome.strategies,
        diagnostics: params.include_diagnostics.then_some(outcome.diagnostics),
        timing_ms: outcome.timing_ms,
    }))
}

// ---- timeline ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineParams {
    #[serde(default)]
    pub anchor: Option<i64>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_depth")]
    pub depth_before: usize,
    #[serde(default = "default_depth")]
    pub depth_after: usize,
    #[serde(default)]
    pub project: Option<String>,
}

fn default_depth() -> usize {
    3
}

#[derive(Debug, Serialize)]
pub struct TimelineAnchor {
    pub id: i64,
    pub created_at_epoch: i64,
}

#[derive(Debug, Serialize)]
pub struct TimelineItem {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(rename = "type")]
    pub kind: ObservationKind,
    pub created_at_epoch: i64,
}

#[derive(Debug, Serialize)]
pub struct TimelinePrompt {
    pub prompt_number: i64,
    pub text: String,
    pub created_at_epoch: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineResponse {
    pub success: bool,
    pub anchor: Option<TimelineAnchor>,
    pub before: Vec<TimelineItem>,
    pub after: Vec<TimelineItem>,
    pub prompts: Vec<TimelinePrompt>,
    pub timing_ms: u64,
}

fn timeline_item(obs: &Observation) -> TimelineItem {
    TimelineItem {
        id: obs.id,
        title: obs.title.clone(),
        subtitle: obs.subtitle.clone(),
        kind: obs.kind,
        created_at_epoch: obs.created_at_ms,
    }
}

/// GET /api/timeline
pub async fn timeline(
    State(state): State<AppState>,
    Query(params): Query<TimelineParams>,
) -> ApiResult<Json<TimelineResponse>> {
    let started = Instant::now();

    let anchor = match (params.anchor, params.query.as_deref()) {
        (Some(id), _) => observations::get_observation(&state.db, id).await?,
        (None, Some(query)) if !query.trim().is_empty() => {
            observations::find_anchor_by_query(&state.db, query, params.project.as_deref())
                .await?
        }
        _ => return Err(bad_request("anchor or query is required")),
    };

    let Some(anchor) = anchor else {
        return Ok(Json(TimelineResponse {
            success: true,
            anchor: None,
            before: vec![],
            after: vec![],
            prompts: vec![],
            timing_ms: started.elapsed().as_millis() as u64,
        }));
    };

    let before = observations::observations_before(
        &state.db,
        anchor.created_at_ms,
        params.project.as_deref(),
        params.depth_before,
    )
    .await?;
    let after = observations::observations_after(
        &state.db,
        anchor.created_at_ms,
        params.project.as_deref(),
        params.depth_after,
    )
    .await?;
    let prompts = prompts::prompts_for_session(&state.db, &anchor.session_id).await?;

    Ok(Json(TimelineResponse {
        success: true,
        anchor: Some(TimelineAnchor {
            id: anchor.id,
            created_at_epoch: anchor.created_at_ms,
        }),
        before: before.iter().map(timeline_item).collect(),
        after: after.iter().map(timeline_item).collect(),
        prompts: prompts
            .iter()
            .map(|p| TimelinePrompt {
                prompt_number: p.prompt_number,
                text: p.text.clone(),
                created_at_epoch: p.created_at_ms,
            })
            .collect(),
        timing_ms: started.elapsed().as_millis() as u64,
    }))
}

// ---- observation batch ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub ids: Vec<i64>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_order_by")]
    pub order_by: String,
}

fn default_order_by() -> String {
    "date".to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub success: bool,
    pub observations: Vec<Observation>,
    pub count: usize,
    pub timing_ms: u64,
}

/// POST /api/observations/batch
pub async fn observations_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchRequest>,
) -> ApiResult<Json<BatchResponse>> {
    let started = Instant::now();
    if body.ids.is_empty() {
        return Err(bad_request("ids must be a non-empty list"));
    }
    let order_by_date = match body.order_by.as_str() {
        "date" => true,
        "id" => false,
        other => return Err(bad_request(format!("unknown orderBy: {other}"))),
    };

    let observations =
        observations::get_by_ids(&state.db, &body.ids, body.project.as_deref(), order_by_date)
            .await?;
    let count = observations.len();
    Ok(Json(BatchResponse {
        success: true,
        observations,
        count,
        timing_ms: started.elapsed().as_millis() as u64,
    }))
}

// ---- memories ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryListParams {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryListResponse {
    pub success: bool,
    pub memories: Vec<Memory>,
    pub count: usize,
}

/// GET /api/memory/list
pub async fn memory_list(
    State(state): State<AppState>,
    Query(params): Query<MemoryListParams>,
) -> ApiResult<Json<MemoryListResponse>> {
    let kind = parse_kind(params.kind.as_deref())?;
    let memories = memories::list_memories(
        &state.db,
        params.project.as_deref(),
        kind,
        params.limit,
        params.offset,
    )
    .await?;
    let count = memories.len();
    Ok(Json(MemoryListResponse {
        success: true,
        memories,
        count,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySaveRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub project: String,
    pub content: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySaveResponse {
    pub success: bool,
    pub id: String,
}

/// POST /api/memory/save
pub async fn memory_save(
    State(state): State<AppState>,
    Json(body): Json<MemorySaveRequest>,
) -> ApiResult<Json<MemorySaveResponse>> {
    if body.project.is_empty() {
        return Err(bad_request("project is required"));
    }
    let kind = parse_kind(body.kind.as_deref())?.unwrap_or_default();

    let strip = state
        .settings
        .read()
        .expect("settings lock poisoned")
        .privacy_strip_tags;
    let filter = PrivacyFilter::new(strip);
    let content = filter.sanitize(&body.content)?;
    let summary = match &body.summary {
        Some(s) => Some(filter.sanitize(s)?.text),
        None => None,
    };

    let memory = Memory {
        id: body.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        project: body.project.clone(),
        content: content.text,
        summary,
        kind,
        tags: body.tags,
        metadata: body.metadata,
        session_id: body.session_id.clone(),
        created_at_ms: now_ms(),
    };
    memories::save_memory(&state.db, &memory).await?;

    state.broadcaster.emit(LiveEvent::new(
        EventKind::MemorySaved,
        Some(body.project),
        body.session_id,
        serde_json::json!({ "id": memory.id }),
    ));
    Ok(Json(MemorySaveResponse {
        success: true,
        id: memory.id,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDeleteResponse {
    pub success: bool,
    pub deleted: bool,
}

/// DELETE /api/memory/{id}
pub async fn memory_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MemoryDeleteResponse>> {
    let deleted = memories::delete_memory(&state.db, &id).await?;
    Ok(Json(MemoryDeleteResponse {
        success: true,
        deleted,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryBySessionParams {
    pub session_id: String,
    pub project: String,
    #[serde(default = "default_by_session_limit")]
    pub limit: usize,
}

fn default_by_session_limit() -> usize {
    5
}

/// GET /api/memory/by-session
pub async fn memory_by_session(
    State(state): State<AppState>,
    Query(params): Query<MemoryBySessionParams>,
) -> ApiResult<Json<MemoryListResponse>> {
    let memories = memories::memories_by_session(
        &state.db,
        &params.session_id,
        &params.project,
        params.limit,
    )
    .await?;
    let count = memories.len();
    Ok(Json(MemoryListResponse {
        success: true,
        memories,
        count,
    }))
}

// ---- context injection ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextParams {
    pub project: String,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub max_memories: Option<usize>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub max_age_days: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextResponse {
    pub success: bool,
    pub context: Option<String>,
    pub count: usize,
    pub token_estimate: usize,
}

/// GET /api/context/inject
pub async fn context_inject(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
) -> ApiResult<Json<ContextResponse>> {
    if params.project.is_empty() {
        return Err(bad_request("project is required"));
    }
    let request = ContextRequest {
        project: params.project,
        max_tokens: params.max_tokens.unwrap_or(state.config.context.max_tokens),
        max_memories: params
            .max_memories
            .unwrap_or(state.config.context.max_memories),
        session_id: params.session_id,
        max_age_days: params.max_age_days.or(state.config.context.max_age_days),
    };
    let injection = build_context(&state.db, &request).await?;
    Ok(Json(ContextResponse {
        success: true,
        context: injection.context,
        count: injection.count,
        token_estimate: injection.token_estimate,
    }))
}

// ---- diagnostics ----

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDiagnostics {
    pub success: bool,
    pub pending: i64,
    pub dead_letters: i64,
    pub ingest: ocmem_ingest::IngestStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<ocmem_memory::EmbeddingStats>,
}

/// GET /api/diagnostics/queue
pub async fn diagnostics_queue(
    State(state): State<AppState>,
) -> ApiResult<Json<QueueDiagnostics>> {
    Ok(Json(QueueDiagnostics {
        success: true,
        pending: queue::count_pending(&state.db, None).await?,
        dead_letters: queue::count_dead_letters(&state.db, None).await?,
        ingest: state.processor.stats(),
        embedding: state.embedding.as_ref().map(|w| w.stats()),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDiagnosticsResponse {
    pub success: bool,
    pub diagnostics: Option<SearchDiagnostics>,
}

/// GET /api/diagnostics/search
pub async fn diagnostics_search(
    State(state): State<AppState>,
) -> Json<SearchDiagnosticsResponse> {
    Json(SearchDiagnosticsResponse {
        success: true,
        diagnostics: state.search.last_diagnostics(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDiagnosticsResponse {
    pub success: bool,
    pub configured: bool,
    pub last_run: Option<ocmem_core::SyncRun>,
}

/// GET /api/diagnostics/sync
pub async fn diagnostics_sync(
    State(state): State<AppState>,
) -> ApiResult<Json<SyncDiagnosticsResponse>> {
    Ok(Json(SyncDiagnosticsResponse {
        success: true,
        configured: state.replicator.is_configured(),
        last_run: sync::last_run(&state.db).await?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    #[serde(default = "default_replay_limit")]
    pub limit: usize,
}

fn default_replay_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResponse {
    pub success: bool,
    pub replayed: i64,
    pub failed: i64,
}

/// POST /api/diagnostics/sync/replay
pub async fn sync_replay(
    State(state): State<AppState>,
    Json(body): Json<ReplayRequest>,
) -> ApiResult<Json<ReplayResponse>> {
    let report = state.replicator.replay_failed(body.limit).await?;
    Ok(Json(ReplayResponse {
        success: true,
        replayed: report.replayed,
        failed: report.failed,
    }))
}

// ---- settings ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default)]
    pub use_fts: Option<bool>,
    #[serde(default)]
    pub use_semantic: Option<bool>,
    #[serde(default)]
    pub sse_enabled: Option<bool>,
    #[serde(default)]
    pub privacy_strip_tags: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub success: bool,
    #[serde(flatten)]
    pub settings: crate::server::RuntimeSettings,
}

/// GET /api/settings
pub async fn settings_get(State(state): State<AppState>) -> Json<SettingsResponse> {
    let settings = state.settings.read().expect("settings lock poisoned").clone();
    Json(SettingsResponse {
        success: true,
        settings,
    })
}

/// POST /api/settings
pub async fn settings_update(
    State(state): State<AppState>,
    Json(body): Json<SettingsUpdate>,
) -> Json<SettingsResponse> {
    let mut settings = state.settings.write().expect("settings lock poisoned");
    if let Some(v) = body.use_fts {
        settings.use_fts = v;
    }
    if let Some(v) = body.use_semantic {
        settings.use_semantic = v;
    }
    if let Some(v) = body.sse_enabled {
        settings.sse_enabled = v;
    }
    if let Some(v) = body.privacy_strip_tags {
        settings.privacy_strip_tags = v;
    }
    Json(SettingsResponse {
        success: true,
        settings: settings.clone(),
    })
}

// ---- cleanup ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    pub project: String,
    #[serde(default)]
    pub max_memories: Option<usize>,
    #[serde(default)]
    pub max_age_days: Option<i64>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub success: bool,
    pub memories_removed: usize,
    pub dry_run: bool,
}

/// POST /api/cleanup/run
pub async fn cleanup_run(
    State(state): State<AppState>,
    Json(body): Json<CleanupRequest>,
) -> ApiResult<Json<CleanupResponse>> {
    if body.project.is_empty() {
        return Err(bad_request("project is required"));
    }
    let report = cleanup::cleanup_memories(
        &state.db,
        &body.project,
        body.max_memories,
        body.max_age_days,
        body.dry_run,
    )
    .await?;
    Ok(Json(CleanupResponse {
        success: true,
        memories_removed: report.memories_removed,
        dry_run: report.dry_run,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRequest {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeResponse {
    pub success: bool,
    pub sessions: usize,
    pub observations: usize,
    pub memories: usize,
}

/// POST /api/cleanup/purge
pub async fn cleanup_purge(
    State(state): State<AppState>,
    Json(body): Json<PurgeRequest>,
) -> ApiResult<Json<PurgeResponse>> {
    if !body.confirm {
        return Err(bad_request("purge requires confirm=true"));
    }
    let report = match &body.project {
        Some(project) => {
            // Remote records go too, best effort.
            if state.replicator.is_configured() {
                let _ = state.replicator.delete_by_project(project).await;
            }
            cleanup::purge_project(&state.db, project).await?
        }
        None => cleanup::purge_all(&state.db).await?,
    };
    Ok(Json(PurgeResponse {
        success: true,
        sessions: report.sessions,
        observations: report.observations,
        memories: report.memories,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_request_deserializes_with_defaults() {
        let json = r#"{
            "eventType": "observation",
            "sessionId": "s-1",
            "project": "demo",
            "data": { "title": "t", "text": "x" }
        }"#;
        let req: IngestRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.event_type, "observation");
        assert!(req.dedup_key.is_none());
        assert!(req.data.is_object());
    }

    #[test]
    fn search_params_defaults() {
        let params: SearchParams =
            serde_urlencoded_like("query=retry%20queue").expect("params parse");
        assert_eq!(params.limit, 20);
        assert_eq!(params.offset, 0);
        assert!(!params.include_diagnostics);
    }

    // Minimal query-string shim; the real parsing is axum's.
    fn serde_urlencoded_like(qs: &str) -> Result<SearchParams, serde_json::Error> {
        let mut map = serde_json::Map::new();
        for pair in qs.split('&') {
            let mut it = pair.splitn(2, '=');
            let key = it.next().unwrap_or_default();
            let value = it.next().unwrap_or_default().replace("%20", " ");
            map.insert(key.to_string(), serde_json::Value::String(value));
        }
        serde_json::from_value(serde_json::Value::Object(map))
    }

    #[test]
    fn snippet_truncates_with_ellipsis() {
        let short = snippet_of("short text");
        assert_eq!(short, "short text");

        let long = snippet_of(&"a".repeat(400));
        assert_eq!(long.chars().count(), SNIPPET_CHARS + 1);
        assert!(long.ends_with('…'));
    }

    #[test]
    fn batch_request_rejects_unknown_order() {
        let json = r#"{ "ids": [1, 2], "orderBy": "date" }"#;
        let req: BatchRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.order_by, "date");

        let json = r#"{ "ids": [1] }"#;
        let req: BatchRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.order_by, "date");
    }

    #[test]
    fn search_result_item_wire_shape() {
        let item = SearchResultItem {
            id: 3,
            title: "t".into(),
            subtitle: None,
            snippet: "s".into(),
            kind: ObservationKind::Bugfix,
            prompt_number: Some(2),
            created_at_epoch: 1_700_000_000_000,
            similarity: 87,
            scores: ResultScores {
                lexical: 0.9,
                semantic: 0.0,
                recency: 0.5,
            },
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "bugfix");
        assert_eq!(value["prompt_number"], 2);
        assert_eq!(value["created_at_epoch"], 1_700_000_000_000_i64);
        assert_eq!(value["similarity"], 87);
        assert!(value.get("subtitle").is_none());
    }

    #[test]
    fn purge_requires_confirmation_flag() {
        let json = r#"{ "project": "demo" }"#;
        let req: PurgeRequest = serde_json::from_str(json).unwrap();
        assert!(!req.confirm);
    }
}
