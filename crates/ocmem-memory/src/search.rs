// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Search orchestrator: fans a query across strategies, merges, filters,
//! ranks, and records diagnostics.
//!
//! Strategy gate: FTS runs unless disabled; semantic runs only when
//! enabled, embeddings are active, and a project is given. An empty merge
//! falls back to a plain substring scan. The semantic similarity map is
//! plumbed through to the ranker so semantic evidence survives rank time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use ocmem_core::{Observation, ObservationKind, OcmemError, now_ms};
use ocmem_storage::Database;
use ocmem_storage::queries::observations;

use crate::embedder::EmbeddingWorker;
use crate::ranker::{RankedObservation, Ranker};

/// Row cap applied to every strategy.
const STRATEGY_CAP: usize = 100;

/// Per-request options. Defaults mirror the API surface.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub project: Option<String>,
    pub kind: Option<ObservationKind>,
    pub date_start_ms: Option<i64>,
    pub date_end_ms: Option<i64>,
    pub limit: usize,
    pub offset: usize,
    pub use_fts: bool,
    pub use_semantic: bool,
    /// Minimum final score; 0 disables the threshold filter.
    pub relevance_threshold: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            project: None,
            kind: None,
            date_start_ms: None,
            date_end_ms: None,
            limit: 20,
            offset: 0,
            use_fts: true,
            use_semantic: true,
            relevance_threshold: 0.0,
        }
    }
}

/// Diagnostics snapshot for one search call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDiagnostics {
    pub query: String,
    pub started_at_epoch: i64,
    pub ended_at_epoch: i64,
    pub strategy_timings_ms: HashMap<String, u64>,
    pub strategy_input_counts: HashMap<String, usize>,
    /// `(filter name, post-filter cardinality)` in application order.
    pub filter_output_counts: Vec<(String, usize)>,
}

/// Result of one orchestrated search.
#[derive(Debug)]
pub struct SearchOutcome {
    pub results: Vec<RankedObservation>,
    /// Result count before the offset/limit slice.
    pub total: usize,
    pub strategies: Vec<String>,
    pub timing_ms: u64,
    pub diagnostics: SearchDiagnostics,
}

/// Orchestrates strategies, filters, and ranking for observation search.
///
/// Stateless apart from the advisory last-diagnostics snapshot
/// (last-writer-wins).
pub struct SearchOrchestrator {
    db: Database,
    worker: Option<Arc<EmbeddingWorker>>,
    ranker: Ranker,
    last_diagnostics: RwLock<Option<SearchDiagnostics>>,
}

impl SearchOrchestrator {
    pub fn new(db: Database, worker: Option<Arc<EmbeddingWorker>>, ranker: Ranker) -> Self {
        Self {
            db,
            worker,
            ranker,
            last_diagnostics: RwLock::new(None),
        }
    }

    /// The diagnostics of the most recent search, if any.
    pub fn last_diagnostics(&self) -> Option<SearchDiagnostics> {
        self.last_diagnostics
            .read()
            .expect("diagnostics lock poisoned")
            .clone()
    }

    /// Run a search. See module docs for the strategy gate.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchOutcome, OcmemError> {
        let started = Instant::now();
        let started_at_epoch = now_ms();
        let mut strategy_timings_ms = HashMap::new();
        let mut strategy_input_counts = HashMap::new();
        let mut strategies = Vec::new();

        // Merge by id; first occurrence wins, later hits add missing scores.
        let mut merged: Vec<Observation> = Vec::new();
        let mut semantic_scores: HashMap<i64, f64> = HashMap::new();

        if options.use_fts {
            let clock = Instant::now();
            let match_expr = build_match_query(query);
            let hits = if match_expr.is_empty() {
                Vec::new()
            } else {
                observations::fts_search(
                    &self.db,
                    &match_expr,
                    options.project.as_deref(),
                    options.kind,
                    options.date_start_ms,
                    options.date_end_ms,
                    STRATEGY_CAP,
                )
                .await?
            };
            strategy_timings_ms.insert("fts".to_string(), clock.elapsed().as_millis() as u64);
            strategy_input_counts.insert("fts".to_string(), hits.len());
            strategies.push("fts".to_string());
            for (obs, _rank) in hits {
                if !merged.iter().any(|o| o.id == obs.id) {
                    merged.push(obs);
                }
            }
        }

        if options.use_semantic
            && let (Some(worker), Some(project)) = (&self.worker, options.project.as_deref())
        {
            let clock = Instant::now();
            match worker.semantic_search(query, project, STRATEGY_CAP).await {
                Ok(scores) => {
                    let ids: Vec<i64> = scores.keys().copied().collect();
                    let hits =
                        observations::get_by_ids(&self.db, &ids, Some(project), false).await?;
                    strategy_timings_ms
                        .insert("semantic".to_string(), clock.elapsed().as_millis() as u64);
                    strategy_input_counts.insert("semantic".to_string(), hits.len());
                    strategies.push("semantic".to_string());
                    for obs in hits {
                        if !merged.iter().any(|o| o.id == obs.id) {
                            merged.push(obs);
                        }
                    }
                    semantic_scores.extend(scores);
                }
                Err(e) => {
                    // Semantic failure degrades to lexical-only results.
                    debug!(error = %e, "semantic strategy failed, continuing without it");
                    strategy_timings_ms
                        .insert("semantic".to_string(), clock.elapsed().as_millis() as u64);
                    strategy_input_counts.insert("semantic".to_string(), 0);
                    strategies.push("semantic".to_string());
                }
            }
        }

        if merged.is_empty() {
            let clock = Instant::now();
            let hits = observations::substring_search(
                &self.db,
                query,
                options.project.as_deref(),
                STRATEGY_CAP,
            )
            .await?;
            strategy_timings_ms.insert("fallback".to_string(), clock.elapsed().as_millis() as u64);
            strategy_input_counts.insert("fallback".to_string(), hits.len());
            strategies.push("fallback".to_string());
            merged = hits;
        }

        // Filter pipeline; each filter records its post-cardinality.
        let mut filter_output_counts = Vec::new();

        if let Some(project) = options.project.as_deref() {
            merged.retain(|o| o.project == project);
        }
        filter_output_counts.push(("project".to_string(), merged.len()));

        if let Some(kind) = options.kind {
            merged.retain(|o| o.kind == kind);
        }
        filter_output_counts.push(("type".to_string(), merged.len()));

        if let Some(start) = options.date_start_ms {
            merged.retain(|o| o.created_at_ms >= start);
        }
        if let Some(end) = options.date_end_ms {
            merged.retain(|o| o.created_at_ms <= end);
        }
        filter_output_counts.push(("date_range".to_string(), merged.len()));

        let mut seen_titles = std::collections::HashSet::new();
        merged.retain(|o| seen_titles.insert(o.title.to_lowercase()));
        filter_output_counts.push(("dedup_title".to_string(), merged.len()));

        let mut ranked = self.ranker.rank(query, merged, &semantic_scores);

        if options.relevance_threshold > 0.0 {
            ranked.retain(|r| r.final_score >= options.relevance_threshold);
        }
        filter_output_counts.push(("relevance".to_string(), ranked.len()));

        let total = ranked.len();
        let results: Vec<RankedObservation> = ranked
            .into_iter()
            .skip(options.offset)
            .take(options.limit)
            .collect();

        let diagnostics = SearchDiagnostics {
            query: query.to_string(),
            started_at_epoch,
            ended_at_epoch: now_ms(),
            strategy_timings_ms,
            strategy_input_counts,
            filter_output_counts,
        };
        *self
            .last_diagnostics
            .write()
            .expect("diagnostics lock poisoned") = Some(diagnostics.clone());

        Ok(SearchOutcome {
            results,
            total,
            strategies,
            timing_ms: started.elapsed().as_millis() as u64,
            diagnostics,
        })
    }
}

/// Compile a query into an FTS5 prefix-AND token set: words of length >= 2,
/// each quoted with a `*` suffix, joined by spaces.
pub fn build_match_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.replace('"', ""))
        .filter(|w| w.chars().count() >= 2)
        .map(|w| format!("\"{w}\"*"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocmem_core::ObservationDraft;
    use ocmem_storage::queries::sessions::init_session;

    async fn seed(db: &Database, title: &str, text: &str) -> Observation {
        observations::insert_observation(
            db,
            ObservationDraft {
                session_id: "sess-1".into(),
                project: "demo".into(),
                title: title.into(),
                text: text.into(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    async fn setup() -> (Database, SearchOrchestrator) {
        let db = Database::open_in_memory().await.unwrap();
        init_session(&db, "sess-1", "demo").await.unwrap();
        let orchestrator = SearchOrchestrator::new(db.clone(), None, Ranker::default());
        (db, orchestrator)
    }

    #[test]
    fn match_query_compilation() {
        assert_eq!(build_match_query("queue retry"), "\"queue\"* \"retry\"*");
        assert_eq!(build_match_query("a queue"), "\"queue\"*");
        assert_eq!(build_match_query("a b"), "");
        assert_eq!(build_match_query("say \"hi\""), "\"say\"* \"hi\"*");
    }

    #[tokio::test]
    async fn fts_path_finds_results_and_records_diagnostics() {
        let (db, orchestrator) = setup().await;
        seed(
            &db,
            "diagnostics run",
            "search diagnostics should contain strategy timings",
        )
        .await;

        let options = SearchOptions {
            project: Some("demo".into()),
            use_semantic: false,
            limit: 10,
            ..Default::default()
        };
        let outcome = orchestrator.search("strategy timings", &options).await.unwrap();

        assert!(outcome.total > 0);
        assert!(!outcome.diagnostics.strategy_timings_ms.is_empty());
        assert!(outcome.diagnostics.ended_at_epoch >= outcome.diagnostics.started_at_epoch);
        assert_eq!(outcome.strategies, vec!["fts"]);
        assert!(orchestrator.last_diagnostics().is_some());
    }

    #[tokio::test]
    async fn fallback_runs_when_fts_finds_nothing() {
        let (db, orchestrator) = setup().await;
        // FTS tokenizer won't match inside "deployment" for token "ploym",
        // but the substring fallback will.
        seed(&db, "release", "deployment pipeline notes").await;

        let options = SearchOptions {
            project: Some("demo".into()),
            use_semantic: false,
            ..Default::default()
        };
        let outcome = orchestrator.search("ploym", &options).await.unwrap();

        assert_eq!(outcome.total, 1);
        assert!(outcome.strategies.contains(&"fallback".to_string()));
    }

    #[tokio::test]
    async fn title_duplicates_collapse() {
        let (db, orchestrator) = setup().await;
        seed(&db, "Same Title", "first body mentions widgets").await;
        seed(&db, "same title", "second body mentions widgets").await;

        let options = SearchOptions {
            project: Some("demo".into()),
            use_semantic: false,
            ..Default::default()
        };
        let outcome = orchestrator.search("widgets", &options).await.unwrap();
        assert_eq!(outcome.total, 1);

        let dedup = outcome
            .diagnostics
            .filter_output_counts
            .iter()
            .find(|(name, _)| name == "dedup_title")
            .unwrap();
        assert_eq!(dedup.1, 1);
    }

    #[tokio::test]
    async fn kind_filter_applies() {
        let (db, orchestrator) = setup().await;
        seed(&db, "a widget", "widget body one").await;
        let mut draft = ObservationDraft {
            session_id: "sess-1".into(),
            project: "demo".into(),
            title: "b widget".into(),
            text: "widget body two".into(),
            ..Default::default()
        };
        draft.kind = ObservationKind::Decision;
        observations::insert_observation(&db, draft).await.unwrap();

        let options = SearchOptions {
            project: Some("demo".into()),
            kind: Some(ObservationKind::Decision),
            use_semantic: false,
            ..Default::default()
        };
        let outcome = orchestrator.search("widget", &options).await.unwrap();
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.results[0].observation.title, "b widget");
    }

    #[tokio::test]
    async fn offset_and_limit_slice_after_ranking() {
        let (db, orchestrator) = setup().await;
        for i in 0..5 {
            seed(&db, &format!("widget {i}"), &format!("widget body {i}")).await;
        }

        let options = SearchOptions {
            project: Some("demo".into()),
            use_semantic: false,
            limit: 2,
            offset: 2,
            ..Default::default()
        };
        let outcome = orchestrator.search("widget", &options).await.unwrap();
        assert_eq!(outcome.total, 5);
        assert_eq!(outcome.results.len(), 2);
    }

    #[tokio::test]
    async fn empty_token_set_skips_fts_and_falls_back() {
        let (db, orchestrator) = setup().await;
        seed(&db, "x", "y").await;

        let options = SearchOptions {
            project: Some("demo".into()),
            use_semantic: false,
            ..Default::default()
        };
        let outcome = orchestrator.search("x", &options).await.unwrap();
        // "x" is under the 2-char token floor; the fallback still matches.
        assert!(outcome.strategies.contains(&"fallback".to_string()));
        assert_eq!(outcome.total, 1);
    }
}
