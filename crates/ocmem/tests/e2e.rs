// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the ingest -> store -> retrieve pipeline.
//!
//! Each test builds an isolated harness over a temp SQLite database with
//! the real processor, session service, and search orchestrator. Tests
//! are independent and order-insensitive.

use std::sync::Arc;
use std::time::Instant;

use ocmem_core::types::{EnqueueOutcome, ObservationDraft};
use ocmem_core::{NullEventSink, ObservationKind, SessionStatus};
use ocmem_ingest::{IngestEvent, IngestProcessor, SessionService, enqueue_event};
use ocmem_memory::context::{ContextRequest, build_context};
use ocmem_memory::{Ranker, SearchOptions, SearchOrchestrator};
use ocmem_privacy::PrivacyFilter;
use ocmem_storage::Database;
use ocmem_storage::queries::{cleanup, memories, observations, prompts, queue, sessions, summaries};

struct Harness {
    db: Database,
    processor: IngestProcessor,
    search: SearchOrchestrator,
    _dir: Option<tempfile::TempDir>,
}

impl Harness {
    async fn new_on_disk() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("opencodemem.db")).await.unwrap();
        Self::build(db, Some(dir))
    }

    async fn new_in_memory() -> Self {
        let db = Database::open_in_memory().await.unwrap();
        Self::build(db, None)
    }

    fn build(db: Database, dir: Option<tempfile::TempDir>) -> Self {
        let sessions = Arc::new(SessionService::new(db.clone(), Arc::new(NullEventSink)));
        let processor = IngestProcessor::new(
            db.clone(),
            PrivacyFilter::default(),
            None,
            sessions,
            Arc::new(NullEventSink),
            ocmem_config::model::IngestConfig {
                batch_size: 100,
                ..Default::default()
            },
        );
        let search = SearchOrchestrator::new(db.clone(), None, Ranker::default());
        Self {
            db,
            processor,
            search,
            _dir: dir,
        }
    }

    async fn ingest_observation(&self, title: &str, text: &str) {
        enqueue_event(
            &self.db,
            &IngestEvent::Observation {
                draft: ObservationDraft {
                    session_id: "sess-1".into(),
                    project: "demo".into(),
                    kind: ObservationKind::Fact,
                    title: title.into(),
                    text: text.into(),
                    ..Default::default()
                },
            },
            None,
            None,
            None,
        )
        .await
        .unwrap();
    }

    async fn drain(&self) {
        while self
            .processor
            .process_queue()
            .await
            .unwrap()
            .unwrap()
            .handled
            > 0
        {}
    }

    fn lexical_options(&self) -> SearchOptions {
        SearchOptions {
            project: Some("demo".into()),
            use_semantic: false,
            limit: 20,
            ..Default::default()
        }
    }
}

// ---- ingest to search ----

#[tokio::test]
async fn ingest_to_search_returns_ranked_results_with_diagnostics() {
    let harness = Harness::new_on_disk().await;
    harness
        .ingest_observation(
            "diagnostics wiring",
            "search diagnostics should contain strategy timings",
        )
        .await;
    harness.drain().await;

    let outcome = harness
        .search
        .search("strategy timings", &harness.lexical_options())
        .await
        .unwrap();

    assert!(outcome.total > 0);
    assert!(outcome.results[0].final_score > 0.0);
    assert!(!outcome.diagnostics.strategy_timings_ms.is_empty());
    assert!(outcome.diagnostics.ended_at_epoch >= outcome.diagnostics.started_at_epoch);
}

// ---- dedup semantics ----

#[tokio::test]
async fn processed_dedup_key_yields_duplicate_sentinel() {
    let harness = Harness::new_on_disk().await;
    queue::mark_event_processed(&harness.db, "dedup-1", "session_ingest", Some("s-1"))
        .await
        .unwrap();

    let outcome = enqueue_event(
        &harness.db,
        &IngestEvent::SessionStart {
            session_id: "s-1".into(),
            project: "demo".into(),
        },
        Some("dedup-1"),
        None,
        None,
    )
    .await
    .unwrap();

    assert_eq!(outcome, EnqueueOutcome::Duplicate);
    assert_eq!(outcome.message_id(), -1);
    assert_eq!(
        queue::count_pending(&harness.db, Some("session_ingest")).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn pending_dedup_key_coalesces_to_one_message() {
    let harness = Harness::new_on_disk().await;
    let event = IngestEvent::SessionStart {
        session_id: "s-1".into(),
        project: "demo".into(),
    };

    let first = enqueue_event(&harness.db, &event, Some("dedup-2"), None, None)
        .await
        .unwrap();
    let second = enqueue_event(&harness.db, &event, Some("dedup-2"), None, None)
        .await
        .unwrap();

    let id = first.message_id();
    assert!(id > 0);
    assert_eq!(second.message_id(), id);
    assert_eq!(
        queue::count_pending(&harness.db, Some("session_ingest")).await.unwrap(),
        1
    );
}

// ---- timeline ----

#[tokio::test]
async fn timeline_window_splits_around_anchor_with_prompts() {
    let harness = Harness::new_on_disk().await;
    for (title, text) in [
        ("first step", "set up the project"),
        ("second step", "wrote the anchor observation"),
        ("third step", "follow-up work"),
    ] {
        harness.ingest_observation(title, text).await;
    }
    enqueue_event(
        &harness.db,
        &IngestEvent::UserPrompt {
            session_id: "sess-1".into(),
            project: "demo".into(),
            text: "please do the anchor work".into(),
        },
        None,
        None,
        None,
    )
    .await
    .unwrap();
    harness.drain().await;

    let anchor = observations::find_anchor_by_query(&harness.db, "anchor observation", Some("demo"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(anchor.title, "second step");

    let before =
        observations::observations_before(&harness.db, anchor.created_at_ms, Some("demo"), 3)
            .await
            .unwrap();
    let after =
        observations::observations_after(&harness.db, anchor.created_at_ms, Some("demo"), 3)
            .await
            .unwrap();
    // Same-millisecond rows may land on either side boundary; the split
    // is strict so the anchor itself appears in neither window.
    assert!(before.iter().all(|o| o.id != anchor.id));
    assert!(after.iter().all(|o| o.id != anchor.id));

    let prompts = prompts::prompts_for_session(&harness.db, &anchor.session_id)
        .await
        .unwrap();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].prompt_number, 1);
}

// ---- session lifecycle and summaries ----

#[tokio::test]
async fn session_end_compiles_summary_once() {
    let harness = Harness::new_on_disk().await;
    enqueue_event(
        &harness.db,
        &IngestEvent::SessionStart {
            session_id: "sess-1".into(),
            project: "demo".into(),
        },
        None,
        None,
        None,
    )
    .await
    .unwrap();
    harness
        .ingest_observation("fixed flaky retry test", "the retry test raced the clock")
        .await;
    enqueue_event(
        &harness.db,
        &IngestEvent::SessionEnd {
            session_id: "sess-1".into(),
            project: "demo".into(),
            status: None,
        },
        None,
        None,
        None,
    )
    .await
    .unwrap();
    harness.drain().await;

    let session = sessions::get_session(&harness.db, "sess-1").await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.completed_at_ms.is_some());
    assert!(summaries::get_summary(&harness.db, "sess-1").await.unwrap().is_some());

    // Terminal states are sticky even across another end event.
    enqueue_event(
        &harness.db,
        &IngestEvent::SessionEnd {
            session_id: "sess-1".into(),
            project: "demo".into(),
            status: Some(SessionStatus::Failed),
        },
        None,
        None,
        None,
    )
    .await
    .unwrap();
    harness.drain().await;
    let session = sessions::get_session(&harness.db, "sess-1").await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
}

// ---- context injection ----

#[tokio::test]
async fn context_injection_respects_budgets_and_session_exclusion() {
    let harness = Harness::new_on_disk().await;
    for (id, session) in [("own", "session-a"), ("other", "session-b")] {
        memories::save_memory(
            &harness.db,
            &ocmem_core::Memory {
                id: id.into(),
                project: "demo".into(),
                content: format!("{id} memory content"),
                summary: None,
                kind: ObservationKind::Fact,
                tags: vec![],
                metadata: None,
                session_id: Some(session.into()),
                created_at_ms: ocmem_core::now_ms(),
            },
        )
        .await
        .unwrap();
    }

    let injection = build_context(
        &harness.db,
        &ContextRequest {
            project: "demo".into(),
            max_tokens: 1_000,
            max_memories: 10,
            session_id: Some("session-a".into()),
            max_age_days: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(injection.count, 1);
    let context = injection.context.unwrap();
    assert!(context.contains("[#other]"));
    assert!(!context.contains("[#own]"));
    assert!(injection.token_estimate <= 1_000);
}

// ---- purge ----

#[tokio::test]
async fn purge_clears_all_project_state() {
    let harness = Harness::new_on_disk().await;
    harness.ingest_observation("to be purged", "purge me").await;
    harness.drain().await;
    assert_eq!(observations::count_observations(&harness.db).await.unwrap(), 1);

    cleanup::purge_project(&harness.db, "demo").await.unwrap();
    assert_eq!(observations::count_observations(&harness.db).await.unwrap(), 0);
    assert_eq!(sessions::count_sessions(&harness.db).await.unwrap(), 0);

    let outcome = harness
        .search
        .search("purge", &harness.lexical_options())
        .await
        .unwrap();
    assert_eq!(outcome.total, 0);
}

// ---- latency budget ----

#[tokio::test]
async fn search_p95_stays_under_budget_with_3000_observations() {
    let harness = Harness::new_in_memory().await;
    sessions::init_session(&harness.db, "sess-1", "demo").await.unwrap();
    for i in 0..3_000 {
        observations::insert_observation(
            &harness.db,
            ObservationDraft {
                session_id: "sess-1".into(),
                project: "demo".into(),
                kind: ObservationKind::Fact,
                title: format!("observation number {i}"),
                text: format!(
                    "queue retry diagnostics entry {i} with assorted filler text about \
                     backoff, dedup keys, and dead letters"
                ),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    let mut timings = Vec::with_capacity(25);
    for _ in 0..25 {
        let started = Instant::now();
        let outcome = harness
            .search
            .search("queue retry diagnostics", &harness.lexical_options())
            .await
            .unwrap();
        assert!(outcome.total > 0);
        timings.push(started.elapsed().as_millis() as u64);
    }

    timings.sort_unstable();
    let p95 = timings[((95 * timings.len()).div_ceil(100)).max(1) - 1];
    assert!(p95 < 600, "p95 search latency {p95}ms exceeds budget");
}
