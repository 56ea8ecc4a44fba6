// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cleanup and purge operations.
//!
//! Purge deletes in dependency order: queue rows → prompts → vectors →
//! memories → observations → summaries → sessions, plus sync bookkeeping.

use rusqlite::params;

use ocmem_core::{OcmemError, now_ms};

use crate::database::{Database, map_tr_err};

/// Counts reported by a cleanup run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Memories deleted (or that would be deleted under `dry_run`).
    pub memories_removed: usize,
    pub dry_run: bool,
}

/// Counts reported by a purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub sessions: usize,
    pub observations: usize,
    pub memories: usize,
    pub prompts: usize,
    pub vectors: usize,
    pub summaries: usize,
    pub queue_rows: usize,
}

/// Prune a project's memories beyond a retention budget.
///
/// `max_memories` keeps only the N most recent; `max_age_days` drops
/// anything older than the cutoff. With `dry_run` the report carries the
/// would-be count and nothing is deleted.
pub async fn cleanup_memories(
    db: &Database,
    project: &str,
    max_memories: Option<usize>,
    max_age_days: Option<i64>,
    dry_run: bool,
) -> Result<CleanupReport, OcmemError> {
    let project = project.to_string();
    db.connection()
        .call(move |conn| {
            let mut doomed: Vec<String> = Vec::new();

            if let Some(days) = max_age_days {
                let cutoff = now_ms() - days * 24 * 60 * 60 * 1000;
                let mut stmt = conn.prepare(
                    "SELECT id FROM memories WHERE project = ?1 AND created_at_ms < ?2",
                )?;
                let old = stmt
                    .query_map(params![project, cutoff], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                doomed.extend(old);
            }

            if let Some(keep) = max_memories {
                let mut stmt = conn.prepare(
                    "SELECT id FROM memories WHERE project = ?1
                     ORDER BY created_at_ms DESC, id DESC LIMIT -1 OFFSET ?2",
                )?;
                let excess = stmt
                    .query_map(params![project, keep as i64], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                doomed.extend(excess);
            }

            doomed.sort();
            doomed.dedup();

            if !dry_run {
                for id in &doomed {
                    conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
                }
            }

            Ok(CleanupReport {
                memories_removed: doomed.len(),
                dry_run,
            })
        })
        .await
        .map_err(map_tr_err)
}

/// Remove every row belonging to one project, in dependency order.
pub async fn purge_project(db: &Database, project: &str) -> Result<PurgeReport, OcmemError> {
    let project = project.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let mut report = PurgeReport::default();

            report.queue_rows += tx.execute(
                "DELETE FROM pending_messages WHERE entity_id IN
                     (SELECT session_id FROM sessions WHERE project = ?1)",
                params![project],
            )?;
            report.queue_rows += tx.execute(
                "DELETE FROM processed_events WHERE entity_id IN
                     (SELECT session_id FROM sessions WHERE project = ?1)",
                params![project],
            )?;
            report.queue_rows += tx.execute(
                "DELETE FROM dead_letters WHERE entity_id IN
                     (SELECT session_id FROM sessions WHERE project = ?1)",
                params![project],
            )?;
            report.prompts = tx.execute(
                "DELETE FROM user_prompts WHERE session_id IN
                     (SELECT session_id FROM sessions WHERE project = ?1)",
                params![project],
            )?;
            report.vectors = tx.execute(
                "DELETE FROM observation_vectors WHERE observation_id IN
                     (SELECT id FROM observations WHERE project = ?1)",
                params![project],
            )?;
            report.memories =
                tx.execute("DELETE FROM memories WHERE project = ?1", params![project])?;
            // Per-observation content hashes go before their observations.
            tx.execute(
                "DELETE FROM sync_state WHERE state_key IN
                     (SELECT 'chroma.hash.observation.' || id
                      FROM observations WHERE project = ?1)",
                params![project],
            )?;
            report.observations =
                tx.execute("DELETE FROM observations WHERE project = ?1", params![project])?;
            report.summaries = tx.execute(
                "DELETE FROM summaries WHERE session_id IN
                     (SELECT session_id FROM sessions WHERE project = ?1)",
                params![project],
            )?;
            report.sessions =
                tx.execute("DELETE FROM sessions WHERE project = ?1", params![project])?;
            tx.execute(
                "DELETE FROM sync_state WHERE state_key = 'chroma.cursor.' || ?1",
                params![project],
            )?;

            tx.commit()?;
            Ok(report)
        })
        .await
        .map_err(map_tr_err)
}

/// Remove every row from every table.
pub async fn purge_all(db: &Database) -> Result<PurgeReport, OcmemError> {
    db.connection()
        .call(|conn| {
            let tx = conn.transaction()?;
            let mut report = PurgeReport::default();

            report.queue_rows += tx.execute("DELETE FROM pending_messages", [])?;
            report.queue_rows += tx.execute("DELETE FROM processed_events", [])?;
            report.queue_rows += tx.execute("DELETE FROM dead_letters", [])?;
            report.prompts = tx.execute("DELETE FROM user_prompts", [])?;
            report.vectors = tx.execute("DELETE FROM observation_vectors", [])?;
            report.memories = tx.execute("DELETE FROM memories", [])?;
            report.observations = tx.execute("DELETE FROM observations", [])?;
            report.summaries = tx.execute("DELETE FROM summaries", [])?;
            report.sessions = tx.execute("DELETE FROM sessions", [])?;
            tx.execute("DELETE FROM sync_state", [])?;
            tx.execute("DELETE FROM sync_runs", [])?;

            tx.commit()?;
            Ok(report)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::queries::memories::{count_memories, save_memory};
    use crate::queries::observations::{count_observations, insert_observation};
    use crate::queries::sessions::{count_sessions, init_session};
    use ocmem_core::{Memory, ObservationDraft, ObservationKind};

    async fn setup_db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn memory(id: &str, project: &str, created_at_ms: i64) -> Memory {
        Memory {
            id: id.into(),
            project: project.into(),
            content: "content".into(),
            summary: None,
            kind: ObservationKind::General,
            tags: vec![],
            metadata: None,
            session_id: None,
            created_at_ms,
        }
    }

    #[tokio::test]
    async fn cleanup_respects_retention_budget() {
        let db = setup_db().await;
        for i in 0..5 {
            save_memory(&db, &memory(&format!("m{i}"), "demo", 1_000 + i))
                .await
                .unwrap();
        }

        let report = cleanup_memories(&db, "demo", Some(2), None, false)
            .await
            .unwrap();
        assert_eq!(report.memories_removed, 3);
        assert_eq!(count_memories(&db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cleanup_dry_run_deletes_nothing() {
        let db = setup_db().await;
        for i in 0..3 {
            save_memory(&db, &memory(&format!("m{i}"), "demo", 1_000 + i))
                .await
                .unwrap();
        }

        let report = cleanup_memories(&db, "demo", Some(1), None, true)
            .await
            .unwrap();
        assert_eq!(report.memories_removed, 2);
        assert!(report.dry_run);
        assert_eq!(count_memories(&db).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn cleanup_age_and_count_do_not_double_count() {
        let db = setup_db().await;
        let old_ms = now_ms() - 100 * 24 * 60 * 60 * 1000;
        save_memory(&db, &memory("old", "demo", old_ms)).await.unwrap();
        save_memory(&db, &memory("new", "demo", now_ms())).await.unwrap();

        // "old" is both over age and over the retention budget of 1.
        let report = cleanup_memories(&db, "demo", Some(1), Some(30), false)
            .await
            .unwrap();
        assert_eq!(report.memories_removed, 1);
        assert_eq!(count_memories(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn purge_project_leaves_other_projects() {
        let db = setup_db().await;
        init_session(&db, "s-demo", "demo").await.unwrap();
        init_session(&db, "s-other", "other").await.unwrap();
        for (session, project) in [("s-demo", "demo"), ("s-other", "other")] {
            insert_observation(
                &db,
                ObservationDraft {
                    session_id: session.into(),
                    project: project.into(),
                    title: "t".into(),
                    text: "body".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }
        save_memory(&db, &memory("m-demo", "demo", 1)).await.unwrap();

        let report = purge_project(&db, "demo").await.unwrap();
        assert_eq!(report.sessions, 1);
        assert_eq!(report.observations, 1);
        assert_eq!(report.memories, 1);

        assert_eq!(count_sessions(&db).await.unwrap(), 1);
        assert_eq!(count_observations(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn purge_all_empties_every_table() {
        let db = setup_db().await;
        init_session(&db, "s", "demo").await.unwrap();
        insert_observation(
            &db,
            ObservationDraft {
                session_id: "s".into(),
                project: "demo".into(),
                title: "t".into(),
                text: "body".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        save_memory(&db, &memory("m", "demo", 1)).await.unwrap();

        purge_all(&db).await.unwrap();
        assert_eq!(count_sessions(&db).await.unwrap(), 0);
        assert_eq!(count_observations(&db).await.unwrap(), 0);
        assert_eq!(count_memories(&db).await.unwrap(), 0);
    }
}
