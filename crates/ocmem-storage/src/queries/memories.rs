// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory CRUD operations. Memories feed the context-injection path.

use std::str::FromStr;

use rusqlite::OptionalExtension;
use rusqlite::params;
use rusqlite::types::Value;

use ocmem_core::{Memory, ObservationKind, OcmemError, now_ms};

use crate::database::{Database, map_tr_err};

const MEMORY_COLUMNS: &str =
    "id, project, content, summary, kind, tags, metadata, session_id, created_at_ms";

fn row_to_memory(row: &rusqlite::Row) -> Result<Memory, rusqlite::Error> {
    let kind: String = row.get(4)?;
    let tags: String = row.get(5)?;
    let metadata: Option<String> = row.get(6)?;
    Ok(Memory {
        id: row.get(0)?,
        project: row.get(1)?,
        content: row.get(2)?,
        summary: row.get(3)?,
        kind: ObservationKind::from_str(&kind).unwrap_or_default(),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        session_id: row.get(7)?,
        created_at_ms: row.get(8)?,
    })
}

/// Save a memory, replacing any existing row with the same id.
pub async fn save_memory(db: &Database, memory: &Memory) -> Result<(), OcmemError> {
    let memory = memory.clone();
    db.connection()
        .call(move |conn| {
            let tags = serde_json::to_string(&memory.tags).unwrap_or_else(|_| "[]".into());
            let metadata = memory
                .metadata
                .as_ref()
                .map(|m| m.to_string());
            conn.execute(
                "INSERT OR REPLACE INTO memories
                     (id, project, content, summary, kind, tags, metadata, session_id, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    memory.id,
                    memory.project,
                    memory.content,
                    memory.summary,
                    memory.kind.to_string(),
                    tags,
                    metadata,
                    memory.session_id,
                    memory.created_at_ms,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Get a memory by id.
pub async fn get_memory(db: &Database, id: &str) -> Result<Option<Memory>, OcmemError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let memory = conn
                .query_row(
                    &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                    params![id],
                    row_to_memory,
                )
                .optional()?;
            Ok(memory)
        })
        .await
        .map_err(map_tr_err)
}

/// List memories, newest first, with optional project/kind filters.
pub async fn list_memories(
    db: &Database,
    project: Option<&str>,
    kind: Option<ObservationKind>,
    limit: usize,
    offset: usize,
) -> Result<Vec<Memory>, OcmemError> {
    let project = project.map(|p| p.to_string());
    let kind = kind.map(|k| k.to_string());
    db.connection()
        .call(move |conn| {
            let mut sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE 1=1");
            let mut values: Vec<Value> = Vec::new();
            if let Some(project) = project {
                values.push(Value::Text(project));
                sql.push_str(&format!(" AND project = ?{}", values.len()));
            }
            if let Some(kind) = kind {
                values.push(Value::Text(kind));
                sql.push_str(&format!(" AND kind = ?{}", values.len()));
            }
            sql.push_str(&format!(
                " ORDER BY created_at_ms DESC, id DESC LIMIT {limit} OFFSET {offset}"
            ));

            let mut stmt = conn.prepare(&sql)?;
            let memories = stmt
                .query_map(rusqlite::params_from_iter(values), row_to_memory)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(memories)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a memory. Returns whether a row was removed.
pub async fn delete_memory(db: &Database, id: &str) -> Result<bool, OcmemError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let deleted = conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Memories created by one session within a project, newest first.
pub async fn memories_by_session(
    db: &Database,
    session_id: &str,
    project: &str,
    limit: usize,
) -> Result<Vec<Memory>, OcmemError> {
    let session_id = session_id.to_string();
    let project = project.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEMORY_COLUMNS} FROM memories
                 WHERE session_id = ?1 AND project = ?2
                 ORDER BY created_at_ms DESC, id DESC LIMIT {limit}"
            ))?;
            let memories = stmt
                .query_map(params![session_id, project], row_to_memory)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(memories)
        })
        .await
        .map_err(map_tr_err)
}

/// Candidate memories for context injection, newest first.
///
/// Optionally excludes the current session's own memories and anything
/// older than `max_age_days`.
pub async fn memories_for_context(
    db: &Database,
    project: &str,
    exclude_session: Option<&str>,
    max_age_days: Option<i64>,
    limit: usize,
) -> Result<Vec<Memory>, OcmemError> {
    let project = project.to_string();
    let exclude_session = exclude_session.map(|s| s.to_string());
    db.connection()
        .call(move |conn| {
            let mut sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE project = ?1");
            let mut values: Vec<Value> = vec![Value::Text(project)];
            if let Some(session) = exclude_session {
                values.push(Value::Text(session));
                sql.push_str(&format!(
                    " AND (session_id IS NULL OR session_id != ?{})",
                    values.len()
                ));
            }
            if let Some(days) = max_age_days {
                let cutoff = now_ms() - days * 24 * 60 * 60 * 1000;
                values.push(Value::Integer(cutoff));
                sql.push_str(&format!(" AND created_at_ms >= ?{}", values.len()));
            }
            sql.push_str(&format!(" ORDER BY created_at_ms DESC, id DESC LIMIT {limit}"));

            let mut stmt = conn.prepare(&sql)?;
            let memories = stmt
                .query_map(rusqlite::params_from_iter(values), row_to_memory)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(memories)
        })
        .await
        .map_err(map_tr_err)
}

/// Total number of memories.
pub async fn count_memories(db: &Database) -> Result<i64, OcmemError> {
    db.connection()
        .call(|conn| {
            let count = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
            Ok(count)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    async fn setup_db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn make_memory(id: &str, project: &str, created_at_ms: i64) -> Memory {
        Memory {
            id: id.to_string(),
            project: project.to_string(),
            content: format!("content for {id}"),
            summary: None,
            kind: ObservationKind::Fact,
            tags: vec!["retry".into()],
            metadata: None,
            session_id: Some("sess-1".into()),
            created_at_ms,
        }
    }

    #[tokio::test]
    async fn save_and_get_round_trips() {
        let db = setup_db().await;
        let mut memory = make_memory("mem-1", "demo", 1_000);
        memory.metadata = Some(serde_json::json!({"source": "manual"}));
        save_memory(&db, &memory).await.unwrap();

        let fetched = get_memory(&db, "mem-1").await.unwrap().unwrap();
        assert_eq!(fetched.content, "content for mem-1");
        assert_eq!(fetched.kind, ObservationKind::Fact);
        assert_eq!(fetched.tags, vec!["retry"]);
        assert_eq!(fetched.metadata.unwrap()["source"], "manual");
    }

    #[tokio::test]
    async fn save_replaces_existing_id() {
        let db = setup_db().await;
        save_memory(&db, &make_memory("mem-1", "demo", 1_000)).await.unwrap();
        let mut updated = make_memory("mem-1", "demo", 2_000);
        updated.content = "rewritten".into();
        save_memory(&db, &updated).await.unwrap();

        assert_eq!(count_memories(&db).await.unwrap(), 1);
        let fetched = get_memory(&db, "mem-1").await.unwrap().unwrap();
        assert_eq!(fetched.content, "rewritten");
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let db = setup_db().await;
        for i in 0..5 {
            save_memory(&db, &make_memory(&format!("m{i}"), "demo", i * 100))
                .await
                .unwrap();
        }
        save_memory(&db, &make_memory("other", "elsewhere", 999)).await.unwrap();

        let page = list_memories(&db, Some("demo"), None, 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "m4");

        let next = list_memories(&db, Some("demo"), None, 2, 2).await.unwrap();
        assert_eq!(next[0].id, "m2");

        let by_kind = list_memories(&db, None, Some(ObservationKind::Decision), 10, 0)
            .await
            .unwrap();
        assert!(by_kind.is_empty());
    }

    #[tokio::test]
    async fn delete_reports_outcome() {
        let db = setup_db().await;
        save_memory(&db, &make_memory("mem-1", "demo", 1_000)).await.unwrap();
        assert!(delete_memory(&db, "mem-1").await.unwrap());
        assert!(!delete_memory(&db, "mem-1").await.unwrap());
    }

    #[tokio::test]
    async fn context_query_excludes_current_session() {
        let db = setup_db().await;
        let mut own = make_memory("own", "demo", 1_000);
        own.session_id = Some("session-a".into());
        let mut other = make_memory("other", "demo", 2_000);
        other.session_id = Some("session-b".into());
        save_memory(&db, &own).await.unwrap();
        save_memory(&db, &other).await.unwrap();

        let memories = memories_for_context(&db, "demo", Some("session-a"), None, 10)
            .await
            .unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].id, "other");
    }

    #[tokio::test]
    async fn context_query_applies_age_cutoff() {
        let db = setup_db().await;
        let recent = make_memory("recent", "demo", now_ms());
        let ancient = make_memory("ancient", "demo", now_ms() - 90 * 24 * 60 * 60 * 1000);
        save_memory(&db, &recent).await.unwrap();
        save_memory(&db, &ancient).await.unwrap();

        let memories = memories_for_context(&db, "demo", None, Some(30), 10)
            .await
            .unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].id, "recent");
    }

    #[tokio::test]
    async fn by_session_scopes_to_project() {
        let db = setup_db().await;
        save_memory(&db, &make_memory("a", "demo", 1_000)).await.unwrap();
        save_memory(&db, &make_memory("b", "elsewhere", 2_000)).await.unwrap();

        let memories = memories_by_session(&db, "sess-1", "demo", 5).await.unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].id, "a");
    }
}
