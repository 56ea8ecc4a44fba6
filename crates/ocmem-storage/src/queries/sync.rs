// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Replication bookkeeping: the key-value sync state (cursors, content
//! hashes) and per-run sync_runs rows.

use std::str::FromStr;

use rusqlite::OptionalExtension;
use rusqlite::params;

use ocmem_core::{OcmemError, SyncRun, SyncRunStatus, now_ms};

use crate::database::{Database, map_tr_err};

fn row_to_run(row: &rusqlite::Row) -> Result<SyncRun, rusqlite::Error> {
    let status: String = row.get(3)?;
    Ok(SyncRun {
        id: row.get(0)?,
        provider: row.get(1)?,
        project: row.get(2)?,
        status: SyncRunStatus::from_str(&status).unwrap_or(SyncRunStatus::Failed),
        synced_count: row.get(4)?,
        failed_count: row.get(5)?,
        conflict_count: row.get(6)?,
        retry_count: row.get(7)?,
        started_at_ms: row.get(8)?,
        ended_at_ms: row.get(9)?,
        details: row.get(10)?,
    })
}

const RUN_COLUMNS: &str = "id, provider, project, status, synced_count, failed_count, \
     conflict_count, retry_count, started_at_ms, ended_at_ms, details";

/// Read a sync-state value.
pub async fn get_state(db: &Database, key: &str) -> Result<Option<String>, OcmemError> {
    let key = key.to_string();
    db.connection()
        .call(move |conn| {
            let value = conn
                .query_row(
                    "SELECT state_value FROM sync_state WHERE state_key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
        .map_err(map_tr_err)
}

/// Write a sync-state value, replacing any previous one.
pub async fn set_state(db: &Database, key: &str, value: &str) -> Result<(), OcmemError> {
    let key = key.to_string();
    let value = value.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sync_state (state_key, state_value, updated_at_ms)
                 VALUES (?1, ?2, ?3)",
                params![key, value, now_ms()],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a sync-state key.
pub async fn delete_state(db: &Database, key: &str) -> Result<(), OcmemError> {
    let key = key.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute("DELETE FROM sync_state WHERE state_key = ?1", params![key])?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Open a sync run in the `running` state. Returns the run id.
pub async fn start_run(
    db: &Database,
    provider: &str,
    project: Option<&str>,
) -> Result<i64, OcmemError> {
    let provider = provider.to_string();
    let project = project.map(|p| p.to_string());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO sync_runs (provider, project, status, started_at_ms)
                 VALUES (?1, ?2, 'running', ?3)",
                params![provider, project, now_ms()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// Close a sync run with its final status and counters.
#[allow(clippy::too_many_arguments)]
pub async fn finish_run(
    db: &Database,
    id: i64,
    status: SyncRunStatus,
    synced: i64,
    failed: i64,
    conflicts: i64,
    retries: i64,
    details: Option<&str>,
) -> Result<(), OcmemError> {
    let status = status.to_string();
    let details = details.map(|d| d.to_string());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sync_runs
                 SET status = ?1, synced_count = ?2, failed_count = ?3,
                     conflict_count = ?4, retry_count = ?5, ended_at_ms = ?6, details = ?7
                 WHERE id = ?8",
                params![status, synced, failed, conflicts, retries, now_ms(), details, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// The most recently started sync run, if any.
pub async fn last_run(db: &Database) -> Result<Option<SyncRun>, OcmemError> {
    db.connection()
        .call(|conn| {
            let run = conn
                .query_row(
                    &format!(
                        "SELECT {RUN_COLUMNS} FROM sync_runs
                         ORDER BY started_at_ms DESC, id DESC LIMIT 1"
                    ),
                    [],
                    row_to_run,
                )
                .optional()?;
            Ok(run)
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

    #[tokio::test]
    async fn state_round_trips_and_replaces() {
        let db = setup_db().await;
        assert!(get_state(&db, "chroma.cursor.demo").await.unwrap().is_none());

        set_state(&db, "chroma.cursor.demo", "42").await.unwrap();
        assert_eq!(
            get_state(&db, "chroma.cursor.demo").await.unwrap().as_deref(),
            Some("42")
        );

        set_state(&db, "chroma.cursor.demo", "100").await.unwrap();
        assert_eq!(
            get_state(&db, "chroma.cursor.demo").await.unwrap().as_deref(),
            Some("100")
        );

        delete_state(&db, "chroma.cursor.demo").await.unwrap();
        assert!(get_state(&db, "chroma.cursor.demo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let db = setup_db().await;
        let id = start_run(&db, "chroma", Some("demo")).await.unwrap();

        let running = last_run(&db).await.unwrap().unwrap();
        assert_eq!(running.id, id);
        assert_eq!(running.status, SyncRunStatus::Running);
        assert!(running.ended_at_ms.is_none());

        finish_run(&db, id, SyncRunStatus::Success, 10, 1, 2, 3, Some("ok"))
            .await
            .unwrap();
        let finished = last_run(&db).await.unwrap().unwrap();
        assert_eq!(finished.status, SyncRunStatus::Success);
        assert_eq!(finished.synced_count, 10);
        assert_eq!(finished.failed_count, 1);
        assert_eq!(finished.conflict_count, 2);
        assert_eq!(finished.retry_count, 3);
        assert!(finished.ended_at_ms.is_some());
        assert_eq!(finished.details.as_deref(), Some("ok"));
    }
}
