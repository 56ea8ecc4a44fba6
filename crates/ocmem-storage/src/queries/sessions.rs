// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session lifecycle operations.

use std::str::FromStr;

use rusqlite::params;

use ocmem_core::{OcmemError, Session, SessionStatus, now_ms};

use crate::database::{Database, map_tr_err};

fn row_to_session(row: &rusqlite::Row) -> Result<Session, rusqlite::Error> {
    let status: String = row.get(2)?;
    Ok(Session {
        session_id: row.get(0)?,
        project: row.get(1)?,
        status: SessionStatus::from_str(&status).unwrap_or(SessionStatus::Failed),
        started_at_ms: row.get(3)?,
        completed_at_ms: row.get(4)?,
    })
}

const SESSION_COLUMNS: &str =
    "session_id, project, status, started_at_ms, completed_at_ms";

/// Upsert a session into the `active` state.
///
/// Re-initializing an existing session resets `started_at_ms` and clears
/// `completed_at_ms`, matching INSERT OR REPLACE keyed on `session_id`.
pub async fn init_session(
    db: &Database,
    session_id: &str,
    project: &str,
) -> Result<Session, OcmemError> {
    let session_id = session_id.to_string();
    let project = project.to_string();
    db.connection()
        .call(move |conn| {
            let now = now_ms();
            conn.execute(
                "INSERT OR REPLACE INTO sessions
                     (session_id, project, status, started_at_ms, completed_at_ms)
                 VALUES (?1, ?2, 'active', ?3, NULL)",
                params![session_id, project, now],
            )?;
            Ok(Session {
                session_id,
                project,
                status: SessionStatus::Active,
                started_at_ms: now,
                completed_at_ms: None,
            })
        })
        .await
        .map_err(map_tr_err)
}

/// Create a session in the `active` state only if none exists.
///
/// Sessions are created on first reference: observations and prompts may
/// arrive before an explicit init event.
pub async fn ensure_session(
    db: &Database,
    session_id: &str,
    project: &str,
) -> Result<(), OcmemError> {
    let session_id = session_id.to_string();
    let project = project.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO sessions
                     (session_id, project, status, started_at_ms, completed_at_ms)
                 VALUES (?1, ?2, 'active', ?3, NULL)",
                params![session_id, project, now_ms()],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Get a session by id.
pub async fn get_session(db: &Database, id: &str) -> Result<Option<Session>, OcmemError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"
            ))?;
            let result = stmt.query_row(params![id], row_to_session);
            match result {
                Ok(session) => Ok(Some(session)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Move an active session to a terminal state.
///
/// Returns `false` when the session did not exist or was already terminal;
/// completion happens exactly once.
pub async fn complete_session(
    db: &Database,
    id: &str,
    status: SessionStatus,
) -> Result<bool, OcmemError> {
    let id = id.to_string();
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            let updated = conn.execute(
                "UPDATE sessions SET status = ?1, completed_at_ms = ?2
                 WHERE session_id = ?3 AND status = 'active'",
                params![status, now_ms(), id],
            )?;
            Ok(updated > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Mark all sessions still `active` as `failed`.
///
/// Crash recovery: a previous process exit without graceful shutdown leaves
/// sessions active. Returns the number of sessions swept.
pub async fn sweep_stale_sessions(db: &Database) -> Result<usize, OcmemError> {
    db.connection()
        .call(move |conn| {
            let swept = conn.execute(
                "UPDATE sessions SET status = 'failed', completed_at_ms = ?1
                 WHERE status = 'active'",
                params![now_ms()],
            )?;
            Ok(swept)
        })
        .await
        .map_err(map_tr_err)
}

/// Total number of sessions.
pub async fn count_sessions(db: &Database) -> Result<i64, OcmemError> {
    db.connection()
        .call(|conn| {
            let count = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
            Ok(count)
        })
        .await
        .map_err(map_tr_err)
}
