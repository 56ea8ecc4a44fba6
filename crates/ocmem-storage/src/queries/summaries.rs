// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session summary storage: at most one row per session.

use rusqlite::OptionalExtension;
use rusqlite::params;

use ocmem_core::{OcmemError, Summary, now_ms};

use crate::database::{Database, map_tr_err};

/// Fields of a summary as compiled by the generator.
#[derive(Debug, Clone, Default)]
pub struct SummaryDraft {
    pub request: Option<String>,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
}

fn row_to_summary(row: &rusqlite::Row) -> Result<Summary, rusqlite::Error> {
    Ok(Summary {
        id: row.get(0)?,
        session_id: row.get(1)?,
        request: row.get(2)?,
        investigated: row.get(3)?,
        learned: row.get(4)?,
        completed: row.get(5)?,
        next_steps: row.get(6)?,
        created_at_ms: row.get(7)?,
    })
}

/// Write (or replace) the summary for a session.
pub async fn upsert_summary(
    db: &Database,
    session_id: &str,
    draft: SummaryDraft,
) -> Result<(), OcmemError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO summaries
                     (session_id, request, investigated, learned, completed,
                      next_steps, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session_id,
                    draft.request,
                    draft.investigated,
                    draft.learned,
                    draft.completed,
                    draft.next_steps,
                    now_ms(),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Get the summary for a session, if one was compiled.
pub async fn get_summary(db: &Database, session_id: &str) -> Result<Option<Summary>, OcmemError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let summary = conn
                .query_row(
                    "SELECT id, session_id, request, investigated, learned, completed,
                            next_steps, created_at_ms
                     FROM summaries WHERE session_id = ?1",
                    params![session_id],
                    row_to_summary,
                )
                .optional()?;
            Ok(summary)
        })
        .await
        .map_err(map_tr_err)
}
