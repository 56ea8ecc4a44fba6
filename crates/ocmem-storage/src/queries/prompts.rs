// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! User prompt operations.
//!
//! Prompt numbers are assigned server-side as `max + 1` within the session,
//! computed inside the single-writer connection so concurrent inserts for
//! one session cannot collide.

use rusqlite::params;

use ocmem_core::{OcmemError, UserPrompt, now_ms};

use crate::database::{Database, map_tr_err};

fn row_to_prompt(row: &rusqlite::Row) -> Result<UserPrompt, rusqlite::Error> {
    Ok(UserPrompt {
        id: row.get(0)?,
        session_id: row.get(1)?,
        prompt_number: row.get(2)?,
        text: row.get(3)?,
        created_at_ms: row.get(4)?,
    })
}

/// Insert a user prompt, assigning the next prompt number in the session.
pub async fn insert_user_prompt(
    db: &Database,
    session_id: &str,
    text: &str,
) -> Result<UserPrompt, OcmemError> {
    let session_id = session_id.to_string();
    let text = text.to_string();
    db.connection()
        .call(move |conn| {
            let next: i64 = conn.query_row(
                "SELECT COALESCE(MAX(prompt_number), 0) + 1
                 FROM user_prompts WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            let now = now_ms();
            conn.execute(
                "INSERT INTO user_prompts (session_id, prompt_number, text, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, next, text, now],
            )?;
            Ok(UserPrompt {
                id: conn.last_insert_rowid(),
                session_id,
                prompt_number: next,
                text,
                created_at_ms: now,
            })
        })
        .await
        .map_err(map_tr_err)
}

/// All prompts for a session, ordered by prompt number.
pub async fn prompts_for_session(
    db: &Database,
    session_id: &str,
) -> Result<Vec<UserPrompt>, OcmemError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, prompt_number, text, created_at_ms
                 FROM user_prompts WHERE session_id = ?1 ORDER BY prompt_number ASC",
            )?;
            let prompts = stmt
                .query_map(params![session_id], row_to_prompt)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(prompts)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::queries::sessions::init_session;

    async fn setup_db() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        init_session(&db, "sess-1", "demo").await.unwrap();
        db
    }

    #[tokio::test]
    async fn prompt_numbers_are_monotonic_per_session() {
        let db = setup_db().await;
        init_session(&db, "sess-2", "demo").await.unwrap();

        let p1 = insert_user_prompt(&db, "sess-1", "first").await.unwrap();
        let p2 = insert_user_prompt(&db, "sess-1", "second").await.unwrap();
        let other = insert_user_prompt(&db, "sess-2", "unrelated").await.unwrap();

        assert_eq!(p1.prompt_number, 1);
        assert_eq!(p2.prompt_number, 2);
        assert_eq!(other.prompt_number, 1);
    }

    #[tokio::test]
    async fn prompts_listed_in_order() {
        let db = setup_db().await;
        for text in ["a", "b", "c"] {
            insert_user_prompt(&db, "sess-1", text).await.unwrap();
        }

        let prompts = prompts_for_session(&db, "sess-1").await.unwrap();
        assert_eq!(prompts.len(), 3);
        assert_eq!(
            prompts.iter().map(|p| p.prompt_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(prompts[2].text, "c");
    }

    #[tokio::test]
    async fn empty_session_has_no_prompts() {
        let db = setup_db().await;
        let prompts = prompts_for_session(&db, "sess-1").await.unwrap();
        assert!(prompts.is_empty());
    }
}
