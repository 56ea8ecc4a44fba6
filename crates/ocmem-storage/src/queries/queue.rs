// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable queue operations: at-least-once delivery with dedup keys,
//! retry scheduling, and dead-lettering.
//!
//! Dedup is advisory: the enqueue-side check keeps the queue from
//! accumulating duplicates, but true idempotence requires the consumer to
//! call [`mark_event_processed`] after a successful handle.

use rusqlite::OptionalExtension;
use rusqlite::params;
use rusqlite::types::Value;

use ocmem_core::{DeadLetter, EnqueueOutcome, OcmemError, PendingMessage, now_ms};

use crate::database::{Database, map_tr_err};

const MESSAGE_COLUMNS: &str = "id, queue_name, entity_id, payload, dedup_key, \
     retry_count, max_retries, created_at_ms, next_retry_at_ms";

fn row_to_message(row: &rusqlite::Row) -> Result<PendingMessage, rusqlite::Error> {
    Ok(PendingMessage {
        id: row.get(0)?,
        queue_name: row.get(1)?,
        entity_id: row.get(2)?,
        payload: row.get(3)?,
        dedup_key: row.get(4)?,
        retry_count: row.get(5)?,
        max_retries: row.get(6)?,
        created_at_ms: row.get(7)?,
        next_retry_at_ms: row.get(8)?,
    })
}

fn row_to_dead_letter(row: &rusqlite::Row) -> Result<DeadLetter, rusqlite::Error> {
    Ok(DeadLetter {
        id: row.get(0)?,
        queue_name: row.get(1)?,
        entity_id: row.get(2)?,
        payload: row.get(3)?,
        reason: row.get(4)?,
        created_at_ms: row.get(5)?,
    })
}

/// Enqueue a message.
///
/// With a dedup key: a key already marked processed returns
/// [`EnqueueOutcome::Duplicate`] and writes nothing; a pending row with the
/// same `(queue_name, dedup_key)` returns its id unchanged.
pub async fn enqueue(
    db: &Database,
    queue_name: &str,
    entity_id: &str,
    payload: &serde_json::Value,
    max_retries: Option<i64>,
    delay_ms: Option<i64>,
    dedup_key: Option<&str>,
) -> Result<EnqueueOutcome, OcmemError> {
    let queue_name = queue_name.to_string();
    let entity_id = entity_id.to_string();
    let payload = payload.to_string();
    let dedup_key = dedup_key.map(|k| k.to_string());
    let max_retries = max_retries.unwrap_or(3);
    db.connection()
        .call(move |conn| {
            if let Some(key) = &dedup_key {
                let processed: Option<String> = conn
                    .query_row(
                        "SELECT event_key FROM processed_events WHERE event_key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                if processed.is_some() {
                    return Ok(EnqueueOutcome::Duplicate);
                }

                let pending: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM pending_messages
                         WHERE queue_name = ?1 AND dedup_key = ?2",
                        params![queue_name, key],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(id) = pending {
                    return Ok(EnqueueOutcome::Coalesced(id));
                }
            }

            let now = now_ms();
            let next_retry_at_ms = delay_ms.map(|d| now + d);
            conn.execute(
                "INSERT INTO pending_messages
                     (queue_name, entity_id, payload, dedup_key,
                      retry_count, max_retries, created_at_ms, next_retry_at_ms)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7)",
                params![
                    queue_name,
                    entity_id,
                    payload,
                    dedup_key,
                    max_retries,
                    now,
                    next_retry_at_ms,
                ],
            )?;
            Ok(EnqueueOutcome::Queued(conn.last_insert_rowid()))
        })
        .await
        .map_err(map_tr_err)
}

/// Messages ready for processing: visible (`next_retry_at_ms` unset or due)
/// and under their retry budget, oldest first.
pub async fn get_ready(
    db: &Database,
    queue_name: Option<&str>,
    limit: usize,
) -> Result<Vec<PendingMessage>, OcmemError> {
    let queue_name = queue_name.map(|q| q.to_string());
    db.connection()
        .call(move |conn| {
            let mut sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM pending_messages
                 WHERE (next_retry_at_ms IS NULL OR next_retry_at_ms <= ?1)
                   AND retry_count < max_retries"
            );
            let mut values: Vec<Value> = vec![Value::Integer(now_ms())];
            if let Some(queue) = queue_name {
                sql.push_str(" AND queue_name = ?2");
                values.push(Value::Text(queue));
            }
            sql.push_str(&format!(" ORDER BY created_at_ms ASC, id ASC LIMIT {limit}"));

            let mut stmt = conn.prepare(&sql)?;
            let messages = stmt
                .query_map(rusqlite::params_from_iter(values), row_to_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch a single pending message by id.
pub async fn get_pending(db: &Database, id: i64) -> Result<Option<PendingMessage>, OcmemError> {
    db.connection()
        .call(move |conn| {
            let msg = conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM pending_messages WHERE id = ?1"),
                    params![id],
                    row_to_message,
                )
                .optional()?;
            Ok(msg)
        })
        .await
        .map_err(map_tr_err)
}

/// Record a failed attempt.
///
/// Returns `true` when the message will be retried (the next attempt is
/// scheduled `next_delay_ms` from now). Returns `false` when the retry
/// budget is exhausted; the caller is responsible for dead-lettering and
/// removing the row.
pub async fn increment_retry(
    db: &Database,
    id: i64,
    next_delay_ms: Option<i64>,
) -> Result<bool, OcmemError> {
    db.connection()
        .call(move |conn| {
            let (retry_count, max_retries): (i64, i64) = conn.query_row(
                "SELECT retry_count, max_retries FROM pending_messages WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let new_count = retry_count + 1;
            if new_count >= max_retries {
                conn.execute(
                    "UPDATE pending_messages
                     SET retry_count = ?1, next_retry_at_ms = NULL WHERE id = ?2",
                    params![new_count, id],
                )?;
                Ok(false)
            } else {
                let next = next_delay_ms.map(|d| now_ms() + d);
                conn.execute(
                    "UPDATE pending_messages
                     SET retry_count = ?1, next_retry_at_ms = ?2 WHERE id = ?3",
                    params![new_count, next, id],
                )?;
                Ok(true)
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Remove a message after successful processing (or dead-lettering).
pub async fn mark_processed(db: &Database, id: i64) -> Result<(), OcmemError> {
    db.connection()
        .call(move |conn| {
            conn.execute("DELETE FROM pending_messages WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record an event key in the idempotency log. Ignores conflicts.
pub async fn mark_event_processed(
    db: &Database,
    event_key: &str,
    queue_name: &str,
    entity_id: Option<&str>,
) -> Result<(), OcmemError> {
    let event_key = event_key.to_string();
    let queue_name = queue_name.to_string();
    let entity_id = entity_id.map(|e| e.to_string());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO processed_events
                     (event_key, queue_name, entity_id, processed_at_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![event_key, queue_name, entity_id, now_ms()],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Whether an event key is already in the idempotency log.
pub async fn is_event_processed(db: &Database, event_key: &str) -> Result<bool, OcmemError> {
    let event_key = event_key.to_string();
    db.connection()
        .call(move |conn| {
            let found: Option<String> = conn
                .query_row(
                    "SELECT event_key FROM processed_events WHERE event_key = ?1",
                    params![event_key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
        .map_err(map_tr_err)
}

/// Write a dead letter. Returns the new row id.
pub async fn write_dead_letter(
    db: &Database,
    queue_name: &str,
    entity_id: &str,
    payload: &str,
    reason: &str,
) -> Result<i64, OcmemError> {
    let queue_name = queue_name.to_string();
    let entity_id = entity_id.to_string();
    let payload = payload.to_string();
    let reason = reason.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO dead_letters (queue_name, entity_id, payload, reason, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![queue_name, entity_id, payload, reason, now_ms()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// Oldest dead letters, optionally for one queue.
pub async fn list_dead_letters(
    db: &Database,
    queue_name: Option<&str>,
    limit: usize,
) -> Result<Vec<DeadLetter>, OcmemError> {
    let queue_name = queue_name.map(|q| q.to_string());
    db.connection()
        .call(move |conn| {
            let mut sql = "SELECT id, queue_name, entity_id, payload, reason, created_at_ms
                 FROM dead_letters"
                .to_string();
            let mut values: Vec<Value> = Vec::new();
            if let Some(queue) = queue_name {
                sql.push_str(" WHERE queue_name = ?1");
                values.push(Value::Text(queue));
            }
            sql.push_str(&format!(" ORDER BY created_at_ms ASC, id ASC LIMIT {limit}"));

            let mut stmt = conn.prepare(&sql)?;
            let letters = stmt
                .query_map(rusqlite::params_from_iter(values), row_to_dead_letter)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(letters)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a dead letter (after successful replay).
pub async fn delete_dead_letter(db: &Database, id: i64) -> Result<(), OcmemError> {
    db.connection()
        .call(move |conn| {
            conn.execute("DELETE FROM dead_letters WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Number of pending messages, optionally for one queue.
pub async fn count_pending(db: &Database, queue_name: Option<&str>) -> Result<i64, OcmemError> {
    count_table(db, "pending_messages", queue_name).await
}

/// Number of dead letters, optionally for one queue.
pub async fn count_dead_letters(
    db: &Database,
    queue_name: Option<&str>,
) -> Result<i64, OcmemError> {
    count_table(db, "dead_letters", queue_name).await
}

async fn count_table(
    db: &Database,
    table: &'static str,
    queue_name: Option<&str>,
) -> Result<i64, OcmemError> {
    let queue_name = queue_name.map(|q| q.to_string());
    db.connection()
        .call(move |conn| {
            let count = match queue_name {
                Some(queue) => conn.query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE queue_name = ?1"),
                    params![queue],
                    |row| row.get(0),
                )?,
                None => conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?,
            };
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

    fn payload(n: i64) -> serde_json::Value {
        serde_json::json!({ "data": n })
    }

    #[tokio::test]
    async fn enqueue_and_get_ready_round_trips() {
        let db = setup_db().await;
        let outcome = enqueue(&db, "ingest", "s-1", &payload(1), None, None, None)
            .await
            .unwrap();
        let id = outcome.message_id();
        assert!(id > 0);

        let ready = get_ready(&db, Some("ingest"), 10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, id);
        assert_eq!(ready[0].retry_count, 0);
        assert_eq!(ready[0].max_retries, 3);
    }

    #[tokio::test]
    async fn delayed_message_is_invisible_until_due() {
        let db = setup_db().await;
        enqueue(&db, "ingest", "s-1", &payload(1), None, Some(60_000), None)
            .await
            .unwrap();

        let ready = get_ready(&db, Some("ingest"), 10).await.unwrap();
        assert!(ready.is_empty(), "delayed message must not be visible yet");
    }

    #[tokio::test]
    async fn processed_dedup_key_returns_duplicate_sentinel() {
        let db = setup_db().await;
        mark_event_processed(&db, "dedup-1", "observation", Some("s-1"))
            .await
            .unwrap();

        let outcome = enqueue(
            &db,
            "observation",
            "s-1",
            &payload(1),
            None,
            None,
            Some("dedup-1"),
        )
        .await
        .unwrap();
        assert!(outcome.is_duplicate());
        assert_eq!(outcome.message_id(), -1);
        assert_eq!(count_pending(&db, Some("observation")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pending_dedup_key_coalesces_to_same_id() {
        let db = setup_db().await;
        let first = enqueue(
            &db,
            "observation",
            "s-1",
            &payload(1),
            None,
            None,
            Some("dedup-2"),
        )
        .await
        .unwrap();
        let second = enqueue(
            &db,
            "observation",
            "s-1",
            &payload(2),
            None,
            None,
            Some("dedup-2"),
        )
        .await
        .unwrap();

        let first_id = first.message_id();
        assert!(first_id > 0);
        assert_eq!(second, EnqueueOutcome::Coalesced(first_id));
        assert_eq!(count_pending(&db, Some("observation")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retry_budget_state_machine() {
        let db = setup_db().await;
        let id = enqueue(&db, "ingest", "s-1", &payload(1), Some(2), None, None)
            .await
            .unwrap()
            .message_id();

        // First failure: still retryable, scheduled in the future.
        let will_retry = increment_retry(&db, id, Some(30_000)).await.unwrap();
        assert!(will_retry);
        assert!(get_ready(&db, Some("ingest"), 10).await.unwrap().is_empty());
        let msg = get_pending(&db, id).await.unwrap().unwrap();
        assert_eq!(msg.retry_count, 1);
        assert!(msg.next_retry_at_ms.is_some());

        // Second failure hits max_retries = 2.
        let will_retry = increment_retry(&db, id, Some(30_000)).await.unwrap();
        assert!(!will_retry);
        let msg = get_pending(&db, id).await.unwrap().unwrap();
        assert_eq!(msg.retry_count, 2);
        assert!(msg.next_retry_at_ms.is_none());
        // Exhausted messages never show up as ready.
        assert!(get_ready(&db, Some("ingest"), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_processed_removes_row() {
        let db = setup_db().await;
        let id = enqueue(&db, "ingest", "s-1", &payload(1), None, None, None)
            .await
            .unwrap()
            .message_id();
        mark_processed(&db, id).await.unwrap();
        assert!(get_pending(&db, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn event_processing_log_is_idempotent() {
        let db = setup_db().await;
        assert!(!is_event_processed(&db, "k").await.unwrap());
        mark_event_processed(&db, "k", "ingest", None).await.unwrap();
        mark_event_processed(&db, "k", "ingest", None).await.unwrap();
        assert!(is_event_processed(&db, "k").await.unwrap());
    }

    #[tokio::test]
    async fn dead_letters_list_oldest_first_and_delete() {
        let db = setup_db().await;
        let a = write_dead_letter(&db, "chroma_sync", "1", "{}", "upsert failed")
            .await
            .unwrap();
        let b = write_dead_letter(&db, "chroma_sync", "2", "{}", "upsert failed")
            .await
            .unwrap();
        write_dead_letter(&db, "session_ingest", "3", "{}", "max_retries_exceeded")
            .await
            .unwrap();

        let letters = list_dead_letters(&db, Some("chroma_sync"), 10).await.unwrap();
        assert_eq!(letters.iter().map(|l| l.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(count_dead_letters(&db, None).await.unwrap(), 3);

        delete_dead_letter(&db, a).await.unwrap();
        assert_eq!(count_dead_letters(&db, Some("chroma_sync")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ready_ordering_is_fifo() {
        let db = setup_db().await;
        let first = enqueue(&db, "q", "a", &payload(1), None, None, None)
            .await
            .unwrap()
            .message_id();
        let second = enqueue(&db, "q", "b", &payload(2), None, None, None)
            .await
            .unwrap()
            .message_id();

        let ready = get_ready(&db, Some("q"), 10).await.unwrap();
        assert_eq!(
            ready.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![first, second]
        );
    }
}
