// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Observation append and read operations.
//!
//! Observations are append-only: there is no update path. The FTS5 mirror
//! is maintained by triggers, so a MATCH sees a new row within the same
//! transaction boundary as its insert.

use std::str::FromStr;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter};

use ocmem_core::{Observation, ObservationDraft, ObservationKind, OcmemError, now_ms};

use crate::database::{Database, map_tr_err};

const OBSERVATION_COLUMNS: &str = "id, session_id, project, kind, title, subtitle, text, \
     facts, files_read, files_modified, prompt_number, created_at_ms";

fn row_to_observation(row: &rusqlite::Row) -> Result<Observation, rusqlite::Error> {
    let kind: String = row.get(3)?;
    let facts: String = row.get(7)?;
    let files_read: String = row.get(8)?;
    let files_modified: String = row.get(9)?;
    Ok(Observation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        project: row.get(2)?,
        kind: ObservationKind::from_str(&kind).unwrap_or_default(),
        title: row.get(4)?,
        subtitle: row.get(5)?,
        text: row.get(6)?,
        facts: serde_json::from_str(&facts).unwrap_or_default(),
        files_read: serde_json::from_str(&files_read).unwrap_or_default(),
        files_modified: serde_json::from_str(&files_modified).unwrap_or_default(),
        prompt_number: row.get(10)?,
        created_at_ms: row.get(11)?,
    })
}

/// Append an observation. The store assigns id and timestamp.
pub async fn insert_observation(
    db: &Database,
    draft: ObservationDraft,
) -> Result<Observation, OcmemError> {
    db.connection()
        .call(move |conn| {
            let now = now_ms();
            let facts = serde_json::to_string(&draft.facts).unwrap_or_else(|_| "[]".into());
            let files_read =
                serde_json::to_string(&draft.files_read).unwrap_or_else(|_| "[]".into());
            let files_modified =
                serde_json::to_string(&draft.files_modified).unwrap_or_else(|_| "[]".into());
            conn.execute(
                "INSERT INTO observations
                     (session_id, project, kind, title, subtitle, text,
                      facts, files_read, files_modified, prompt_number, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    draft.session_id,
                    draft.project,
                    draft.kind.to_string(),
                    draft.title,
                    draft.subtitle,
                    draft.text,
                    facts,
                    files_read,
                    files_modified,
                    draft.prompt_number,
                    now,
                ],
            )?;
            Ok(Observation {
                id: conn.last_insert_rowid(),
                session_id: draft.session_id,
                project: draft.project,
                kind: draft.kind,
                title: draft.title,
                subtitle: draft.subtitle,
                text: draft.text,
                facts: draft.facts,
                files_read: draft.files_read,
                files_modified: draft.files_modified,
                prompt_number: draft.prompt_number,
                created_at_ms: now,
            })
        })
        .await
        .map_err(map_tr_err)
}

/// Get a single observation by id.
pub async fn get_observation(db: &Database, id: i64) -> Result<Option<Observation>, OcmemError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id = ?1"
            ))?;
            match stmt.query_row(params![id], row_to_observation) {
                Ok(obs) => Ok(Some(obs)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Batch fetch by ids, optionally constrained to a project.
///
/// `order_by_date` sorts by `created_at_ms` ascending; otherwise by id.
pub async fn get_by_ids(
    db: &Database,
    ids: &[i64],
    project: Option<&str>,
    order_by_date: bool,
) -> Result<Vec<Observation>, OcmemError> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let ids = ids.to_vec();
    let project = project.map(|p| p.to_string());
    db.connection()
        .call(move |conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
            let mut sql = format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id IN ({})",
                placeholders.join(", ")
            );
            let mut values: Vec<Value> = ids.iter().map(|id| Value::Integer(*id)).collect();
            if let Some(project) = project {
                sql.push_str(&format!(" AND project = ?{}", values.len() + 1));
                values.push(Value::Text(project));
            }
            sql.push_str(if order_by_date {
                " ORDER BY created_at_ms ASC, id ASC"
            } else {
                " ORDER BY id ASC"
            });

            let mut stmt = conn.prepare(&sql)?;
            let observations = stmt
                .query_map(params_from_iter(values), row_to_observation)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(observations)
        })
        .await
        .map_err(map_tr_err)
}

/// All observations of one session in time order.
pub async fn observations_for_session(
    db: &Database,
    session_id: &str,
) -> Result<Vec<Observation>, OcmemError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations
                 WHERE session_id = ?1 ORDER BY created_at_ms ASC, id ASC"
            ))?;
            let observations = stmt
                .query_map(params![session_id], row_to_observation)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(observations)
        })
        .await
        .map_err(map_tr_err)
}

/// Resolve a free-text timeline anchor: the most recent observation whose
/// title or text contains `query` (case insensitive). Ties go to the
/// higher id.
pub async fn find_anchor_by_query(
    db: &Database,
    query: &str,
    project: Option<&str>,
) -> Result<Option<Observation>, OcmemError> {
    let query = query.to_lowercase();
    let project = project.map(|p| p.to_string());
    db.connection()
        .call(move |conn| {
            let mut sql = format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations
                 WHERE (instr(lower(title), ?1) > 0 OR instr(lower(text), ?1) > 0)"
            );
            let mut values: Vec<Value> = vec![Value::Text(query)];
            if let Some(project) = project {
                sql.push_str(" AND project = ?2");
                values.push(Value::Text(project));
            }
            sql.push_str(" ORDER BY created_at_ms DESC, id DESC LIMIT 1");

            let mut stmt = conn.prepare(&sql)?;
            match stmt.query_row(params_from_iter(values), row_to_observation) {
                Ok(obs) => Ok(Some(obs)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Observations strictly before the anchor timestamp, newest first.
pub async fn observations_before(
    db: &Database,
    anchor_ms: i64,
    project: Option<&str>,
    depth: usize,
) -> Result<Vec<Observation>, OcmemError> {
    neighbors(db, anchor_ms, project, depth, true).await
}

/// Observations strictly after the anchor timestamp, oldest first.
pub async fn observations_after(
    db: &Database,
    anchor_ms: i64,
    project: Option<&str>,
    depth: usize,
) -> Result<Vec<Observation>, OcmemError> {
    neighbors(db, anchor_ms, project, depth, false).await
}

async fn neighbors(
    db: &Database,
    anchor_ms: i64,
    project: Option<&str>,
    depth: usize,
    before: bool,
) -> Result<Vec<Observation>, OcmemError> {
    let project = project.map(|p| p.to_string());
    db.connection()
        .call(move |conn| {
            let comparison = if before {
                "created_at_ms < ?1"
            } else {
                "created_at_ms > ?1"
            };
            let order = if before {
                "created_at_ms DESC, id DESC"
            } else {
                "created_at_ms ASC, id ASC"
            };
            let mut sql = format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE {comparison}"
            );
            let mut values: Vec<Value> = vec![Value::Integer(anchor_ms)];
            if let Some(project) = project {
                sql.push_str(" AND project = ?2");
                values.push(Value::Text(project));
            }
            sql.push_str(&format!(" ORDER BY {order} LIMIT {depth}"));

            let mut stmt = conn.prepare(&sql)?;
            let observations = stmt
                .query_map(params_from_iter(values), row_to_observation)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(observations)
        })
        .await
        .map_err(map_tr_err)
}

/// Execute an FTS5 MATCH against the observation mirror.
///
/// `match_expr` is a compiled prefix-AND token expression. Results are
/// ordered by the built-in BM25 ranking (ascending = most relevant first)
/// and capped at `limit`. Returns the joined observation and its BM25 score.
pub async fn fts_search(
    db: &Database,
    match_expr: &str,
    project: Option<&str>,
    kind: Option<ObservationKind>,
    date_start_ms: Option<i64>,
    date_end_ms: Option<i64>,
    limit: usize,
) -> Result<Vec<(Observation, f64)>, OcmemError> {
    let match_expr = match_expr.to_string();
    let project = project.map(|p| p.to_string());
    let kind = kind.map(|k| k.to_string());
    db.connection()
        .call(move |conn| {
            let mut sql = format!(
                "SELECT {cols}, bm25(observations_fts) AS rank
                 FROM observations_fts
                 JOIN observations o ON o.id = observations_fts.rowid
                 WHERE observations_fts MATCH ?1",
                cols = "o.id, o.session_id, o.project, o.kind, o.title, o.subtitle, o.text, \
                        o.facts, o.files_read, o.files_modified, o.prompt_number, o.created_at_ms"
            );
            let mut values: Vec<Value> = vec![Value::Text(match_expr)];
            if let Some(project) = project {
                values.push(Value::Text(project));
                sql.push_str(&format!(" AND o.project = ?{}", values.len()));
            }
            if let Some(kind) = kind {
                values.push(Value::Text(kind));
                sql.push_str(&format!(" AND o.kind = ?{}", values.len()));
            }
            if let Some(start) = date_start_ms {
                values.push(Value::Integer(start));
                sql.push_str(&format!(" AND o.created_at_ms >= ?{}", values.len()));
            }
            if let Some(end) = date_end_ms {
                values.push(Value::Integer(end));
                sql.push_str(&format!(" AND o.created_at_ms <= ?{}", values.len()));
            }
            sql.push_str(&format!(" ORDER BY bm25(observations_fts) ASC LIMIT {limit}"));

            let mut stmt = conn.prepare(&sql)?;
            let results = stmt
                .query_map(params_from_iter(values), |row| {
                    let obs = row_to_observation(row)?;
                    let rank: f64 = row.get(12)?;
                    Ok((obs, rank))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(results)
        })
        .await
        .map_err(map_tr_err)
}

/// Fallback substring scan over title, text, and subtitle, newest first.
pub async fn substring_search(
    db: &Database,
    query: &str,
    project: Option<&str>,
    limit: usize,
) -> Result<Vec<Observation>, OcmemError> {
    let query = query.to_lowercase();
    let project = project.map(|p| p.to_string());
    db.connection()
        .call(move |conn| {
            let mut sql = format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations
                 WHERE (instr(lower(title), ?1) > 0
                        OR instr(lower(text), ?1) > 0
                        OR instr(lower(coalesce(subtitle, '')), ?1) > 0)"
            );
            let mut values: Vec<Value> = vec![Value::Text(query)];
            if let Some(project) = project {
                sql.push_str(" AND project = ?2");
                values.push(Value::Text(project));
            }
            sql.push_str(&format!(" ORDER BY created_at_ms DESC, id DESC LIMIT {limit}"));

            let mut stmt = conn.prepare(&sql)?;
            let observations = stmt
                .query_map(params_from_iter(values), row_to_observation)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(observations)
        })
        .await
        .map_err(map_tr_err)
}

/// The most recent observations lacking a vector, for embedding backfill.
pub async fn recent_missing_vectors(
    db: &Database,
    limit: usize,
) -> Result<Vec<i64>, OcmemError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT o.id FROM observations o
                 LEFT JOIN observation_vectors v ON v.observation_id = o.id
                 WHERE v.observation_id IS NULL
                 ORDER BY o.created_at_ms DESC, o.id DESC LIMIT {limit}"
            ))?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
        .await
        .map_err(map_tr_err)
}

/// Observations with `id > cursor` and non-empty text, oldest id first.
/// Drives the external replicator batch scan.
pub async fn observations_after_id(
    db: &Database,
    cursor: i64,
    project: Option<&str>,
    batch: usize,
) -> Result<Vec<Observation>, OcmemError> {
    let project = project.map(|p| p.to_string());
    db.connection()
        .call(move |conn| {
            let mut sql = format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations
                 WHERE id > ?1 AND length(trim(text)) > 0"
            );
            let mut values: Vec<Value> = vec![Value::Integer(cursor)];
            if let Some(project) = project {
                sql.push_str(" AND project = ?2");
                values.push(Value::Text(project));
            }
            sql.push_str(&format!(" ORDER BY id ASC LIMIT {batch}"));

            let mut stmt = conn.prepare(&sql)?;
            let observations = stmt
                .query_map(params_from_iter(values), row_to_observation)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(observations)
        })
        .await
        .map_err(map_tr_err)
}

/// Total number of observations.
pub async fn count_observations(db: &Database) -> Result<i64, OcmemError> {
    db.connection()
        .call(|conn| {
            let count =
                conn.query_row("SELECT COUNT(*) FROM observations", [], |row| row.get(0))?;
            Ok(count)
        })
        .await
        .map_err(map_tr_err)
}
