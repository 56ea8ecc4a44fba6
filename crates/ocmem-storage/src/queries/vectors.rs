// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Observation embedding storage as packed little-endian f32 BLOBs.

use rusqlite::OptionalExtension;
use rusqlite::params;

use ocmem_core::OcmemError;
use ocmem_core::types::{blob_to_vec, now_ms, vec_to_blob};

use crate::database::{Database, map_tr_err};

/// Store (or replace) the embedding for an observation.
pub async fn upsert_vector(
    db: &Database,
    observation_id: i64,
    embedding: &[f32],
    model: &str,
) -> Result<(), OcmemError> {
    let blob = vec_to_blob(embedding);
    let model = model.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO observation_vectors
                     (observation_id, embedding, model, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![observation_id, blob, model, now_ms()],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Whether an observation already has a stored vector.
pub async fn has_vector(db: &Database, observation_id: i64) -> Result<bool, OcmemError> {
    db.connection()
        .call(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT observation_id FROM observation_vectors WHERE observation_id = ?1",
                    params![observation_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
        .map_err(map_tr_err)
}

/// All vectors for observations in a project, as `(observation_id, vector)`.
pub async fn vectors_for_project(
    db: &Database,
    project: &str,
) -> Result<Vec<(i64, Vec<f32>)>, OcmemError> {
    let project = project.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT v.observation_id, v.embedding
                 FROM observation_vectors v
                 JOIN observations o ON o.id = v.observation_id
                 WHERE o.project = ?1",
            )?;
            let vectors = stmt
                .query_map(params![project], |row| {
                    let id: i64 = row.get(0)?;
                    let blob: Vec<u8> = row.get(1)?;
                    Ok((id, blob_to_vec(&blob)))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(vectors)
        })
        .await
        .map_err(map_tr_err)
}

/// Total number of stored vectors.
pub async fn count_vectors(db: &Database) -> Result<i64, OcmemError> {
    db.connection()
        .call(|conn| {
            let count = conn.query_row("SELECT COUNT(*) FROM observation_vectors", [], |row| {
                row.get(0)
            })?;
            Ok(count)
        })
        .await
        .map_err(map_tr_err)
}
