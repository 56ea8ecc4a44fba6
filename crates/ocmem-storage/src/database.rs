// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread. The [`Database`] struct IS the single writer; query modules accept
//! `&Database` and call through `connection().call()`.
//!
//! Do NOT create additional Connection instances for writes.

use std::path::Path;

use tokio_rusqlite::Connection;

use ocmem_core::OcmemError;

use crate::migrations::run_migrations;

/// Bounded wait for a transiently locked database: readers retry for up to
/// 8 slices of 20 ms before a busy error surfaces.
const BUSY_TIMEOUT_MS: u64 = 160;

/// Map a tokio-rusqlite error into the workspace storage error.
pub fn map_tr_err(e: tokio_rusqlite::Error) -> OcmemError {
    OcmemError::Storage {
        source: Box::new(e),
    }
}

/// Handle to the single-writer SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at `path`, apply PRAGMAs, and run all
    /// pending migrations.
    ///
    /// A migration failure is fatal: the caller is expected to exit non-zero.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, OcmemError> {
        let conn = Connection::open(path.as_ref())
            .await
            .map_err(map_tr_err)?;
        Self::initialize(conn).await
    }

    /// Open an in-memory database with the full schema. Test use only.
    pub async fn open_in_memory() -> Result<Self, OcmemError> {
        let conn = Connection::open_in_memory().await.map_err(map_tr_err)?;
        Self::initialize(conn).await
    }

    async fn initialize(conn: Connection) -> Result<Self, OcmemError> {
        conn.call(move |conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)?;
            run_migrations(conn)?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        tracing::debug!("database opened, migrations current");
        Ok(Self { conn })
    }

    /// The underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Close the connection, flushing the WAL.
    pub async fn close(self) -> Result<(), OcmemError> {
        self.conn
            .close()
            .await
            .map_err(|e| OcmemError::Storage {
                source: Box::new(e),
            })
    }
}
