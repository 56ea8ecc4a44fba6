// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded database migrations using refinery.
//!
//! SQL migration files are compiled into the binary at build time via
//! `embed_migrations!` and applied in order on database open. Refinery
//! records applied migrations in its history table and refuses to run when
//! an applied migration is missing from (or diverges from) the embedded
//! list, which makes schema inconsistency fatal at startup.

use rusqlite::Connection;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Run all pending migrations against the given connection.
pub fn run_migrations(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    embedded::migrations::runner()
        .run(conn)
        .map_err(|e| rusqlite::Error::ModuleError(format!("migration failed: {e}")))?;
    Ok(())
}
