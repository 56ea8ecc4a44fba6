// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session lifecycle service.
//!
//! Opens and closes sessions and triggers summary compilation on close.
//! Summary generation is best-effort: a failure is logged and never
//! propagated into the completion path.

use std::sync::Arc;

use tracing::{info, warn};

use ocmem_core::{EventKind, EventSink, LiveEvent, OcmemError, Session, SessionStatus};
use ocmem_storage::Database;
use ocmem_storage::queries::sessions;

use crate::summary;

/// Opens and completes sessions.
pub struct SessionService {
    db: Database,
    events: Arc<dyn EventSink>,
}

impl SessionService {
    pub fn new(db: Database, events: Arc<dyn EventSink>) -> Self {
        Self { db, events }
    }

    /// Upsert a session into the active state.
    pub async fn init_session(
        &self,
        session_id: &str,
        project: &str,
    ) -> Result<Session, OcmemError> {
        let session = sessions::init_session(&self.db, session_id, project).await?;
        info!(session_id, project, "session initialized");
        self.events.emit(LiveEvent::new(
            EventKind::SessionInit,
            Some(project.to_string()),
            Some(session_id.to_string()),
            serde_json::json!({ "sessionId": session_id, "project": project }),
        ));
        Ok(session)
    }

    /// Complete a session exactly once, then compile its summary.
    ///
    /// Returns whether the session transitioned (false when it was
    /// already terminal or unknown).
    pub async fn complete_session(
        &self,
        session_id: &str,
        project: &str,
        status: SessionStatus,
    ) -> Result<bool, OcmemError> {
        sessions::ensure_session(&self.db, session_id, project).await?;
        let transitioned = sessions::complete_session(&self.db, session_id, status).await?;
        if !transitioned {
            return Ok(false);
        }

        if let Err(e) = summary::generate_from_session(&self.db, session_id).await {
            warn!(session_id, error = %e, "summary generation failed (non-fatal)");
        }

        info!(session_id, status = %status, "session completed");
        self.events.emit(LiveEvent::new(
            EventKind::SessionComplete,
            Some(project.to_string()),
            Some(session_id.to_string()),
            serde_json::json!({
                "sessionId": session_id,
                "project": project,
                "status": status,
            }),
        ));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocmem_core::NullEventSink;
    use ocmem_core::ObservationDraft;
    use ocmem_storage::queries::observations::insert_observation;
    use ocmem_storage::queries::summaries::get_summary;

    fn service(db: &Database) -> SessionService {
        SessionService::new(db.clone(), Arc::new(NullEventSink))
    }

    #[tokio::test]
    async fn complete_compiles_summary() {
        let db = Database::open_in_memory().await.unwrap();
        let service = service(&db);
        service.init_session("s-1", "demo").await.unwrap();
        insert_observation(
            &db,
            ObservationDraft {
                session_id: "s-1".into(),
                project: "demo".into(),
                kind: ocmem_core::ObservationKind::Bugfix,
                title: "fixed the off-by-one".into(),
                text: "body".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let transitioned = service
            .complete_session("s-1", "demo", SessionStatus::Completed)
            .await
            .unwrap();
        assert!(transitioned);

        let summary = get_summary(&db, "s-1").await.unwrap().unwrap();
        assert_eq!(summary.completed.as_deref(), Some("fixed the off-by-one"));
    }

    #[tokio::test]
    async fn second_completion_is_noop() {
        let db = Database::open_in_memory().await.unwrap();
        let service = service(&db);
        service.init_session("s-1", "demo").await.unwrap();

        assert!(service
            .complete_session("s-1", "demo", SessionStatus::Completed)
            .await
            .unwrap());
        assert!(!service
            .complete_session("s-1", "demo", SessionStatus::Failed)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn complete_unknown_session_creates_then_completes() {
        let db = Database::open_in_memory().await.unwrap();
        let service = service(&db);

        // Sessions are created on first reference, so completing an
        // unseen id transitions the implicit row.
        let transitioned = service
            .complete_session("never-inited", "demo", SessionStatus::Failed)
            .await
            .unwrap();
        assert!(transitioned);
    }
}
