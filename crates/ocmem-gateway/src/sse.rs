// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server-Sent Events live stream.
//!
//! `GET /api/stream?project=&sessionId=` registers a subscriber with the
//! broadcaster and serves: an initial `connected` event, then one `data:`
//! line per live event (the full `{type, payload, timestamp}` JSON), with
//! a heartbeat comment every 15 seconds. Dropping the connection
//! unsubscribes the client.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use ocmem_core::OcmemError;

use crate::broadcast::Broadcaster;
use crate::error::ApiError;
use crate::server::AppState;

/// Heartbeat cadence.
const HEARTBEAT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamParams {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Unsubscribes the client when the stream is dropped.
struct StreamGuard {
    id: u64,
    broadcaster: Arc<Broadcaster>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

/// GET /api/stream
pub async fn stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let sse_enabled = state
        .settings
        .read()
        .expect("settings lock poisoned")
        .sse_enabled;
    if !sse_enabled {
        return Err(ApiError(OcmemError::validation(
            "FEATURE_OFF",
            "the live stream is disabled",
        )));
    }

    let (id, receiver) = state
        .broadcaster
        .subscribe(params.project, params.session_id);
    let guard = StreamGuard {
        id,
        broadcaster: Arc::clone(&state.broadcaster),
    };

    let connected = stream::once(futures::future::ready(Ok(Event::default()
        .event("connected")
        .data(format!("{{\"clientId\":{id}}}")))));

    let heartbeat =
        tokio::time::interval_at(tokio::time::Instant::now() + HEARTBEAT, HEARTBEAT);
    let events = stream::unfold(
        (receiver, heartbeat, guard),
        |(mut receiver, mut heartbeat, guard)| async move {
            tokio::select! {
                maybe_event = receiver.recv() => maybe_event.map(|event| {
                    let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".into());
                    (Ok(Event::default().data(data)), (receiver, heartbeat, guard))
                }),
                _ = heartbeat.tick() => Some((
                    Ok(Event::default().comment("heartbeat")),
                    (receiver, heartbeat, guard),
                )),
            }
        },
    );

    Ok(Sse::new(connected.chain(events)))
}
