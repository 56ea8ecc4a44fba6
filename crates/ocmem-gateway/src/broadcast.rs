// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live event fan-out to stream subscribers.
//!
//! Subscribers register with an optional project and session filter. A
//! broadcast targets the union of clients matching the event's project OR
//! session id; an event with neither targets everyone. Sends are
//! non-blocking: a full or closed client channel removes the client.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use ocmem_core::{EventSink, LiveEvent};

/// Per-client outbound buffer before the client is considered stuck.
const CLIENT_BUFFER: usize = 64;

struct Subscriber {
    project: Option<String>,
    session_id: Option<String>,
    sender: mpsc::Sender<LiveEvent>,
}

impl Subscriber {
    fn matches(&self, event: &LiveEvent) -> bool {
        if event.project.is_none() && event.session_id.is_none() {
            return true;
        }
        let project_hit = match (&event.project, &self.project) {
            (Some(ep), Some(sp)) => ep == sp,
            _ => false,
        };
        let session_hit = match (&event.session_id, &self.session_id) {
            (Some(es), Some(ss)) => es == ss,
            _ => false,
        };
        // Union semantics; an unfiltered client receives everything.
        project_hit || session_hit || (self.project.is_none() && self.session_id.is_none())
    }
}

/// Registry of stream subscribers keyed by client id.
#[derive(Default)]
pub struct Broadcaster {
    clients: DashMap<u64, Subscriber>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Returns its client id and event receiver.
    pub fn subscribe(
        &self,
        project: Option<String>,
        session_id: Option<String>,
    ) -> (u64, mpsc::Receiver<LiveEvent>) {
        let (sender, receiver) = mpsc::channel(CLIENT_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.insert(
            id,
            Subscriber {
                project,
                session_id,
                sender,
            },
        );
        debug!(client_id = id, clients = self.clients.len(), "stream client subscribed");
        (id, receiver)
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, id: u64) {
        self.clients.remove(&id);
        debug!(client_id = id, clients = self.clients.len(), "stream client unsubscribed");
    }

    /// Connected client count.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Deliver an event to every matching client.
    ///
    /// Iterates a snapshot of the registry; clients whose channel is full
    /// or closed are removed afterwards, never dereferenced mid-iteration.
    pub fn broadcast(&self, event: &LiveEvent) {
        let targets: Vec<u64> = self
            .clients
            .iter()
            .filter(|entry| entry.value().matches(event))
            .map(|entry| *entry.key())
            .collect();

        let mut dead = Vec::new();
        for id in targets {
            if let Some(subscriber) = self.clients.get(&id)
                && subscriber.sender.try_send(event.clone()).is_err()
            {
                dead.push(id);
            }
        }
        for id in dead {
            debug!(client_id = id, "removing unresponsive stream client");
            self.clients.remove(&id);
        }
    }
}

impl EventSink for Broadcaster {
    fn emit(&self, event: LiveEvent) {
        self.broadcast(&event);
    }
}
