//! Holds the live [`Endpoint`] handle and its unsolicited-message channel
//! for each connected client.
//!
//! A client "belongs" to at most one job at a time (§3 invariant: "while
//! running it belongs to exactly one job"), so the scheduler checks the
//! unsolicited-message receiver out of the registry for the duration of a
//! run and returns it once the client goes back to idle — this is the
//! concurrency-safe analogue of the reference's per-connection handler
//! table (§4.2).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use crate::connection::Endpoint;
use crate::types::client::ConnectionId;
use crate::wire::protocol::Envelope;

struct Entry<T> {
    endpoint: Arc<Endpoint<T>>,
    unsolicited: Option<UnboundedReceiver<Envelope>>,
}

pub struct ConnectionRegistry<T> {
    entries: Mutex<HashMap<ConnectionId, Entry<T>>>,
}

impl<T> Default for ConnectionRegistry<T> {
    fn default() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }
}

impl<T> ConnectionRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        id: ConnectionId,
        endpoint: Arc<Endpoint<T>>,
        unsolicited: UnboundedReceiver<Envelope>,
    ) {
        self.entries.lock().unwrap().insert(id, Entry { endpoint, unsolicited: Some(unsolicited) });
    }

    pub fn remove(&self, id: ConnectionId) {
        self.entries.lock().unwrap().remove(&id);
    }

    pub fn endpoint(&self, id: ConnectionId) -> Option<Arc<Endpoint<T>>> {
        self.entries.lock().unwrap().get(&id).map(|e| e.endpoint.clone())
    }

    /// Checks the unsolicited-message receiver out for exclusive use by a
    /// running job. Returns `None` if the connection is unknown or its
    /// receiver is already checked out (should not happen given the
    /// exclusivity invariant, but handled defensively per §7).
    pub fn checkout(&self, id: ConnectionId) -> Option<UnboundedReceiver<Envelope>> {
        self.entries.lock().unwrap().get_mut(&id).and_then(|e| e.unsolicited.take())
    }

    pub fn checkin(&self, id: ConnectionId, receiver: UnboundedReceiver<Envelope>) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(&id) {
            entry.unsolicited = Some(receiver);
        }
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.entries.lock().unwrap().keys().copied().collect()
    }

    /// Timestamp of the last frame received from this connection, used by
    /// the keepalive watchdog (§6 `MAX_MISSED_KEEPALIVES`) to detect a peer
    /// that has gone silent without a clean disconnect.
    pub fn last_activity(&self, id: ConnectionId) -> Option<Instant> {
        self.entries.lock().unwrap().get(&id).map(|e| *e.endpoint.last_activity.lock().unwrap())
    }
}
