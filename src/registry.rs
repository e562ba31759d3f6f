//! The client registry (§4.3): the set of currently connected clients,
//! indexed by connection id and by host, supporting restricted vs.
//! unrestricted and idle vs. busy state.

use std::collections::{BTreeMap, HashMap};

use tokio::time::Instant;

use crate::error::SelectionError;
use crate::types::client::{Client, ClientStatus, ConnectionId, MonitorClient};

/// Holds `Client`s and `MonitorClient`s keyed by connection id, with a
/// secondary by-host index for the round-robin selection policy.
///
/// Mirrors the teacher's `tube::Server`: a primary `BTreeMap` keyed by a
/// small monotonically-increasing id, with the registry itself owning the
/// invariant that every by-host pointer refers to a still-present client.
#[derive(Default)]
pub struct ClientRegistry {
    clients: BTreeMap<ConnectionId, Client>,
    monitors: BTreeMap<ConnectionId, MonitorClient>,
    next_connection_id: u64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_connection_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;
        id
    }

    pub fn register_client(&mut self, client: Client) {
        self.clients.insert(client.connection_id, client);
    }

    pub fn register_monitor(&mut self, monitor: MonitorClient) {
        self.monitors.insert(monitor.connection_id, monitor);
    }

    pub fn remove_client(&mut self, id: ConnectionId) -> Option<Client> {
        self.clients.remove(&id)
    }

    pub fn remove_monitor(&mut self, id: ConnectionId) -> Option<MonitorClient> {
        self.monitors.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Client> {
        self.clients.get_mut(&id)
    }

    pub fn find_by_host_or_id(&self, needle: &str) -> Option<ConnectionId> {
        if let Ok(raw) = needle.parse::<u64>() {
            let id = ConnectionId(raw);
            if self.clients.contains_key(&id) {
                return Some(id);
            }
        }
        self.clients.iter().find(|(_, c)| c.host == needle).map(|(id, _)| *id)
    }

    pub fn mark_idle(&mut self, id: ConnectionId) {
        if let Some(c) = self.clients.get_mut(&id) {
            c.status = ClientStatus::Idle;
            c.idle_since = Instant::now();
        }
    }

    pub fn mark_running(&mut self, id: ConnectionId) {
        if let Some(c) = self.clients.get_mut(&id) {
            c.status = ClientStatus::Running;
        }
    }

    /// Selects `n` clients for a job per §4.3's policy.
    ///
    /// 1. If `requested` is non-empty, each entry must resolve to an idle,
    ///    eligible client (restricted clients are only eligible when
    ///    explicitly named); any unresolved entry fails selection
    ///    immediately (the caller applies `wait_for_clients` by retrying).
    /// 2. Otherwise, partition idle unrestricted clients by host and
    ///    round-robin across distinct hosts, visiting every host once
    ///    before any host twice; ties break on lowest connection id
    ///    (Open Question #2).
    pub fn select(
        &self,
        n: usize,
        requested: &[String],
        class_name: &str,
    ) -> Result<Vec<ConnectionId>, SelectionError> {
        if !requested.is_empty() {
            return self.select_requested(requested, class_name);
        }
        self.select_round_robin(n, class_name)
    }

    fn select_requested(
        &self,
        requested: &[String],
        class_name: &str,
    ) -> Result<Vec<ConnectionId>, SelectionError> {
        let mut selected = Vec::with_capacity(requested.len());
        for name in requested {
            let id = self
                .find_by_host_or_id(name)
                .filter(|id| {
                    self.clients
                        .get(id)
                        .is_some_and(|c| c.is_idle() && c.supports(class_name))
                })
                .ok_or_else(|| SelectionError::UnresolvedRequestedClient(name.clone()))?;
            selected.push(id);
        }
        Ok(selected)
    }

    fn select_round_robin(
        &self,
        n: usize,
        class_name: &str,
    ) -> Result<Vec<ConnectionId>, SelectionError> {
        let mut by_host: HashMap<&str, Vec<ConnectionId>> = HashMap::new();
        for (id, c) in &self.clients {
            if c.is_idle() && !c.restricted && c.supports(class_name) {
                by_host.entry(c.host.as_str()).or_default().push(*id);
            }
        }
        // Deterministic host ordering: by the lowest connection id each
        // host offers (stable regardless of HashMap iteration order).
        let mut hosts: Vec<&str> = by_host.keys().copied().collect();
        hosts.sort_by_key(|h| by_host[h].iter().min().copied().unwrap());
        for ids in by_host.values_mut() {
            // Lowest connection id first within a host (Open Question #2);
            // also approximates least-recently-used since ids are assigned
            // in connection order.
            ids.sort();
        }

        let mut cursors: HashMap<&str, usize> = hosts.iter().map(|h| (*h, 0)).collect();
        let mut selected = Vec::with_capacity(n);
        let mut made_progress = true;
        while selected.len() < n && made_progress {
            made_progress = false;
            for host in &hosts {
                if selected.len() == n {
                    break;
                }
                let cursor = cursors.get_mut(host).unwrap();
                if let Some(id) = by_host[host].get(*cursor) {
                    selected.push(*id);
                    *cursor += 1;
                    made_progress = true;
                }
            }
        }

        let available = self
            .clients
            .values()
            .filter(|c| c.is_idle() && !c.restricted && c.supports(class_name))
            .count();
        if selected.len() < n {
            return Err(SelectionError::InsufficientClients { wanted: n, available });
        }
        Ok(selected)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_client(reg: &mut ClientRegistry, host: &str, restricted: bool) -> ConnectionId {
        let id = reg.next_connection_id();
        reg.register_client(Client::new(id, host.to_owned(), format!("client-{}", id.0), restricted));
        id
    }

    #[test]
    fn round_robin_visits_every_host_before_revisiting() {
        let mut reg = ClientRegistry::new();
        let a1 = idle_client(&mut reg, "host-a", false);
        let b1 = idle_client(&mut reg, "host-b", false);
        let a2 = idle_client(&mut reg, "host-a", false);

        let selected = reg.select(3, &[], "null").unwrap();
        assert_eq!(selected, vec![a1, b1, a2]);
    }

    #[test]
    fn restricted_clients_excluded_from_round_robin() {
        let mut reg = ClientRegistry::new();
        idle_client(&mut reg, "host-a", true);
        idle_client(&mut reg, "host-b", false);

        let err = reg.select(2, &[], "null").unwrap_err();
        assert!(matches!(err, SelectionError::InsufficientClients { wanted: 2, available: 1 }));
    }

    #[test]
    fn requested_clients_must_be_idle_and_eligible() {
        let mut reg = ClientRegistry::new();
        let a = idle_client(&mut reg, "host-a", false);
        reg.mark_running(a);

        let err = reg.select(1, &["host-a".to_owned()], "null").unwrap_err();
        assert!(matches!(err, SelectionError::UnresolvedRequestedClient(_)));
    }

    #[test]
    fn restricted_client_selectable_when_explicitly_named() {
        let mut reg = ClientRegistry::new();
        let a = idle_client(&mut reg, "host-a", true);

        let selected = reg.select(1, &["host-a".to_owned()], "null").unwrap();
        assert_eq!(selected, vec![a]);
    }
}
