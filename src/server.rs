//! The top-level `Server` context object (§9: "explicit context objects...
//! owned by a top-level `Server` value; no module-level mutable state").
//! Wires the client registry, connection registry, job store, and
//! Job-Class registry together behind one handle the accept loops and
//! request handlers share.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::conn_registry::ConnectionRegistry;
use crate::registry::ClientRegistry;
use crate::scheduler::Scheduler;
use crate::store::JobStore;
use crate::types::job_class::JobClassRegistry;
use crate::wire::protocol::MessageBody;

/// Everything a connection handler or scheduler task needs, cloned cheaply
/// via `Arc` (§5: "Shared state lives behind `Arc<Mutex<...>>` or
/// equivalent, never behind a raw global").
pub struct Server<T> {
    pub config: ServerConfig,
    pub clients: Arc<Mutex<ClientRegistry>>,
    pub connections: Arc<ConnectionRegistry<T>>,
    pub classes: Arc<JobClassRegistry>,
    pub store: Arc<dyn JobStore>,
    pub scheduler: Arc<Scheduler<T>>,
    pub shutdown: CancellationToken,
}

impl<T> Server<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(config: ServerConfig, classes: JobClassRegistry, store: Arc<dyn JobStore>) -> Self {
        let clients = Arc::new(Mutex::new(ClientRegistry::new()));
        let connections = Arc::new(ConnectionRegistry::new());
        let classes = Arc::new(classes);
        let scheduler =
            Arc::new(Scheduler::new(config.clone(), clients.clone(), connections.clone(), classes.clone()));

        Self {
            config,
            clients,
            connections,
            classes,
            store,
            scheduler,
            shutdown: CancellationToken::new(),
        }
    }

    /// Periodically pings every connected peer and drops any that have gone
    /// silent for longer than `max_missed_keepalives` intervals (§6
    /// `KEEPALIVE_INTERVAL` / `MAX_MISSED_KEEPALIVES`). Runs until
    /// `self.shutdown` fires.
    pub async fn run_keepalive_watchdog(self: Arc<Self>) {
        let interval = self.config.keepalive_interval();
        let staleness_limit = interval * self.config.max_missed_keepalives.max(1);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = self.shutdown.cancelled() => return,
            }

            for id in self.connections.ids() {
                let Some(last_activity) = self.connections.last_activity(id) else {
                    continue;
                };
                if Instant::now().duration_since(last_activity) > staleness_limit {
                    warn!(connection = id.0, "dropping connection for missed keepalives");
                    self.connections.remove(id);
                    self.clients.lock().await.remove_client(id);
                    self.clients.lock().await.remove_monitor(id);
                    continue;
                }

                if let Some(endpoint) = self.connections.endpoint(id) {
                    if endpoint.notify(MessageBody::KeepAlive).await.is_err() {
                        debug!(connection = id.0, "keepalive send failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::DuplexStream;

    use super::*;
    use crate::store::InMemoryJobStore;
    use crate::types::job_class::NullJobClass;

    #[tokio::test]
    async fn server_wires_null_job_class_through_scheduler() {
        let mut classes = JobClassRegistry::new();
        classes.register(Arc::new(NullJobClass));
        let server: Server<DuplexStream> =
            Server::new(ServerConfig::default(), classes, Arc::new(InMemoryJobStore::new()));

        assert!(server.classes.contains("null"));
        assert_eq!(server.clients.lock().await.len(), 0);
    }
}
