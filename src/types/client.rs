//! Client and Monitor-Client records (§3).

use std::collections::HashSet;

use serde::Serialize;
use tokio::time::Instant;

/// Status of a load-generator client connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClientStatus {
    Idle,
    Running,
    Disconnected,
}

// Mirrors `JobState`'s hand-written `Serialize` in the teacher crate: the
// wire/stats surface only ever needs the discriminant name, never the
// variant's (here: nonexistent) payload.
impl Serialize for ClientStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Disconnected => "disconnected",
        })
    }
}

/// Status of a resource-monitor client connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Idle,
    Active,
    Disconnected,
}

/// A unique identifier for a connection, assigned by the registry at accept
/// time. Lower ids are older connections; used as the deterministic
/// tie-breaker for client selection (Open Question #2).
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash, Serialize)]
pub struct ConnectionId(pub u64);

/// Server-side record of one connected load-generator client (§3, §4.2).
#[derive(Debug)]
pub struct Client {
    pub connection_id: ConnectionId,
    pub auth_id: String,
    pub host: String,
    pub client_id: String,
    pub status: ClientStatus,
    pub restricted: bool,
    pub supported_job_classes: HashSet<String>,
    /// When this client last became idle; used for least-recently-used
    /// tie-breaking in round-robin selection (§4.3).
    pub idle_since: Instant,
}

impl Client {
    pub fn new(connection_id: ConnectionId, host: String, client_id: String, restricted: bool) -> Self {
        Self {
            connection_id,
            auth_id: String::new(),
            host,
            client_id,
            status: ClientStatus::Idle,
            restricted,
            supported_job_classes: HashSet::new(),
            idle_since: Instant::now(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == ClientStatus::Idle
    }

    pub fn supports(&self, class_name: &str) -> bool {
        // An empty set means "not probed yet"; callers treat this as
        // provisionally eligible and probe lazily per §4.3.
        self.supported_job_classes.is_empty() || self.supported_job_classes.contains(class_name)
    }
}

/// Server-side record of one connected resource-monitor client (§3).
#[derive(Debug)]
pub struct MonitorClient {
    pub connection_id: ConnectionId,
    pub host: String,
    pub status: MonitorStatus,
    /// job ids this monitor is currently observing; per the spec, a monitor
    /// may watch several jobs concurrently provided they target disjoint
    /// monitors, which the registry enforces by never double-booking one
    /// monitor onto overlapping job windows for the *same* statistic name.
    pub observing: HashSet<String>,
}

impl MonitorClient {
    pub fn new(connection_id: ConnectionId, host: String) -> Self {
        Self { connection_id, host, status: MonitorStatus::Idle, observing: HashSet::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_client_is_idle_and_provisionally_supports_everything() {
        let c = Client::new(ConnectionId(1), "host-a".into(), "client-a".into(), false);
        assert!(c.is_idle());
        assert!(c.supports("http"));
    }

    #[test]
    fn probed_client_only_supports_listed_classes() {
        let mut c = Client::new(ConnectionId(1), "host-a".into(), "client-a".into(), false);
        c.supported_job_classes.insert("http".into());
        assert!(c.supports("http"));
        assert!(!c.supports("ldap"));
    }
}
