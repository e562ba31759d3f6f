//! The job scheduler (§4.4): the pending queue, the multi-phase start
//! barrier, run-time monitoring of assigned clients, and terminal-state
//! statistics aggregation.
//!
//! Grounded on the teacher's `tube::Server` run loop shape (own the shared
//! state behind a `Mutex`, spawn one task per unit of concurrent work) but
//! generalized from "reserve and deliver a job" to "select N clients, drive
//! them through a start barrier, then watch them run to completion."

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::config::ServerConfig;
use crate::conn_registry::ConnectionRegistry;
use crate::error::{JobError, SelectionError};
use crate::registry::ClientRegistry;
use crate::types::client::ConnectionId;
use crate::types::job::{Job, JobState, ScheduleParams};
use crate::types::job_class::JobClassRegistry;
use crate::types::param::ParameterBag;
use crate::types::stat::{aggregate, decode_trackers, StatTracker};
use crate::wire::protocol::{JobControlOp, JobResponseCode, MessageBody};

/// Top-level job coordinator, owned by the `Server` context object (§9:
/// "explicit context objects... owned by a top-level `Server` value").
pub struct Scheduler<T> {
    config: ServerConfig,
    clients: Arc<Mutex<ClientRegistry>>,
    connections: Arc<ConnectionRegistry<T>>,
    classes: Arc<JobClassRegistry>,
    jobs: Mutex<HashMap<String, Arc<Mutex<Job>>>>,
}

impl<T> Scheduler<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        config: ServerConfig,
        clients: Arc<Mutex<ClientRegistry>>,
        connections: Arc<ConnectionRegistry<T>>,
        classes: Arc<JobClassRegistry>,
    ) -> Self {
        Self { config, clients, connections, classes, jobs: Mutex::new(HashMap::new()) }
    }

    /// Registers a new job and, once its start time arrives, runs it to
    /// completion in a background task (§3: Uninitialized -> Pending ->
    /// Running -> Completing -> a terminal state).
    pub async fn submit(self: &Arc<Self>, mut job: Job, parameters: ParameterBag) -> Arc<Mutex<Job>> {
        job.parameters = parameters;
        job.transition(JobState::Pending);
        let job_id = job.id.clone();
        let handle = Arc::new(Mutex::new(job));
        self.jobs.lock().await.insert(job_id.clone(), handle.clone());

        let scheduler = self.clone();
        let job_for_task = handle.clone();
        tokio::spawn(async move {
            scheduler.wait_then_run(job_id, job_for_task).await;
        });

        handle
    }

    pub async fn get(&self, job_id: &str) -> Option<Arc<Mutex<Job>>> {
        self.jobs.lock().await.get(job_id).cloned()
    }

    /// Sends a `JobControlRequest` to every client currently assigned to
    /// `job_id` and marks the job stopped/aborted once it transitions (§4.1
    /// JobControlRequest, §7 "Operator intervention").
    pub async fn control(&self, job_id: &str, op: JobControlOp) -> Result<(), JobError> {
        let handle = self.get(job_id).await.ok_or(JobError::StoppedByOperator)?;
        let assigned = handle.lock().await.assigned_clients.clone();
        for conn_id in assigned {
            if let Some(endpoint) = self.connections.endpoint(conn_id) {
                let _ = endpoint
                    .notify(MessageBody::JobControlRequest { job_id: job_id.to_owned(), op })
                    .await;
            }
        }
        let next = match op {
            JobControlOp::Stop => JobState::StoppedByUser,
            JobControlOp::Abort => JobState::StoppedDueToError,
            JobControlOp::Disable => JobState::Disabled,
            JobControlOp::Start => return Ok(()),
        };
        handle.lock().await.stop_with(next, "operator request");
        Ok(())
    }

    #[instrument(skip(self, job), fields(job_id = %job_id))]
    async fn wait_then_run(self: Arc<Self>, job_id: String, job: Arc<Mutex<Job>>) {
        let start_time = job.lock().await.schedule.start_time;
        if let Some(at) = start_time {
            tokio::time::sleep_until(at).await;
        }

        if let Err(error) = self.run_job(&job_id, &job).await {
            warn!(%error, "job failed");
        }
    }

    /// Drives one job through selection, the start barrier, run-time
    /// monitoring, and terminal statistics aggregation (§4.4).
    async fn run_job(&self, job_id: &str, job: &Arc<Mutex<Job>>) -> Result<(), JobError> {
        let (class_name, schedule) = {
            let j = job.lock().await;
            (j.class_name.clone(), j.schedule.clone())
        };

        let accepted = match self.acquire_clients(job_id, &class_name, &schedule, job).await {
            Ok(accepted) => accepted,
            Err(error) => {
                job.lock().await.stop_with(JobState::Cancelled, "insufficient clients");
                return Err(error);
            },
        };

        {
            let mut j = job.lock().await;
            j.assigned_clients = accepted.clone();
            j.transition(JobState::Running);
        }
        info!(clients = accepted.len(), "job running");

        let (trackers_per_client, any_error) = self.monitor_run(job_id, &accepted).await;

        for id in &accepted {
            self.clients.lock().await.mark_idle(*id);
        }

        job.lock().await.transition(JobState::Completing);
        self.finish_job(job, trackers_per_client, any_error).await;
        Ok(())
    }

    /// Selects clients and runs the start barrier, retrying the whole
    /// select-then-barrier cycle up to `default_max_client_wait` when
    /// `wait_for_clients` is set (§4.3 pt 4 / §4.4 step 2: a barrier
    /// rejection reverts the selection to idle and falls back to the
    /// wait-for-clients policy rather than cancelling outright). Only once
    /// the deadline passes — or the job doesn't wait — does this give up and
    /// let the caller cancel the job with reason "insufficient clients"
    /// (§8 "selection count").
    async fn acquire_clients(
        &self,
        job_id: &str,
        class_name: &str,
        schedule: &ScheduleParams,
        job: &Arc<Mutex<Job>>,
    ) -> Result<Vec<ConnectionId>, JobError> {
        let deadline = Instant::now() + self.config.default_max_client_wait();
        loop {
            let selected = match self.select_once(schedule, class_name).await {
                Ok(ids) => ids,
                Err(error) => {
                    if !schedule.wait_for_clients || Instant::now() >= deadline {
                        return Err(JobError::Selection(error));
                    }
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                },
            };

            for id in &selected {
                self.clients.lock().await.mark_running(*id);
            }

            match self.run_start_barrier(job_id, class_name, schedule, &selected, job).await {
                Ok(accepted) => return Ok(accepted),
                Err(accepted_count) => {
                    for id in &selected {
                        self.clients.lock().await.mark_idle(*id);
                    }
                    if !schedule.wait_for_clients || Instant::now() >= deadline {
                        return Err(JobError::Selection(SelectionError::InsufficientClients {
                            wanted: schedule.num_clients as usize,
                            available: accepted_count,
                        }));
                    }
                    tokio::time::sleep(Duration::from_millis(500)).await;
                },
            }
        }
    }

    async fn select_once(
        &self,
        schedule: &ScheduleParams,
        class_name: &str,
    ) -> Result<Vec<ConnectionId>, SelectionError> {
        let registry = self.clients.lock().await;
        registry.select(schedule.num_clients as usize, &schedule.requested_clients, class_name)
    }

    /// The multi-phase start barrier (§4.4): send `JobRequest` to every
    /// selected client and wait for every one to accept before letting the
    /// job transition to Running. Returns `Err` with the number that did
    /// accept if any client rejected, timed out, or disconnected, so the
    /// caller can revert the rest to idle and retry per the wait-for-clients
    /// policy (§4.4 step 2).
    async fn run_start_barrier(
        &self,
        job_id: &str,
        class_name: &str,
        schedule: &ScheduleParams,
        selected: &[ConnectionId],
        job: &Arc<Mutex<Job>>,
    ) -> Result<Vec<ConnectionId>, usize> {
        let start_at = Instant::now() + self.config.barrier_slack();
        let start_epoch = (now_epoch_secs()) + self.config.barrier_slack().as_secs() as i64;

        let parameters = job.lock().await.parameters.clone();
        let mut accepted = Vec::with_capacity(selected.len());

        for (index, conn_id) in selected.iter().enumerate() {
            let Some(endpoint) = self.connections.endpoint(*conn_id) else {
                continue;
            };
            let request = MessageBody::JobRequest {
                job_id: job_id.to_owned(),
                class_name: class_name.to_owned(),
                start_time_epoch_secs: start_epoch,
                stop_time_epoch_secs: None,
                duration_secs: schedule.duration_secs,
                client_number: index as u32,
                threads: schedule.threads_per_client,
                thread_startup_delay_secs: schedule.thread_startup_delay_secs,
                collection_interval_secs: schedule.collection_interval_secs,
                warmup_secs: schedule.warmup_secs,
                cooldown_secs: schedule.cooldown_secs,
                parameters: parameters.clone(),
                stat_persistence_interval_secs: schedule.collection_interval_secs,
            };

            match endpoint.request(request, self.config.request_timeout()).await {
                Ok(reply) => match reply.body {
                    MessageBody::JobResponse { code, .. } if code.is_acceptance() => {
                        accepted.push(*conn_id);
                    },
                    MessageBody::JobResponse { code, message, .. } => {
                        warn!(connection = conn_id.0, ?code, ?message, "client rejected job");
                    },
                    _ => warn!(connection = conn_id.0, "unexpected reply to job request"),
                },
                Err(error) => warn!(connection = conn_id.0, %error, "job request failed"),
            }
        }

        // Ensure the barrier doesn't fire before the agreed start time even
        // if every accept came back instantly.
        tokio::time::sleep_until(start_at).await;

        if accepted.len() == selected.len() {
            Ok(accepted)
        } else {
            let accepted_count = accepted.len();
            for id in &accepted {
                if let Some(endpoint) = self.connections.endpoint(*id) {
                    let _ = endpoint
                        .notify(MessageBody::JobControlRequest {
                            job_id: job_id.to_owned(),
                            op: JobControlOp::Abort,
                        })
                        .await;
                }
            }
            Err(accepted_count)
        }
    }

    /// Watches each assigned client's unsolicited channel (checked out
    /// exclusively, §3 "while running it belongs to exactly one job") for
    /// its final `JobResponse`, or treats channel closure as a client
    /// failure (§7).
    async fn monitor_run(
        &self,
        job_id: &str,
        accepted: &[ConnectionId],
    ) -> (Vec<Vec<Box<dyn StatTracker>>>, bool) {
        let mut per_client = Vec::with_capacity(accepted.len());
        let mut any_error = false;

        for conn_id in accepted {
            let Some(mut receiver) = self.connections.checkout(*conn_id) else {
                any_error = true;
                continue;
            };

            let outcome = loop {
                match receiver.recv().await {
                    Some(envelope) => match envelope.body {
                        MessageBody::JobResponse { job_id: jid, code, statistics, .. }
                            if jid == job_id && !code.is_acceptance() =>
                        {
                            break Some((code, statistics));
                        },
                        MessageBody::RealTimeStatistics { .. } => continue,
                        _ => continue,
                    },
                    None => break None,
                }
            };

            self.connections.checkin(*conn_id, receiver);

            match outcome {
                Some((code, Some(payload))) => {
                    if code.is_rejection() || code == JobResponseCode::JobAborted {
                        any_error = true;
                    }
                    match decode_trackers(&payload) {
                        Ok(trackers) => per_client.push(trackers),
                        Err(error) => {
                            warn!(connection = conn_id.0, %error, "malformed statistics payload");
                            any_error = true;
                        },
                    }
                },
                Some((code, None)) => {
                    if code.is_rejection() || code == JobResponseCode::JobAborted {
                        any_error = true;
                    }
                },
                None => {
                    let error = JobError::ClientFailed {
                        client_id: conn_id.0,
                        reason: "disconnected mid-run".to_owned(),
                    };
                    warn!(connection = conn_id.0, %error, "client failed during run");
                    any_error = true;
                },
            }
        }

        (per_client, any_error)
    }

    /// Aggregates per-client trackers by display name and transitions the
    /// job into its terminal state (§4.6, Open Question #3: a collection
    /// interval mismatch within a tracker name demotes the outcome to
    /// completed-with-errors rather than silently merging).
    async fn finish_job(
        &self,
        job: &Arc<Mutex<Job>>,
        per_client: Vec<Vec<Box<dyn StatTracker>>>,
        mut any_error: bool,
    ) {
        let mut by_name: HashMap<String, Vec<Box<dyn StatTracker>>> = HashMap::new();
        for trackers in per_client {
            for tracker in trackers {
                by_name.entry(tracker.display_name().to_owned()).or_default().push(tracker);
            }
        }

        let mut aggregated = Vec::with_capacity(by_name.len());
        for (name, group) in by_name {
            match aggregate(&group) {
                Some(tracker) => aggregated.push(tracker),
                None => {
                    let error = JobError::IntervalMismatch { tracker: name };
                    warn!(%error, "interval mismatch aggregating statistics");
                    any_error = true;
                },
            }
        }

        let mut j = job.lock().await;
        j.statistics = aggregated;
        let terminal =
            if any_error { JobState::CompletedWithErrors } else { JobState::CompletedSuccessfully };
        j.transition(terminal);
    }
}

/// Wall-clock epoch seconds. Kept as a single crate-local seam so tests can
/// see exactly where real time enters the scheduler.
fn now_epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use tokio::io::DuplexStream;

    use super::*;
    use crate::types::client::Client;

    fn test_scheduler() -> Arc<Scheduler<DuplexStream>> {
        Arc::new(Scheduler::new(
            ServerConfig { barrier_slack_secs: 0, request_timeout_secs: 1, ..ServerConfig::default() },
            Arc::new(Mutex::new(ClientRegistry::new())),
            Arc::new(ConnectionRegistry::new()),
            Arc::new(JobClassRegistry::new()),
        ))
    }

    #[tokio::test]
    async fn submit_without_clients_completes_as_cancelled() {
        let scheduler = test_scheduler();
        let job = Job::new("job-1", "null", ScheduleParams { num_clients: 1, wait_for_clients: false, ..ScheduleParams::default() });
        let handle = scheduler.submit(job, ParameterBag::new()).await;

        for _ in 0..50 {
            if handle.lock().await.state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(handle.lock().await.state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn barrier_rejection_retries_selection_instead_of_cancelling() {
        use futures::{SinkExt, StreamExt};
        use tokio::io::duplex;
        use tokio_util::sync::CancellationToken;

        use crate::connection::Endpoint;
        use crate::wire::protocol::Envelope;

        let scheduler = Arc::new(Scheduler::new(
            ServerConfig {
                barrier_slack_secs: 0,
                request_timeout_secs: 1,
                default_max_client_wait_secs: 5,
                ..ServerConfig::default()
            },
            Arc::new(Mutex::new(ClientRegistry::new())),
            Arc::new(ConnectionRegistry::new()),
            Arc::new(JobClassRegistry::new()),
        ));

        let conn_id = {
            let mut clients = scheduler.clients.lock().await;
            let id = clients.next_connection_id();
            clients.register_client(Client::new(id, "host-a".into(), "client-a".into(), false));
            id
        };

        let (client_side, server_side) = duplex(4096);
        let cancel = CancellationToken::new();
        let (endpoint, unsolicited) = Endpoint::spawn(server_side, conn_id, cancel.clone());
        scheduler.connections.insert(conn_id, endpoint, unsolicited);

        tokio::spawn(async move {
            let mut peer = crate::wire::framed(client_side);

            // First start-barrier attempt: reject, forcing a retry.
            let request = peer.next().await.unwrap().unwrap();
            peer.send(Envelope::new(request.message_id, MessageBody::JobResponse {
                job_id: "job-1".to_owned(),
                code: JobResponseCode::RejectedBusy,
                message: None,
                statistics: None,
            }))
            .await
            .unwrap();

            // Second attempt, after the scheduler re-selects: accept.
            let request = peer.next().await.unwrap().unwrap();
            peer.send(Envelope::new(request.message_id, MessageBody::JobResponse {
                job_id: "job-1".to_owned(),
                code: JobResponseCode::Accepted,
                message: None,
                statistics: None,
            }))
            .await
            .unwrap();
        });

        let job = Arc::new(Mutex::new(Job::new(
            "job-1",
            "null",
            ScheduleParams { num_clients: 1, wait_for_clients: true, ..ScheduleParams::default() },
        )));
        let schedule = job.lock().await.schedule.clone();

        let result = scheduler.acquire_clients("job-1", "null", &schedule, &job).await;
        assert_eq!(result.unwrap(), vec![conn_id]);
        assert_eq!(job.lock().await.state, JobState::Uninitialized);
    }

    #[tokio::test]
    async fn control_on_unknown_job_is_an_error() {
        let scheduler = test_scheduler();
        let result = scheduler.control("nonexistent", JobControlOp::Stop).await;
        assert!(result.is_err());
    }

    #[test]
    fn client_registered_idle_supports_null_class() {
        let mut registry = ClientRegistry::new();
        let id = registry.next_connection_id();
        registry.register_client(Client::new(id, "host-a".into(), "c1".into(), false));
        assert!(registry.get(id).unwrap().is_idle());
    }
}
