//! Typed error enums for the library boundaries. Binary entry points and
//! task bodies use [`anyhow`] instead, following the same split the wire
//! codec already uses between `codec::Error` and `main`'s `anyhow::Result`.

use std::{error, fmt};

/// Errors raised while selecting clients for a job (§4.3).
#[derive(Debug)]
pub enum SelectionError {
    /// Fewer than the requested number of clients could be obtained by the
    /// deadline.
    InsufficientClients { wanted: usize, available: usize },
    /// An explicitly requested client (by host or connection id) could not
    /// be resolved to an idle, eligible client.
    UnresolvedRequestedClient(String),
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientClients { wanted, available } => write!(
                f,
                "insufficient clients: wanted {wanted}, only {available} available"
            ),
            Self::UnresolvedRequestedClient(name) => {
                write!(f, "requested client {name:?} could not be resolved")
            },
        }
    }
}

impl error::Error for SelectionError {}

/// Errors raised by the scheduler while running a single job to completion.
#[derive(Debug)]
pub enum JobError {
    Selection(SelectionError),
    /// A client that accepted the job's start barrier disconnected, timed
    /// out, or otherwise failed during the run.
    ClientFailed { client_id: u64, reason: String },
    /// A statistic was reported with a collection interval that does not
    /// match the job's configured interval (Open Question #3: rejected).
    IntervalMismatch { tracker: String },
    /// The operator cancelled or stopped the job.
    StoppedByOperator,
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Selection(e) => write!(f, "client selection failed: {e}"),
            Self::ClientFailed { client_id, reason } => {
                write!(f, "client {client_id} failed: {reason}")
            },
            Self::IntervalMismatch { tracker } => {
                write!(f, "tracker {tracker:?} reported with mismatched collection interval")
            },
            Self::StoppedByOperator => write!(f, "stopped by operator"),
        }
    }
}

impl error::Error for JobError {}

impl From<SelectionError> for JobError {
    fn from(value: SelectionError) -> Self {
        Self::Selection(value)
    }
}
