//! The Job record (§3).

use serde::Serialize;
use tokio::time::Instant;

use super::client::ConnectionId;
use super::param::ParameterBag;
use super::stat::StatTracker;

/// A job's position in the state DAG described by §3. Transitions are only
/// ever made forward by the scheduler (§5, "Shared-resource policy") — see
/// `Job::transition` for the enforcement point.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Uninitialized,
    Pending,
    Running,
    Completing,
    CompletedSuccessfully,
    CompletedWithErrors,
    Cancelled,
    StoppedByUser,
    StoppedDueToError,
    StoppedDueToStopTime,
    StoppedDueToDuration,
    Disabled,
}

impl JobState {
    /// A state is terminal once a job will never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CompletedSuccessfully
                | Self::CompletedWithErrors
                | Self::Cancelled
                | Self::StoppedByUser
                | Self::StoppedDueToError
                | Self::StoppedDueToStopTime
                | Self::StoppedDueToDuration
        )
    }

    /// A state counts as a successful completion for the purposes of the
    /// optimizing driver's objective evaluation (§4.5).
    pub fn is_successful_completion(self) -> bool {
        matches!(self, Self::CompletedSuccessfully)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Pending => 1,
            Self::Running => 2,
            Self::Completing => 3,
            // Terminal states are mutually exclusive but all rank above
            // Completing; exact ordering among them is irrelevant because a
            // job can only ever transition into exactly one of them.
            Self::CompletedSuccessfully
            | Self::CompletedWithErrors
            | Self::Cancelled
            | Self::StoppedByUser
            | Self::StoppedDueToError
            | Self::StoppedDueToStopTime
            | Self::StoppedDueToDuration => 4,
            Self::Disabled => 5,
        }
    }

    /// Whether transitioning from `self` to `next` is a forward move in the
    /// DAG (§8, "state monotonicity"). Disabled is reachable only from
    /// Uninitialized or Pending, never from a terminal or running state.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Disabled {
            return matches!(self, Self::Uninitialized | Self::Pending);
        }
        next.rank() >= self.rank()
    }
}

impl Serialize for JobState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completing => "completing",
            Self::CompletedSuccessfully => "completed-successfully",
            Self::CompletedWithErrors => "completed-with-errors",
            Self::Cancelled => "cancelled",
            Self::StoppedByUser => "stopped-by-user",
            Self::StoppedDueToError => "stopped-due-to-error",
            Self::StoppedDueToStopTime => "stopped-due-to-stop-time",
            Self::StoppedDueToDuration => "stopped-due-to-duration",
            Self::Disabled => "disabled",
        })
    }
}

/// Scheduling parameters common to every job (§3).
#[derive(Clone, Debug)]
pub struct ScheduleParams {
    pub start_time: Option<Instant>,
    pub stop_time: Option<Instant>,
    pub duration_secs: Option<u32>,
    pub num_clients: u32,
    pub requested_clients: Vec<String>,
    pub threads_per_client: u32,
    pub thread_startup_delay_secs: u32,
    pub collection_interval_secs: u32,
    pub warmup_secs: u32,
    pub cooldown_secs: u32,
    pub wait_for_clients: bool,
}

impl Default for ScheduleParams {
    fn default() -> Self {
        Self {
            start_time: None,
            stop_time: None,
            duration_secs: None,
            num_clients: 1,
            requested_clients: Vec::new(),
            threads_per_client: 1,
            thread_startup_delay_secs: 0,
            collection_interval_secs: 60,
            warmup_secs: 0,
            cooldown_secs: 0,
            wait_for_clients: true,
        }
    }
}

/// One scheduled execution of a named workload across N clients (§3).
pub struct Job {
    pub id: String,
    pub class_name: String,
    pub parameters: ParameterBag,
    pub schedule: ScheduleParams,
    pub state: JobState,
    /// clients assigned once the start barrier completes; empty before then
    /// and after completion's bookkeeping is done (§3: "A job in *running*
    /// has exactly N assigned clients").
    pub assigned_clients: Vec<ConnectionId>,
    /// populated only once `state` has entered a completed subtree (§3).
    pub statistics: Vec<Box<dyn StatTracker>>,
    pub stop_reason: Option<String>,
    pub parent_optimizing_job_id: Option<String>,
}

impl Job {
    pub fn new(id: impl Into<String>, class_name: impl Into<String>, schedule: ScheduleParams) -> Self {
        Self {
            id: id.into(),
            class_name: class_name.into(),
            parameters: ParameterBag::new(),
            schedule,
            state: JobState::Uninitialized,
            assigned_clients: Vec::new(),
            statistics: Vec::new(),
            stop_reason: None,
            parent_optimizing_job_id: None,
        }
    }

    /// Attempts the state transition, enforcing monotonicity (§8). Returns
    /// `false` (and leaves `state` unchanged) on an illegal transition
    /// rather than panicking, since a stray duplicate message from a racy
    /// client should never be able to crash the scheduler (§7).
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    pub fn stop_with(&mut self, next: JobState, reason: impl Into<String>) -> bool {
        let ok = self.transition(next);
        if ok {
            self.stop_reason = Some(reason.into());
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_transitions_allowed() {
        let mut j = Job::new("job-1", "null", ScheduleParams::default());
        assert!(j.transition(JobState::Pending));
        assert!(j.transition(JobState::Running));
        assert!(j.transition(JobState::Completing));
        assert!(j.transition(JobState::CompletedSuccessfully));
    }

    #[test]
    fn backward_transitions_rejected() {
        let mut j = Job::new("job-1", "null", ScheduleParams::default());
        assert!(j.transition(JobState::Running));
        assert!(!j.transition(JobState::Pending));
        assert_eq!(j.state, JobState::Running);
    }

    #[test]
    fn terminal_state_is_sticky() {
        let mut j = Job::new("job-1", "null", ScheduleParams::default());
        j.transition(JobState::Pending);
        j.transition(JobState::Cancelled);
        assert!(!j.transition(JobState::Running));
        assert_eq!(j.state, JobState::Cancelled);
    }

    #[test]
    fn disabled_only_reachable_before_scheduling_starts() {
        let mut j = Job::new("job-1", "null", ScheduleParams::default());
        assert!(j.transition(JobState::Disabled));

        let mut j2 = Job::new("job-2", "null", ScheduleParams::default());
        j2.transition(JobState::Running);
        assert!(!j2.transition(JobState::Disabled));
    }
}
