//! The optimizing-job driver (§4.5): iterates thread count across child
//! jobs, tracks the best objective value, and stops on a non-improving
//! streak, an operator stop, or the thread ceiling.
//!
//! Grounded on the same run-to-completion shape as [`crate::scheduler`], one
//! level up: instead of watching clients directly, this drives a sequence of
//! child `Job`s through the scheduler and reads back one number per
//! iteration.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::scheduler::Scheduler;
use crate::types::job::{Job, JobState};
use crate::types::optimizing_job::OptimizingJob;
use crate::types::param::ParameterBag;
use crate::types::stat::StatTracker;

/// Reads the objective value out of a completed job's aggregated statistics
/// by tracker name (§4.5: "the objective is one named statistic from the
/// child job's aggregated results").
pub fn objective_value(statistics: &[Box<dyn StatTracker>], tracker_name: &str) -> Option<f64> {
    statistics.iter().find(|t| t.display_name() == tracker_name).and_then(|t| {
        let any = t.as_any();
        if let Some(c) = any.downcast_ref::<crate::types::stat::CounterTracker>() {
            return Some(c.total() as f64);
        }
        if let Some(ts) = any.downcast_ref::<crate::types::stat::TimeSeriesTracker>() {
            return ts.overall_mean();
        }
        None
    })
}

/// Runs one `OptimizingJob` to completion by repeatedly submitting child
/// jobs through `scheduler`, polling each to a terminal state, and feeding
/// its objective value back into the optimizing job's bookkeeping (§4.5).
#[instrument(skip(scheduler, optimizing, objective_tracker_name), fields(job_id = %optimizing.id))]
pub async fn run<T>(
    scheduler: Arc<Scheduler<T>>,
    optimizing: &mut OptimizingJob,
    objective_tracker_name: &str,
) where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    optimizing.state = JobState::Running;
    let mut thread_count = optimizing.min_threads;

    loop {
        let child_id = format!("{}-iter-{}", optimizing.id, optimizing.child_job_ids.len());
        let mut schedule = optimizing.base_schedule.clone();
        schedule.threads_per_client = thread_count;
        schedule.duration_secs = Some(optimizing.iteration_duration_secs);

        let mut job = Job::new(child_id.clone(), optimizing.class_name.clone(), schedule);
        job.parent_optimizing_job_id = Some(optimizing.id.clone());
        let handle = scheduler.submit(job, optimizing.base_parameters.clone()).await;
        optimizing.child_job_ids.push(child_id.clone());

        let final_state = wait_for_terminal(&handle).await;
        if !final_state.is_successful_completion() && final_state != JobState::CompletedWithErrors {
            warn!(%child_id, ?final_state, "optimizing iteration did not complete");
            optimizing.stop_reason = Some(format!("child job {child_id} ended as {final_state:?}"));
            break;
        }

        let value = {
            let j = handle.lock().await;
            objective_value(&j.statistics, objective_tracker_name).unwrap_or(0.0)
        };
        info!(%child_id, threads = thread_count, value, "iteration complete");

        let should_stop = optimizing.record_iteration(thread_count, child_id, value);
        if should_stop {
            optimizing.stop_reason = Some("non-improving iteration limit reached".to_owned());
            break;
        }

        match optimizing.next_thread_count(thread_count) {
            Some(next) => thread_count = next,
            None => {
                optimizing.stop_reason = Some("thread ceiling reached".to_owned());
                break;
            },
        }

        if optimizing.inter_iteration_delay_secs > 0 {
            tokio::time::sleep(Duration::from_secs(optimizing.inter_iteration_delay_secs as u64)).await;
        }
    }

    if optimizing.rerun_best {
        if let Some(best) = optimizing.best.clone() {
            let mut schedule = optimizing.base_schedule.clone();
            schedule.threads_per_client = best.thread_count;
            schedule.duration_secs = optimizing.rerun_duration_secs.or(Some(optimizing.iteration_duration_secs));
            let rerun_id = format!("{}-rerun", optimizing.id);
            let job = Job::new(rerun_id.clone(), optimizing.class_name.clone(), schedule);
            let handle = scheduler.submit(job, optimizing.base_parameters.clone()).await;
            optimizing.rerun_job_id = Some(rerun_id);
            wait_for_terminal(&handle).await;
        }
    }

    optimizing.state = JobState::CompletedSuccessfully;
}

async fn wait_for_terminal(job: &Arc<Mutex<Job>>) -> JobState {
    loop {
        let state = job.lock().await.state;
        if state.is_terminal() {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::stat::CounterTracker;

    #[test]
    fn objective_value_reads_counter_total() {
        let mut tracker = CounterTracker::new("Operations Completed", 1);
        tracker.record(0, 42);
        let statistics: Vec<Box<dyn StatTracker>> = vec![Box::new(tracker)];
        assert_eq!(objective_value(&statistics, "Operations Completed"), Some(42.0));
    }

    #[test]
    fn objective_value_missing_tracker_is_none() {
        let statistics: Vec<Box<dyn StatTracker>> = Vec::new();
        assert_eq!(objective_value(&statistics, "Operations Completed"), None);
    }
}
