//! The Optimizing-Job record (§3, §4.5).

use super::job::{JobState, ScheduleParams};
use super::param::ParameterBag;

/// The direction the driver optimizes the objective in (§4.5).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OptimizationDirection {
    Maximize,
    Minimize,
}

impl OptimizationDirection {
    /// True iff `candidate` is strictly better than `incumbent` under this
    /// direction (§8, "optimizing driver monotone bestness").
    pub fn is_strictly_better(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Maximize => candidate > incumbent,
            Self::Minimize => candidate < incumbent,
        }
    }
}

/// The best iteration observed so far by an optimizing job.
#[derive(Clone, Debug, PartialEq)]
pub struct BestIteration {
    pub thread_count: u32,
    pub value: f64,
    pub job_id: String,
}

/// A meta-job that iteratively schedules child Jobs to find a maximum or
/// minimum of an objective over thread count (§3, §4.5).
pub struct OptimizingJob {
    pub id: String,
    pub class_name: String,
    pub base_schedule: ScheduleParams,
    pub base_parameters: ParameterBag,
    pub min_threads: u32,
    pub max_threads: Option<u32>,
    pub thread_increment: u32,
    pub iteration_duration_secs: u32,
    pub inter_iteration_delay_secs: u32,
    pub direction: OptimizationDirection,
    pub max_non_improving_iterations: u32,
    pub rerun_best: bool,
    pub rerun_duration_secs: Option<u32>,
    pub state: JobState,
    pub child_job_ids: Vec<String>,
    pub best: Option<BestIteration>,
    pub non_improving_count: u32,
    pub rerun_job_id: Option<String>,
    pub stop_reason: Option<String>,
}

impl OptimizingJob {
    pub fn new(
        id: impl Into<String>,
        class_name: impl Into<String>,
        base_schedule: ScheduleParams,
        min_threads: u32,
        max_threads: Option<u32>,
        thread_increment: u32,
        direction: OptimizationDirection,
    ) -> Self {
        Self {
            id: id.into(),
            class_name: class_name.into(),
            base_schedule,
            base_parameters: ParameterBag::new(),
            min_threads,
            max_threads,
            thread_increment: thread_increment.max(1),
            iteration_duration_secs: 60,
            inter_iteration_delay_secs: 0,
            direction,
            max_non_improving_iterations: u32::MAX,
            rerun_best: false,
            rerun_duration_secs: None,
            state: JobState::Uninitialized,
            child_job_ids: Vec::new(),
            best: None,
            non_improving_count: 0,
            rerun_job_id: None,
            stop_reason: None,
        }
    }

    /// Records the result of one iteration's objective value, updating
    /// `best` and the non-improving counter. Returns `true` if this
    /// iteration should be the last (the non-improving limit was reached).
    pub fn record_iteration(&mut self, thread_count: u32, job_id: String, value: f64) -> bool {
        let improved = match &self.best {
            None => true,
            Some(best) => self.direction.is_strictly_better(value, best.value),
        };

        if improved {
            self.best = Some(BestIteration { thread_count, value, job_id });
            self.non_improving_count = 0;
        } else {
            self.non_improving_count += 1;
        }

        self.non_improving_count >= self.max_non_improving_iterations
    }

    pub fn next_thread_count(&self, current: u32) -> Option<u32> {
        let next = current + self.thread_increment;
        match self.max_threads {
            Some(max) if next > max => None,
            _ => Some(next),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(direction: OptimizationDirection) -> OptimizingJob {
        OptimizingJob::new("opt-1", "null", ScheduleParams::default(), 1, Some(5), 1, direction)
    }

    #[test]
    fn throughput_scenario_picks_best_at_t3_and_stops_at_k2() {
        let mut j = job(OptimizationDirection::Maximize);
        j.max_non_improving_iterations = 2;

        let readings = [(1, 100.0), (2, 180.0), (3, 200.0), (4, 180.0), (5, 160.0)];
        let mut stop_at = None;
        for (t, v) in readings {
            let stop = j.record_iteration(t, format!("job-{t}"), v);
            if stop {
                stop_at = Some(t);
                break;
            }
        }

        assert_eq!(stop_at, Some(5));
        assert_eq!(j.best.as_ref().unwrap().thread_count, 3);
        assert_eq!(j.best.as_ref().unwrap().value, 200.0);
        assert_eq!(j.non_improving_count, 2);
    }

    #[test]
    fn non_improving_count_resets_on_strict_improvement() {
        let mut j = job(OptimizationDirection::Maximize);
        j.record_iteration(1, "a".into(), 10.0);
        j.record_iteration(2, "b".into(), 5.0);
        assert_eq!(j.non_improving_count, 1);
        j.record_iteration(3, "c".into(), 20.0);
        assert_eq!(j.non_improving_count, 0);
        assert_eq!(j.best.as_ref().unwrap().thread_count, 3);
    }

    #[test]
    fn minimize_direction_prefers_lower_values() {
        let mut j = job(OptimizationDirection::Minimize);
        j.record_iteration(1, "a".into(), 50.0);
        j.record_iteration(2, "b".into(), 10.0);
        j.record_iteration(3, "c".into(), 40.0);
        assert_eq!(j.best.as_ref().unwrap().thread_count, 2);
    }

    #[test]
    fn next_thread_count_respects_max() {
        let j = job(OptimizationDirection::Maximize);
        assert_eq!(j.next_thread_count(4), Some(5));
        assert_eq!(j.next_thread_count(5), None);
    }
}
