//! Job-Class registry (Design Note §9).
//!
//! The reference server loads job-class types by reflectively instantiating
//! a class named in the job record. The target keeps no dynamic loading: a
//! `JobClassDescriptor` is registered by name at process start, and the
//! scheduler only ever looks plug-ins up by that stable string key.

use std::collections::HashMap;
use std::sync::Arc;

use super::param::ParameterStub;
use super::stat::{CounterTracker, StatTracker};

/// Static metadata about a Job-Class, shown to operators and used to
/// validate a job's parameter bag at schedule time (§7, "configuration /
/// parameter error").
#[derive(Clone, Debug)]
pub struct JobClassMetadata {
    pub name: String,
    pub display_name: String,
    pub description: String,
}

/// A runner instance bound to one (job, client-slot) pair. The client-side
/// run loop (§4.2/§4.5) drives it through `run()` once its start barrier
/// fires, then collects whatever trackers it produced.
pub trait JobRunner: Send {
    /// Executes the workload for `duration`, returning the trackers
    /// collected during the run (after warm-up/cool-down discarding has
    /// already happened, per §4.4).
    fn run(&mut self, threads: u32, duration_secs: Option<u32>) -> Vec<Box<dyn StatTracker>>;
}

/// A registered Job-Class plug-in descriptor. Exposes exactly the interface
/// Design Note §9 calls for: `metadata()`, `parameter_stubs()`,
/// `new_runner()`.
pub trait JobClassDescriptor: Send + Sync {
    fn metadata(&self) -> JobClassMetadata;
    fn parameter_stubs(&self) -> Vec<ParameterStub>;
    fn new_runner(&self) -> Box<dyn JobRunner>;
}

/// The process-wide set of registered Job-Classes, owned by the `Server`
/// context object rather than kept as a module-level singleton (Design Note
/// §9, "Global singletons").
#[derive(Clone, Default)]
pub struct JobClassRegistry {
    classes: HashMap<String, Arc<dyn JobClassDescriptor>>,
}

impl JobClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: Arc<dyn JobClassDescriptor>) {
        self.classes.insert(descriptor.metadata().name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobClassDescriptor>> {
        self.classes.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }
}

/// A no-op Job-Class used when no real workload plug-in is wired in: it
/// reports a single "Operations Completed" counter, incremented once per
/// configured thread. This is what makes the scheduler and the client
/// binary exercisable end-to-end without an external plug-in (SPEC_FULL.md
/// §3).
pub struct NullJobClass;

struct NullJobRunner;

impl JobRunner for NullJobRunner {
    fn run(&mut self, threads: u32, _duration_secs: Option<u32>) -> Vec<Box<dyn StatTracker>> {
        let mut tracker = CounterTracker::new("Operations Completed", 1);
        for _ in 0..threads {
            tracker.record(0, 1);
        }
        vec![Box::new(tracker)]
    }
}

impl JobClassDescriptor for NullJobClass {
    fn metadata(&self) -> JobClassMetadata {
        JobClassMetadata {
            name: "null".to_owned(),
            display_name: "Null Job".to_owned(),
            description: "A no-op workload used for scheduler tests and demos.".to_owned(),
        }
    }

    fn parameter_stubs(&self) -> Vec<ParameterStub> {
        Vec::new()
    }

    fn new_runner(&self) -> Box<dyn JobRunner> {
        Box::new(NullJobRunner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_job_class_registers_and_runs() {
        let mut registry = JobClassRegistry::new();
        registry.register(Arc::new(NullJobClass));

        assert!(registry.contains("null"));
        let descriptor = registry.get("null").unwrap();
        let mut runner = descriptor.new_runner();
        let trackers = runner.run(4, Some(1));
        assert_eq!(trackers.len(), 1);
    }
}
