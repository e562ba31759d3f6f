pub mod client;
pub mod job;
pub mod job_class;
pub mod optimizing_job;
pub mod param;
pub mod stat;
