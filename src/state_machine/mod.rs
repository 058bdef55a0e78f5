mod job;
mod state;

pub use job::{Job, JobConfig, KeyOutcome};
pub use state::{JobStatus, JobStep, StateMachine, Transition};
