//! Job-lifecycle scheduler for bulk per-key result retrieval.
//!
//! A job covers a contiguous range of keys. Jobs are admitted one at a time;
//! the active job's keys are fetched in sequential batches by a pool of
//! concurrent workers, each outcome is recorded as it happens, and the
//! artifacts are merged into a single downloadable document at the end.

pub mod admission;
pub mod cli;
pub mod combiner;
pub mod config;
pub mod error;
pub mod keys;
pub mod logging;
pub mod registry;
pub mod retrieval;
pub mod scheduler;
pub mod service;
pub mod state_machine;
pub mod status;
pub mod ui;
pub mod worker;

pub use config::{CancelPolicy, RollcallConfig};
pub use error::{Result, RollcallError};
pub use service::{CancelReply, JobService};
pub use state_machine::{JobConfig, JobStatus, JobStep};
pub use status::Snapshot;
