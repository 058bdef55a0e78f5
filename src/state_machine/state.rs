use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::Job;

/// Outcome-level status of a job.
///
/// Each job flows through: QUEUED → PENDING → DONE | ERROR | CANCELED,
/// and CANCELED is also reachable straight from QUEUED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Pending,
    Done,
    Error,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Canceled)
    }

    /// Whether `self → next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Pending)
                | (JobStatus::Queued, JobStatus::Canceled)
                | (JobStatus::Pending, JobStatus::Done)
                | (JobStatus::Pending, JobStatus::Error)
                | (JobStatus::Pending, JobStatus::Canceled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Error => write!(f, "error"),
            JobStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// Phase-level progress marker. Informational only; `JobStatus` drives the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStep {
    Queued,
    Initializing,
    ProcessingRolls,
    MergingPdfs,
    Complete,
    Error,
    Canceled,
}

impl fmt::Display for JobStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStep::Queued => write!(f, "queued"),
            JobStep::Initializing => write!(f, "initializing"),
            JobStep::ProcessingRolls => write!(f, "processing_rolls"),
            JobStep::MergingPdfs => write!(f, "merging_pdfs"),
            JobStep::Complete => write!(f, "complete"),
            JobStep::Error => write!(f, "error"),
            JobStep::Canceled => write!(f, "canceled"),
        }
    }
}

/// The result of asking the state machine to move a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The job moved along an allowed edge.
    Applied { from: JobStatus, to: JobStatus },
    /// The edge is not part of the graph; the job is untouched.
    Rejected { from: JobStatus, to: JobStatus },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }

    /// True when the job just reached a terminal status.
    pub fn reached_terminal(&self) -> bool {
        matches!(self, Transition::Applied { to, .. } if to.is_terminal())
    }
}

/// Drives a `Job` through its lifecycle graph.
pub struct StateMachine;

impl StateMachine {
    /// Move `job` to `status` / `step` if the edge is allowed.
    ///
    /// - Entering `Pending` sets the queue position to 0.
    /// - Entering a terminal status stamps `end_time` and clears the queue
    ///   position.
    /// - Anything leaving a terminal status is rejected without side effects.
    pub fn transition(
        job: &mut Job,
        status: JobStatus,
        step: JobStep,
        now: DateTime<Utc>,
    ) -> Transition {
        let from = job.status;
        if !from.can_transition_to(status) {
            return Transition::Rejected { from, to: status };
        }

        job.status = status;
        job.current_step = step;
        if status == JobStatus::Pending {
            job.queue_position = Some(0);
        }
        if status.is_terminal() {
            job.end_time = Some(now);
            job.queue_position = None;
        }

        Transition::Applied { from, to: status }
    }

    /// Update the informational step of a running job. Terminal jobs keep theirs.
    pub fn advance_step(job: &mut Job, step: JobStep) -> bool {
        if job.status.is_terminal() {
            return false;
        }
        job.current_step = step;
        true
    }
}
