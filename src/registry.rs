//! In-memory job registry: the single source of truth for job state.
//!
//! The registry owns both the job map and the [`AdmissionQueue`] behind one
//! `RwLock`, so a status change and the admission bookkeeping it implies are
//! always observed together. Every compound update (record an outcome,
//! promote the next job, cancel and dequeue) happens inside one write-lock
//! section.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::admission::{Admission, AdmissionQueue};
use crate::error::{Result, RollcallError};
use crate::state_machine::{Job, JobConfig, JobStatus, JobStep, KeyOutcome, StateMachine, Transition};

/// Reply to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub job_id: String,
    pub queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

#[derive(Debug, Default)]
struct RegistryState {
    jobs: HashMap<String, Job>,
    admission: AdmissionQueue,
}

impl RegistryState {
    /// Mirror the admission queue's 1..N positions onto the waiting jobs.
    fn sync_positions(&mut self) {
        let positions: Vec<(String, usize)> = self
            .admission
            .positions()
            .map(|(id, pos)| (id.to_string(), pos))
            .collect();
        for (id, pos) in positions {
            if let Some(job) = self.jobs.get_mut(&id) {
                job.queue_position = Some(pos);
            }
        }
    }
}

/// Process-scoped registry service. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    state: Arc<RwLock<RegistryState>>,
    staging_root: PathBuf,
}

impl JobRegistry {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
            staging_root: staging_root.into(),
        }
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Register a new job for `config` covering `total` keys.
    ///
    /// The job becomes `pending` when nothing else is running; otherwise it is
    /// `queued` behind the active job.
    pub async fn create(&self, config: JobConfig, total: usize) -> Submission {
        let mut job = Job::new(config, total, &self.staging_root);
        let job_id = job.id.clone();

        let mut state = self.state.write().await;
        let submission = match state.admission.submit(job_id.clone()) {
            Admission::RunNow => {
                StateMachine::transition(&mut job, JobStatus::Pending, JobStep::Initializing, Utc::now());
                Submission {
                    job_id: job_id.clone(),
                    queued: false,
                    queue_position: None,
                }
            }
            Admission::Queued { position } => {
                job.queue_position = Some(position);
                Submission {
                    job_id: job_id.clone(),
                    queued: true,
                    queue_position: Some(position),
                }
            }
        };
        state.jobs.insert(job_id.clone(), job);
        drop(state);

        info!(
            job_id = %submission.job_id,
            total,
            queued = submission.queued,
            queue_position = ?submission.queue_position,
            "Job created"
        );
        submission
    }

    /// Clone of the job as it is right now.
    pub async fn get(&self, job_id: &str) -> Option<Job> {
        self.state.read().await.jobs.get(job_id).cloned()
    }

    /// Run `f` against the job under the read lock.
    pub async fn read<R>(&self, job_id: &str, f: impl FnOnce(&Job) -> R) -> Option<R> {
        self.state.read().await.jobs.get(job_id).map(f)
    }

    pub async fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.read(job_id, |job| job.status).await
    }

    /// Number of jobs currently in `status`.
    pub async fn count_with_status(&self, status: JobStatus) -> usize {
        self.state
            .read()
            .await
            .jobs
            .values()
            .filter(|job| job.status == status)
            .count()
    }

    /// Id of the job holding the active slot, if any.
    pub async fn active(&self) -> Option<String> {
        self.state.read().await.admission.active().map(str::to_string)
    }

    /// Move a job along its lifecycle graph.
    ///
    /// Rejected edges (including anything out of a terminal status) are
    /// silent no-ops. Reaching a terminal status removes the staging directory.
    pub async fn transition(&self, job_id: &str, status: JobStatus, step: JobStep) -> Option<Transition> {
        self.transition_with(job_id, status, step, |_| {}).await
    }

    /// Finalize a job as `done` with its download location.
    pub async fn complete(&self, job_id: &str, download_url: String) -> Option<Transition> {
        self.transition_with(job_id, JobStatus::Done, JobStep::Complete, move |job| {
            job.download_url = Some(download_url);
        })
        .await
    }

    /// Finalize a job as `error` with `message`.
    pub async fn fail(&self, job_id: &str, message: String) -> Option<Transition> {
        self.transition_with(job_id, JobStatus::Error, JobStep::Error, move |job| {
            job.error = Some(message);
        })
        .await
    }

    async fn transition_with(
        &self,
        job_id: &str,
        status: JobStatus,
        step: JobStep,
        on_applied: impl FnOnce(&mut Job),
    ) -> Option<Transition> {
        let (transition, staging) = {
            let mut state = self.state.write().await;
            let job = state.jobs.get_mut(job_id)?;
            let transition = StateMachine::transition(job, status, step, Utc::now());
            if transition.is_applied() {
                on_applied(job);
            }
            (transition, job.staging_dir.clone())
        };

        match transition {
            Transition::Applied { from, to } => {
                debug!(job_id, %from, %to, %step, "Job transitioned");
                if transition.reached_terminal() {
                    remove_staging(&staging).await;
                }
            }
            Transition::Rejected { from, to } => {
                debug!(job_id, %from, %to, "Ignoring transition not allowed from current status");
            }
        }
        Some(transition)
    }

    /// Update the informational step of a running job.
    pub async fn advance_step(&self, job_id: &str, step: JobStep) -> bool {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(job_id) {
            Some(job) => StateMachine::advance_step(job, step),
            None => false,
        }
    }

    /// Record a key's terminal classification as one atomic update.
    pub async fn record_outcome(&self, job_id: &str, key: &str, outcome: KeyOutcome) {
        let mut state = self.state.write().await;
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.record(key, outcome);
        }
    }

    /// Keep a contained batch-level failure on the job for later inspection.
    pub async fn record_batch_error(&self, job_id: &str, message: String) {
        let mut state = self.state.write().await;
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.batch_errors.push(message);
        }
    }

    /// Cancel a queued or pending job.
    ///
    /// A queued job leaves the admission queue and the remaining positions are
    /// recomputed. Returns the status the job had before cancellation.
    pub async fn cancel(&self, job_id: &str) -> Result<JobStatus> {
        let (previous, staging) = {
            let mut state = self.state.write().await;
            let job = state
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| RollcallError::JobNotFound(job_id.to_string()))?;

            let previous = job.status;
            if !matches!(previous, JobStatus::Queued | JobStatus::Pending) {
                return Err(RollcallError::InvalidState {
                    id: job_id.to_string(),
                    status: previous,
                });
            }

            StateMachine::transition(job, JobStatus::Canceled, JobStep::Canceled, Utc::now());
            let staging = job.staging_dir.clone();

            if previous == JobStatus::Queued && state.admission.remove(job_id) {
                state.sync_positions();
            }
            (previous, staging)
        };

        remove_staging(&staging).await;
        info!(job_id, %previous, "Job canceled");
        Ok(previous)
    }

    /// Release the active slot and promote the next queued job to `pending`.
    pub async fn advance(&self) -> Option<String> {
        let mut state = self.state.write().await;
        let RegistryState { jobs, admission } = &mut *state;

        let next = admission.advance(|id| {
            jobs.get(id)
                .is_some_and(|job| job.status == JobStatus::Queued)
        })?;

        if let Some(job) = jobs.get_mut(&next) {
            StateMachine::transition(job, JobStatus::Pending, JobStep::Initializing, Utc::now());
        }
        state.sync_positions();
        info!(job_id = %next, remaining = state.admission.len(), "Promoted queued job");
        Some(next)
    }

    /// Drop terminal jobs that ended before `now - retention`.
    ///
    /// The job holding the admission slot is kept even when terminal: its
    /// runner may still be between batches and checks the status to stop.
    pub async fn prune(&self, retention: chrono::Duration, now: DateTime<Utc>) -> Vec<Job> {
        let cutoff = now - retention;
        let mut state = self.state.write().await;
        let active = state.admission.active();
        let expired: Vec<String> = state
            .jobs
            .values()
            .filter(|job| active != Some(job.id.as_str()))
            .filter(|job| job.status.is_terminal() && job.end_time.is_some_and(|end| end < cutoff))
            .map(|job| job.id.clone())
            .collect();

        let removed: Vec<Job> = expired
            .iter()
            .filter_map(|id| state.jobs.remove(id))
            .collect();
        if !removed.is_empty() {
            debug!(count = removed.len(), "Pruned expired jobs");
        }
        removed
    }
}

/// Delete a job's staging directory. A missing directory is not an error.
pub async fn remove_staging(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!(path = %path.display(), "Staging directory removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, JobRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(dir.path());
        (dir, registry)
    }

    fn config() -> JobConfig {
        JobConfig::new("21UCSE4001", "21UCSE4005")
    }

    #[tokio::test]
    async fn first_job_is_pending_rest_queue() {
        let (_dir, registry) = registry();
        let a = registry.create(config(), 5).await;
        let b = registry.create(config(), 5).await;
        let c = registry.create(config(), 5).await;

        assert!(!a.queued);
        assert_eq!(a.queue_position, None);
        assert_eq!(b.queue_position, Some(1));
        assert_eq!(c.queue_position, Some(2));

        let job_a = registry.get(&a.job_id).await.unwrap();
        assert_eq!(job_a.status, JobStatus::Pending);
        assert_eq!(job_a.current_step, JobStep::Initializing);
        assert_eq!(job_a.queue_position, Some(0));
        assert_eq!(registry.count_with_status(JobStatus::Pending).await, 1);
        assert_eq!(registry.active().await, Some(a.job_id));
    }

    #[tokio::test]
    async fn cancel_queued_recomputes_positions() {
        let (_dir, registry) = registry();
        registry.create(config(), 5).await;
        let b = registry.create(config(), 5).await;
        let c = registry.create(config(), 5).await;
        let d = registry.create(config(), 5).await;

        assert_eq!(registry.cancel(&b.job_id).await.unwrap(), JobStatus::Queued);

        let job_b = registry.get(&b.job_id).await.unwrap();
        assert_eq!(job_b.status, JobStatus::Canceled);
        assert_eq!(job_b.current_step, JobStep::Canceled);
        assert_eq!(job_b.queue_position, None);
        assert!(job_b.end_time.is_some());

        assert_eq!(registry.get(&c.job_id).await.unwrap().queue_position, Some(1));
        assert_eq!(registry.get(&d.job_id).await.unwrap().queue_position, Some(2));
    }

    #[tokio::test]
    async fn cancel_rejects_unknown_and_terminal() {
        let (_dir, registry) = registry();
        assert!(matches!(
            registry.cancel("missing").await,
            Err(RollcallError::JobNotFound(_))
        ));

        let a = registry.create(config(), 5).await;
        registry.complete(&a.job_id, "/merged/x".into()).await;
        assert!(matches!(
            registry.cancel(&a.job_id).await,
            Err(RollcallError::InvalidState { status: JobStatus::Done, .. })
        ));
    }

    #[tokio::test]
    async fn advance_promotes_next_and_skips_canceled() {
        let (_dir, registry) = registry();
        let a = registry.create(config(), 5).await;
        let b = registry.create(config(), 5).await;
        let c = registry.create(config(), 5).await;

        registry.cancel(&b.job_id).await.unwrap();
        registry.complete(&a.job_id, "/merged/a".into()).await;

        assert_eq!(registry.advance().await, Some(c.job_id.clone()));
        let job_c = registry.get(&c.job_id).await.unwrap();
        assert_eq!(job_c.status, JobStatus::Pending);
        assert_eq!(job_c.queue_position, Some(0));
        assert_eq!(registry.count_with_status(JobStatus::Pending).await, 1);

        registry.fail(&c.job_id, "boom".into()).await;
        assert_eq!(registry.advance().await, None);
        assert_eq!(registry.active().await, None);
    }

    #[tokio::test]
    async fn terminal_transition_is_noop_and_keeps_fields() {
        let (_dir, registry) = registry();
        let a = registry.create(config(), 5).await;
        registry.complete(&a.job_id, "/merged/a".into()).await;

        let t = registry.fail(&a.job_id, "late".into()).await.unwrap();
        assert!(!t.is_applied());
        let job = registry.get(&a.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.error, None);
        assert_eq!(job.download_url.as_deref(), Some("/merged/a"));
    }

    #[tokio::test]
    async fn terminal_transition_removes_staging() {
        let (_dir, registry) = registry();
        let a = registry.create(config(), 5).await;
        let staging = registry.get(&a.job_id).await.unwrap().staging_dir;
        tokio::fs::create_dir_all(&staging).await.unwrap();
        tokio::fs::write(staging.join("21UCSE4001.pdf"), b"x").await.unwrap();

        registry.fail(&a.job_id, "merge failed".into()).await;
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn record_outcome_updates_counters() {
        let (_dir, registry) = registry();
        let a = registry.create(config(), 5).await;
        registry.record_outcome(&a.job_id, "21UCSE4001", KeyOutcome::NotFound).await;
        registry.record_outcome(&a.job_id, "21UCSE4002", KeyOutcome::Successful).await;

        let job = registry.get(&a.job_id).await.unwrap();
        assert_eq!(job.completed, 2);
        assert_eq!(job.successful, vec!["21UCSE4002"]);
        assert_eq!(job.not_found, vec!["21UCSE4001"]);
    }

    #[tokio::test]
    async fn prune_removes_only_expired_terminal_jobs() {
        let (_dir, registry) = registry();
        let a = registry.create(config(), 5).await;
        let b = registry.create(config(), 5).await;
        registry.complete(&a.job_id, "/merged/a".into()).await;
        assert_eq!(registry.advance().await, Some(b.job_id.clone()));

        let now = Utc::now();
        assert!(registry.prune(chrono::Duration::hours(1), now).await.is_empty());

        let removed = registry
            .prune(chrono::Duration::hours(1), now + chrono::Duration::hours(2))
            .await;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, a.job_id);
        assert!(registry.get(&a.job_id).await.is_none());
        assert!(registry.get(&b.job_id).await.is_some());
    }

    #[tokio::test]
    async fn prune_keeps_terminal_job_still_holding_the_slot() {
        let (_dir, registry) = registry();
        let a = registry.create(config(), 5).await;
        let b = registry.create(config(), 5).await;
        registry.cancel(&a.job_id).await.unwrap();

        let later = Utc::now() + chrono::Duration::hours(2);
        assert!(registry.prune(chrono::Duration::hours(1), later).await.is_empty());
        assert_eq!(registry.status(&a.job_id).await, Some(JobStatus::Canceled));

        assert_eq!(registry.advance().await, Some(b.job_id.clone()));
        let removed = registry.prune(chrono::Duration::hours(1), later).await;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, a.job_id);
    }
}
