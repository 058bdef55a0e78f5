//! Job service: submission, the single-active-job runner, status and cancel.
//!
//! The service owns the collaborators a job needs (registry, retrieval
//! capability, combiner) and drives each admitted job through
//! `initializing → processing_rolls → merging_pdfs → complete`. Only one
//! runner task exists at a time: it is spawned when a submission finds the
//! admission slot free and keeps promoting queued jobs until none are left.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::combiner::{ConcatCombiner, DocumentCombiner};
use crate::config::RollcallConfig;
use crate::error::{Result, RollcallError};
use crate::keys;
use crate::registry::{JobRegistry, Submission};
use crate::retrieval::{HttpCapability, RetrievalCapability, RetrievalRequest};
use crate::scheduler::{BatchScheduler, ScheduleOutcome, panic_message};
use crate::state_machine::{JobConfig, JobStatus, JobStep};
use crate::status::{Snapshot, StatusReporter};

/// Reply to a successful cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelReply {
    pub success: bool,
    pub message: String,
}

struct Inner {
    registry: JobRegistry,
    config: Arc<RollcallConfig>,
    capability: Arc<dyn RetrievalCapability>,
    combiner: Arc<dyn DocumentCombiner>,
}

/// Cheap to clone; clones drive the same jobs.
#[derive(Clone)]
pub struct JobService {
    inner: Arc<Inner>,
}

impl JobService {
    pub fn new(
        config: RollcallConfig,
        capability: Arc<dyn RetrievalCapability>,
        combiner: Arc<dyn DocumentCombiner>,
    ) -> Self {
        let registry = JobRegistry::new(config.staging_dir.clone());
        Self {
            inner: Arc::new(Inner {
                registry,
                config: Arc::new(config),
                capability,
                combiner,
            }),
        }
    }

    /// Service wired to the HTTP capability and the concatenating combiner.
    pub fn from_config(config: RollcallConfig) -> Self {
        let capability = Arc::new(HttpCapability::from_config(&config));
        Self::new(config, capability, Arc::new(ConcatCombiner))
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &RollcallConfig {
        &self.inner.config
    }

    /// Validate the range, register the job and start it if the slot is free.
    pub async fn submit(&self, config: JobConfig) -> Result<Submission> {
        let total = keys::count_within(&config, self.inner.config.max_keys_per_job)?;
        let submission = self.inner.registry.create(config, total).await;
        if !submission.queued {
            self.spawn_runner(submission.job_id.clone());
        }
        Ok(submission)
    }

    pub async fn status(&self, job_id: &str) -> Result<Snapshot> {
        StatusReporter::new(self.inner.registry.clone()).report(job_id).await
    }

    pub async fn cancel(&self, job_id: &str) -> Result<CancelReply> {
        self.inner.registry.cancel(job_id).await?;
        Ok(CancelReply {
            success: true,
            message: "Job canceled successfully".to_string(),
        })
    }

    /// Periodically drop terminal jobs older than the configured retention,
    /// along with their merged output. `None` when retention is disabled.
    pub fn spawn_pruner(&self) -> Option<JoinHandle<()>> {
        let window = self.inner.config.retention()?;
        let retention = chrono::Duration::from_std(window).ok()?;
        let period = window.clamp(Duration::from_secs(1), Duration::from_secs(60));
        let service = self.clone();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                service.prune(retention).await;
            }
        }))
    }

    /// Forget terminal jobs that ended more than `retention` ago.
    pub async fn prune(&self, retention: chrono::Duration) -> usize {
        let removed = self.inner.registry.prune(retention, Utc::now()).await;
        for job in &removed {
            if job.status == JobStatus::Done {
                let output = self.merged_path(&job.id);
                if let Err(e) = tokio::fs::remove_file(&output).await
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(job_id = %job.id, path = %output.display(), error = %e, "Failed to remove merged output");
                }
            }
            debug!(job_id = %job.id, status = %job.status, "Job pruned");
        }
        removed.len()
    }

    fn merged_file_name(&self, job_id: &str) -> String {
        format!("Merged_result_{job_id}.{}", self.inner.config.artifact_extension)
    }

    fn merged_path(&self, job_id: &str) -> PathBuf {
        self.inner.config.merged_dir.join(self.merged_file_name(job_id))
    }

    fn download_url(&self, job_id: &str) -> String {
        format!(
            "{}/{}",
            self.inner.config.download_prefix.trim_end_matches('/'),
            self.merged_file_name(job_id)
        )
    }

    fn spawn_runner(&self, first: String) {
        let service = self.clone();
        tokio::spawn(async move {
            let mut next = Some(first);
            while let Some(job_id) = next {
                service.run_job(&job_id).await;
                next = service.inner.registry.advance().await;
            }
            debug!("Admission queue drained, runner exiting");
        });
    }

    /// Run one admitted job to a terminal status. Never panics outward.
    async fn run_job(&self, job_id: &str) {
        let result = AssertUnwindSafe(self.execute(job_id)).catch_unwind().await;
        let message = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("job runner panicked: {}", panic_message(panic.as_ref())),
        };
        error!(job_id, error = %message, "Job failed");
        self.inner.registry.fail(job_id, message).await;
    }

    async fn execute(&self, job_id: &str) -> Result<()> {
        let registry = &self.inner.registry;
        let Some(job) = registry.get(job_id).await else {
            return Err(RollcallError::JobNotFound(job_id.to_string()));
        };
        if job.status != JobStatus::Pending {
            debug!(job_id, status = %job.status, "Job no longer pending, skipping");
            return Ok(());
        }

        info!(job_id, start = %job.config.start_key, end = %job.config.end_key, total = job.total, "Job started");
        tokio::fs::create_dir_all(&job.staging_dir).await?;
        let keys = keys::expand(&job.config)?;

        registry.advance_step(job_id, JobStep::ProcessingRolls).await;
        let request = RetrievalRequest {
            job_id: job_id.to_string(),
            staging_dir: job.staging_dir.clone(),
            params: job.config.params.clone(),
        };
        let scheduler = BatchScheduler::new(
            Arc::clone(&self.inner.capability),
            registry.clone(),
            Arc::clone(&self.inner.config),
        );
        let outcome = scheduler.run(&request, &keys).await?;

        if outcome == ScheduleOutcome::Canceled || registry.status(job_id).await != Some(JobStatus::Pending) {
            info!(job_id, "Job canceled during processing, skipping merge");
            return Ok(());
        }

        registry.advance_step(job_id, JobStep::MergingPdfs).await;
        let output = self.merged_path(job_id);
        self.inner.combiner.combine(&job.staging_dir, &output).await?;

        let applied = registry
            .complete(job_id, self.download_url(job_id))
            .await
            .is_some_and(|t| t.is_applied());
        if applied {
            let (successful, not_found) = registry
                .read(job_id, |job| (job.successful.len(), job.not_found.len()))
                .await
                .unwrap_or_default();
            info!(job_id, successful, not_found, output = %output.display(), "Job complete");
        } else {
            // Canceled while merging: the output belongs to nobody.
            warn!(job_id, "Job left pending before completion, discarding merged output");
            if let Err(e) = tokio::fs::remove_file(&output).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(job_id, path = %output.display(), error = %e, "Failed to remove orphaned merged output");
            }
        }
        Ok(())
    }
}
