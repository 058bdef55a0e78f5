//! Sequential batch driver for one job.
//!
//! Keys are split into batches of at most `max_batch_size`. Batches run one
//! after another with a cool-down in between; within a batch the
//! [`WorkerPool`] spreads keys over concurrent workers. A failing batch is
//! contained: it is logged on the job and ends the run, but never turns the
//! job into an error by itself.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::RollcallConfig;
use crate::error::RetrievalError;
use crate::registry::JobRegistry;
use crate::retrieval::{RetrievalCapability, RetrievalRequest};
use crate::state_machine::JobStatus;
use crate::worker::WorkerPool;

/// How a scheduler run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Every batch ran.
    Finished,
    /// The job was canceled; remaining batches were skipped.
    Canceled,
    /// A batch-level failure stopped the run early.
    Interrupted,
}

pub struct BatchScheduler {
    capability: Arc<dyn RetrievalCapability>,
    registry: JobRegistry,
    config: Arc<RollcallConfig>,
}

impl BatchScheduler {
    pub fn new(capability: Arc<dyn RetrievalCapability>, registry: JobRegistry, config: Arc<RollcallConfig>) -> Self {
        Self {
            capability,
            registry,
            config,
        }
    }

    /// Process `keys` for the job named in `request`.
    ///
    /// Only a failure to launch the first host is returned as an error.
    pub async fn run(&self, request: &RetrievalRequest, keys: &[String]) -> Result<ScheduleOutcome, RetrievalError> {
        let job_id = request.job_id.as_str();
        let batch_size = self.config.max_batch_size.min(keys.len()).max(1);
        let batches: Vec<&[String]> = keys.chunks(batch_size).collect();
        let batch_count = batches.len();

        let mut host = self.capability.launch(request).await?;
        info!(job_id, keys = keys.len(), batches = batch_count, batch_size, "Starting batches");

        let mut outcome = ScheduleOutcome::Finished;
        for (index, batch) in batches.into_iter().enumerate() {
            let number = index + 1;

            if self.is_canceled(job_id).await {
                info!(job_id, batch = number, "Job canceled, skipping remaining batches");
                outcome = ScheduleOutcome::Canceled;
                break;
            }

            if !host.is_connected() {
                warn!(job_id, batch = number, "Retrieval host disconnected, relaunching");
                host.shutdown().await;
                host = match self.capability.launch(request).await {
                    Ok(fresh) => fresh,
                    Err(e) => {
                        self.batch_failed(job_id, number, format!("host relaunch failed: {e}")).await;
                        // The old host is already shut down.
                        return Ok(ScheduleOutcome::Interrupted);
                    }
                };
            }

            info!(job_id, batch = number, of = batch_count, size = batch.len(), "Processing batch");
            let pool = WorkerPool::new(host.as_ref(), &self.registry, job_id, &self.config);
            match AssertUnwindSafe(pool.run_batch(batch)).catch_unwind().await {
                Ok(report) => {
                    info!(
                        job_id,
                        batch = number,
                        processed = report.processed,
                        swept = report.swept,
                        "Batch finished"
                    );
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    self.batch_failed(job_id, number, format!("batch panicked: {reason}")).await;
                    outcome = ScheduleOutcome::Interrupted;
                    break;
                }
            }

            let cooldown = self.config.batch_cooldown();
            if number < batch_count && !cooldown.is_zero() {
                sleep(cooldown).await;
            }
        }

        host.shutdown().await;

        if outcome == ScheduleOutcome::Finished && self.is_canceled(job_id).await {
            outcome = ScheduleOutcome::Canceled;
        }
        Ok(outcome)
    }

    /// Anything but `pending` stops the run, including a job no longer registered.
    async fn is_canceled(&self, job_id: &str) -> bool {
        self.registry.status(job_id).await != Some(JobStatus::Pending)
    }

    async fn batch_failed(&self, job_id: &str, batch: usize, message: String) {
        error!(job_id, batch, error = %message, "Batch failed");
        self.registry
            .record_batch_error(job_id, format!("batch {batch}: {message}"))
            .await;
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
