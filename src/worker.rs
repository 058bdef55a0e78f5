//! Concurrent processing of one batch of keys.
//!
//! [`WorkerPool::run_batch`] starts up to `max_workers` workers that share an
//! atomic cursor into the batch: each worker claims the next unclaimed key, so
//! fast workers naturally take more keys than slow ones and no key is claimed
//! twice. Workers are futures joined on the calling task and interleave only
//! at `.await` points.

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::config::{CancelPolicy, RollcallConfig};
use crate::registry::JobRegistry;
use crate::retrieval::{AttemptOutcome, ExecutionContext, RetrievalHost};
use crate::state_machine::{JobStatus, KeyOutcome};

/// Per-key retry/recovery state machine.
///
/// ```text
/// Attempt ── Success | NotFound ──────────────▶ Finished
///    │
///    └─ Transient ─▶ Recover ── ok ──▶ Attempt
///                       └─ failed ─▶ NewContext ── ok ──▶ Attempt
///                                        └─ failed ─▶ Finished(NotFound)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    Attempt,
    Recover,
    NewContext,
    Finished(KeyOutcome),
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// No keys left in the batch.
    Exhausted,
    /// No execution context could be acquired.
    Abandoned,
    /// The job was canceled and the policy says to stop claiming.
    Canceled,
}

/// What happened to one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    /// Keys nobody claimed because every worker abandoned the batch.
    pub swept: usize,
    pub exits: Vec<WorkerExit>,
}

pub struct WorkerPool<'a> {
    host: &'a dyn RetrievalHost,
    registry: &'a JobRegistry,
    job_id: &'a str,
    config: &'a RollcallConfig,
}

impl<'a> WorkerPool<'a> {
    pub fn new(
        host: &'a dyn RetrievalHost,
        registry: &'a JobRegistry,
        job_id: &'a str,
        config: &'a RollcallConfig,
    ) -> Self {
        Self {
            host,
            registry,
            job_id,
            config,
        }
    }

    /// Process every key of `batch` and return once all workers are done.
    pub async fn run_batch(&self, batch: &[String]) -> BatchReport {
        let cursor = AtomicUsize::new(0);
        let worker_count = self.config.max_workers.min(batch.len()).max(1);

        let exits = join_all((1..=worker_count).map(|worker| self.worker(worker, batch, &cursor))).await;

        let claimed = cursor.load(Ordering::SeqCst).min(batch.len());
        let mut swept = 0;
        if claimed < batch.len() && !exits.contains(&WorkerExit::Canceled) {
            error!(
                job_id = self.job_id,
                unclaimed = batch.len() - claimed,
                "Every worker abandoned the batch, recording remaining keys as not found"
            );
            for key in &batch[claimed..] {
                self.registry.record_outcome(self.job_id, key, KeyOutcome::NotFound).await;
                swept += 1;
            }
        }

        BatchReport {
            processed: claimed,
            swept,
            exits,
        }
    }

    async fn worker(&self, worker: usize, batch: &[String], cursor: &AtomicUsize) -> WorkerExit {
        let mut context: Option<Box<dyn ExecutionContext>> = None;

        let exit = loop {
            if self.should_stop_claiming().await {
                info!(job_id = self.job_id, worker, "Job canceled, worker stops claiming keys");
                break WorkerExit::Canceled;
            }

            if context.is_none() {
                match self.acquire_context(worker).await {
                    Some(fresh) => context = Some(fresh),
                    None => break WorkerExit::Abandoned,
                }
            }

            let index = cursor.fetch_add(1, Ordering::SeqCst);
            let Some(key) = batch.get(index) else {
                break WorkerExit::Exhausted;
            };

            let outcome = self.process_key(worker, key, &mut context).await;
            self.registry.record_outcome(self.job_id, key, outcome).await;
            trace!(job_id = self.job_id, worker, key, ?outcome, "Key processed");

            let delay = self.config.key_delay();
            if !delay.is_zero() {
                sleep(delay).await;
            }
        };

        if let Some(mut context) = context {
            context.dispose().await;
        }
        debug!(job_id = self.job_id, worker, ?exit, "Worker finished");
        exit
    }

    /// Drive one key to a terminal classification.
    async fn process_key(
        &self,
        worker: usize,
        key: &str,
        context: &mut Option<Box<dyn ExecutionContext>>,
    ) -> KeyOutcome {
        let mut transient_errors = 0;
        let mut state = KeyState::Attempt;

        loop {
            state = match state {
                KeyState::Finished(outcome) => return outcome,

                KeyState::Attempt => {
                    let Some(ctx) = context.as_mut() else {
                        break KeyOutcome::NotFound;
                    };
                    match ctx.attempt(key).await {
                        AttemptOutcome::Success => KeyState::Finished(KeyOutcome::Successful),
                        AttemptOutcome::NotFound => KeyState::Finished(KeyOutcome::NotFound),
                        AttemptOutcome::Transient(err) => {
                            transient_errors += 1;
                            if transient_errors > self.config.recovery_attempts {
                                warn!(
                                    job_id = self.job_id,
                                    worker,
                                    key,
                                    error = %err,
                                    "Recovery budget exhausted, recording key as not found"
                                );
                                KeyState::Finished(KeyOutcome::NotFound)
                            } else {
                                debug!(job_id = self.job_id, worker, key, error = %err, "Transient failure, recovering");
                                KeyState::Recover
                            }
                        }
                    }
                }

                KeyState::Recover => {
                    let Some(ctx) = context.as_mut() else {
                        break KeyOutcome::NotFound;
                    };
                    match ctx.recover().await {
                        Ok(()) => KeyState::Attempt,
                        Err(err) => {
                            warn!(job_id = self.job_id, worker, error = %err, "Recovery failed, opening a new context");
                            KeyState::NewContext
                        }
                    }
                }

                KeyState::NewContext => {
                    if let Some(mut stale) = context.take() {
                        stale.dispose().await;
                    }
                    match self.acquire_context(worker).await {
                        Some(fresh) => {
                            *context = Some(fresh);
                            KeyState::Attempt
                        }
                        None => KeyState::Finished(KeyOutcome::NotFound),
                    }
                }
            };
        }
    }

    /// Open an execution context with bounded retries and linear backoff.
    async fn acquire_context(&self, worker: usize) -> Option<Box<dyn ExecutionContext>> {
        let attempts = self.config.context_create_attempts;
        for attempt in 1..=attempts {
            match self.host.create_context().await {
                Ok(context) => {
                    debug!(job_id = self.job_id, worker, attempt, "Execution context ready");
                    return Some(context);
                }
                Err(err) => {
                    warn!(job_id = self.job_id, worker, attempt, error = %err, "Failed to create execution context");
                    if attempt < attempts {
                        sleep(self.config.context_backoff(attempt)).await;
                    }
                }
            }
        }
        error!(job_id = self.job_id, worker, attempts, "Giving up on execution context");
        None
    }

    async fn should_stop_claiming(&self) -> bool {
        self.config.cancel_policy == CancelPolicy::StopClaiming
            && self.registry.status(self.job_id).await != Some(JobStatus::Pending)
    }
}
