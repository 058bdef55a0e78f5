//! The retrieval seam between the scheduler and the remote result service.
//!
//! A [`RetrievalCapability`] launches one [`RetrievalHost`] per job. Workers of
//! that job share the host but each opens its own [`ExecutionContext`], which
//! is where per-key attempts and recovery happen. The scheduler only ever sees
//! these traits; [`HttpCapability`] is the concrete adapter.

pub mod http;
#[cfg(test)]
pub(crate) mod scripted;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::RetrievalError;

pub use http::HttpCapability;

/// Everything a host needs to serve one job.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub job_id: String,
    /// Where successful attempts leave their artifacts.
    pub staging_dir: PathBuf,
    /// Pass-through parameters from the job config.
    pub params: BTreeMap<String, String>,
}

/// Classification of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success,
    NotFound,
    Transient(RetrievalError),
}

#[async_trait]
pub trait RetrievalCapability: Send + Sync {
    /// Start a host for one job.
    async fn launch(&self, request: &RetrievalRequest) -> Result<Box<dyn RetrievalHost>, RetrievalError>;
}

#[async_trait]
pub trait RetrievalHost: Send + Sync {
    /// False once the host can no longer serve contexts; the scheduler then
    /// relaunches it before the next batch.
    fn is_connected(&self) -> bool;

    /// Open an isolated execution context, already in its landing state.
    async fn create_context(&self) -> Result<Box<dyn ExecutionContext>, RetrievalError>;

    async fn shutdown(&self);
}

#[async_trait]
pub trait ExecutionContext: Send {
    async fn attempt(&mut self, key: &str) -> AttemptOutcome;

    /// Reset the context to its landing state after a transient failure.
    async fn recover(&mut self) -> Result<(), RetrievalError>;

    /// Release the context. It is not used afterwards.
    async fn dispose(&mut self);
}
