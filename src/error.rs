use thiserror::Error;

use crate::state_machine::JobStatus;

#[derive(Debug, Error)]
pub enum RollcallError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid key range: {0}")]
    InvalidRange(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {id} cannot be cancelled in its current state ({status})")]
    InvalidState { id: String, status: JobStatus },

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T, E = RollcallError> = std::result::Result<T, E>;

/// Failures raised at the retrieval capability seam.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The host could not be started for this job.
    #[error("failed to launch retrieval host: {0}")]
    Launch(String),

    /// The host is gone; it must be relaunched before the next batch.
    #[error("retrieval host disconnected")]
    Disconnected,

    /// A fresh execution context could not be opened.
    #[error("failed to create execution context: {0}")]
    ContextUnavailable(String),

    /// Resetting an execution context to its landing state failed.
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    /// The service answered with a status that is neither a result nor a miss.
    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal to the job: the artifacts could not be merged.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("artifact directory unreadable: {0}")]
    ReadDir(#[source] std::io::Error),

    #[error("failed to write merged artifact {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
