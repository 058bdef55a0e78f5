use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{JobStatus, JobStep};

/// Immutable request parameters of a job: the key range plus pass-through
/// parameters handed to the retrieval capability unvalidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub start_key: String,
    pub end_key: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl JobConfig {
    pub fn new(start_key: impl Into<String>, end_key: impl Into<String>) -> Self {
        Self {
            start_key: start_key.into(),
            end_key: end_key.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Terminal classification of a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOutcome {
    Successful,
    NotFound,
}

/// One submitted range request and its full lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub current_step: JobStep,
    pub queue_position: Option<usize>,
    pub config: JobConfig,
    pub total: usize,
    pub completed: usize,
    pub successful: Vec<String>,
    pub not_found: Vec<String>,
    pub last_processed_key: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub download_url: Option<String>,
    pub error: Option<String>,
    pub batch_errors: Vec<String>,
    pub staging_dir: PathBuf,
}

impl Job {
    /// A freshly submitted job. Admission decides whether it stays queued.
    pub fn new(config: JobConfig, total: usize, staging_root: &Path) -> Self {
        let id = Uuid::new_v4().to_string();
        let staging_dir = staging_root.join(format!("job_{id}"));
        Self {
            id,
            status: JobStatus::Queued,
            current_step: JobStep::Queued,
            queue_position: None,
            config,
            total,
            completed: 0,
            successful: Vec::new(),
            not_found: Vec::new(),
            last_processed_key: None,
            start_time: Utc::now(),
            end_time: None,
            download_url: None,
            error: None,
            batch_errors: Vec::new(),
            staging_dir,
        }
    }

    /// Record a key's terminal classification.
    ///
    /// The increment, the append and the last-key update form one unit; callers
    /// hold the registry write lock across this call.
    pub fn record(&mut self, key: &str, outcome: KeyOutcome) {
        self.completed += 1;
        match outcome {
            KeyOutcome::Successful => self.successful.push(key.to_string()),
            KeyOutcome::NotFound => self.not_found.push(key.to_string()),
        }
        self.last_processed_key = Some(key.to_string());
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed)
    }
}
