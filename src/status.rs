//! Point-in-time progress snapshots of a job.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, RollcallError};
use crate::registry::JobRegistry;
use crate::state_machine::{Job, JobConfig, JobStatus, JobStep};

/// How many entries the recent-key lists carry.
pub const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElapsedTime {
    pub seconds: u64,
    /// `seconds / 60` with two decimals.
    pub minutes: String,
    pub formatted: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSpeed {
    pub keys_per_minute: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eta {
    pub minutes: String,
    pub formatted: String,
}

/// Status of one job as reported to pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub status: JobStatus,
    pub current_step: JobStep,
    pub queue_position: Option<usize>,
    pub config: JobConfig,
    pub completed: usize,
    pub total: usize,
    pub progress: String,
    pub progress_percent: String,
    pub elapsed_time: ElapsedTime,
    pub processing_speed: ProcessingSpeed,
    pub estimated_time_remaining: Option<Eta>,
    pub successful_count: usize,
    pub not_found_count: usize,
    pub recent_successful: Vec<String>,
    pub recent_not_found: Vec<String>,
    pub last_processed_key: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(rename = "downloadURL", skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub batch_errors: Vec<String>,
}

impl Snapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// `HH:MM:SS`, or `MM:SS` when under an hour.
pub fn format_elapsed(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

fn recent(keys: &[String]) -> Vec<String> {
    keys.iter().rev().take(RECENT_LIMIT).cloned().collect()
}

/// Derive the snapshot of `job` as seen at `now`.
pub fn snapshot(job: &Job, now: DateTime<Utc>) -> Snapshot {
    let seconds = u64::try_from((now - job.start_time).num_seconds()).unwrap_or(0);

    let speed = if job.completed > 0 && seconds > 0 {
        job.completed as f64 / seconds as f64 * 60.0
    } else {
        0.0
    };

    let remaining = job.remaining();
    let estimated_time_remaining = (speed > 0.0 && remaining > 0).then(|| {
        let minutes = remaining as f64 / speed;
        Eta {
            minutes: format!("{minutes:.2}"),
            formatted: format_elapsed((minutes * 60.0).round() as u64),
        }
    });

    let progress_percent = if job.total > 0 {
        format!("{}%", (job.completed as f64 / job.total as f64 * 100.0).round() as u64)
    } else {
        "0%".to_string()
    };

    Snapshot {
        id: job.id.clone(),
        status: job.status,
        current_step: job.current_step,
        queue_position: job.queue_position,
        config: job.config.clone(),
        completed: job.completed,
        total: job.total,
        progress: format!("{}/{} ({progress_percent})", job.completed, job.total),
        progress_percent,
        elapsed_time: ElapsedTime {
            seconds,
            minutes: format!("{:.2}", seconds as f64 / 60.0),
            formatted: format_elapsed(seconds),
        },
        processing_speed: ProcessingSpeed {
            keys_per_minute: format!("{speed:.2}"),
        },
        estimated_time_remaining,
        successful_count: job.successful.len(),
        not_found_count: job.not_found.len(),
        recent_successful: recent(&job.successful),
        recent_not_found: recent(&job.not_found),
        last_processed_key: job.last_processed_key.clone(),
        start_time: job.start_time,
        end_time: job.end_time,
        download_url: job.download_url.clone(),
        error: job.error.clone(),
        batch_errors: job.batch_errors.clone(),
    }
}

/// Read-only view over the registry that produces snapshots.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    registry: JobRegistry,
}

impl StatusReporter {
    pub fn new(registry: JobRegistry) -> Self {
        Self { registry }
    }

    pub async fn report(&self, job_id: &str) -> Result<Snapshot> {
        let now = Utc::now();
        self.registry
            .read(job_id, |job| snapshot(job, now))
            .await
            .ok_or_else(|| RollcallError::JobNotFound(job_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::KeyOutcome;
    use chrono::Duration;
    use std::path::Path;

    fn job(total: usize) -> Job {
        Job::new(JobConfig::new("A0001", format!("A{total:04}")), total, Path::new("/tmp/staging"))
    }

    #[test]
    fn formats_elapsed_with_and_without_hours() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(75), "01:15");
        assert_eq!(format_elapsed(3599), "59:59");
        assert_eq!(format_elapsed(3600), "01:00:00");
        assert_eq!(format_elapsed(3 * 3600 + 62), "03:01:02");
    }

    #[test]
    fn speed_and_eta() {
        let mut job = job(40);
        for i in 1..=10 {
            job.record(&format!("A{i:04}"), KeyOutcome::Successful);
        }
        let now = job.start_time + Duration::seconds(120);

        let snap = snapshot(&job, now);
        assert_eq!(snap.elapsed_time.seconds, 120);
        assert_eq!(snap.elapsed_time.minutes, "2.00");
        assert_eq!(snap.elapsed_time.formatted, "02:00");
        assert_eq!(snap.processing_speed.keys_per_minute, "5.00");
        let eta = snap.estimated_time_remaining.unwrap();
        assert_eq!(eta.minutes, "6.00");
        assert_eq!(eta.formatted, "06:00");
        assert_eq!(snap.progress, "10/40 (25%)");
    }

    #[test]
    fn no_speed_before_first_second() {
        let mut job = job(4);
        job.record("A0001", KeyOutcome::NotFound);
        let snap = snapshot(&job, job.start_time + Duration::milliseconds(500));
        assert_eq!(snap.processing_speed.keys_per_minute, "0.00");
        assert!(snap.estimated_time_remaining.is_none());
    }

    #[test]
    fn zero_total_is_zero_percent() {
        let job = job(0);
        let snap = snapshot(&job, job.start_time);
        assert_eq!(snap.progress_percent, "0%");
        assert_eq!(snap.progress, "0/0 (0%)");
    }

    #[test]
    fn recent_lists_are_capped_and_reversed() {
        let mut job = job(30);
        for i in 1..=12 {
            job.record(&format!("A{i:04}"), KeyOutcome::Successful);
        }
        job.record("A0013", KeyOutcome::NotFound);

        let snap = snapshot(&job, job.start_time);
        assert_eq!(snap.recent_successful.len(), RECENT_LIMIT);
        assert_eq!(snap.recent_successful.first().map(String::as_str), Some("A0012"));
        assert_eq!(snap.recent_successful.last().map(String::as_str), Some("A0003"));
        assert_eq!(snap.recent_not_found, vec!["A0013"]);
        assert_eq!(snap.successful_count + snap.not_found_count, snap.completed);
        assert_eq!(snap.last_processed_key.as_deref(), Some("A0013"));
    }

    #[test]
    fn serializes_camel_case_wire_names() {
        let job = job(2);
        let value = serde_json::to_value(snapshot(&job, job.start_time)).unwrap();
        assert_eq!(value["status"], "queued");
        assert_eq!(value["currentStep"], "queued");
        assert!(value.get("downloadURL").is_none());
        assert!(value["estimatedTimeRemaining"].is_null());
        assert!(value.get("error").is_none());
        assert!(value.get("batchErrors").is_none());
        assert_eq!(value["processingSpeed"]["keysPerMinute"], "0.00");
        assert_eq!(value["config"]["startKey"], "A0001");
    }

    #[test]
    fn download_url_is_serialized_once_done() {
        let mut job = job(2);
        job.status = JobStatus::Done;
        job.download_url = Some("/merged/Merged_result_x.pdf".to_string());
        let value = serde_json::to_value(snapshot(&job, job.start_time)).unwrap();
        assert_eq!(value["downloadURL"], "/merged/Merged_result_x.pdf");
    }

    #[tokio::test]
    async fn reporter_unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = StatusReporter::new(JobRegistry::new(dir.path()));
        assert!(matches!(
            reporter.report("nope").await,
            Err(RollcallError::JobNotFound(_))
        ));
    }
}
