use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::MultiProgress;
use tracing::{info, warn};

use rollcall::cli::{self, Cli, Command};
use rollcall::ui::{self, JobProgress};
use rollcall::{JobConfig, JobService, JobStatus, RollcallConfig, Snapshot};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    rollcall::logging::init(cli.verbose);

    let config = RollcallConfig::load().context("failed to load rollcall.toml")?;
    let config = cli.apply_overrides(config);
    info!(
        base_url = %config.base_url,
        workers = config.max_workers,
        batch_size = config.max_batch_size,
        "Configuration loaded"
    );

    let Command::Run {
        start,
        end,
        params,
        file,
    } = cli.command;

    let jobs = match (file, start, end) {
        (Some(path), _, _) => cli::load_job_file(Path::new(&path))
            .with_context(|| format!("failed to read job file {path}"))?,
        (None, Some(start), Some(end)) => {
            let config = params
                .into_iter()
                .fold(JobConfig::new(start, end), |config, (k, v)| config.with_param(k, v));
            vec![config]
        }
        _ => anyhow::bail!("either <START> <END> or --file is required"),
    };

    let service = JobService::from_config(config);
    let _pruner = service.spawn_pruner();

    let mut submitted = Vec::new();
    for job in jobs {
        let range = format!("{}..{}", job.start_key, job.end_key);
        let submission = service
            .submit(job)
            .await
            .with_context(|| format!("failed to submit {range}"))?;
        submitted.push(submission.job_id);
    }

    let finals = follow(&service, &submitted).await?;
    ui::print_snapshots(&finals);

    let failed = finals.iter().filter(|s| s.status == JobStatus::Error).count();
    if failed > 0 {
        anyhow::bail!("{failed} job(s) failed");
    }
    Ok(())
}

/// Poll every job until all are terminal. Ctrl-C cancels whatever is left.
async fn follow(service: &JobService, job_ids: &[String]) -> Result<Vec<Snapshot>> {
    let multi = MultiProgress::new();
    let mut bars = HashMap::new();
    for id in job_ids {
        let snapshot = service.status(id).await?;
        bars.insert(id.clone(), JobProgress::start(&multi, id, snapshot.total));
    }

    let mut finished: HashMap<String, Snapshot> = HashMap::new();
    while finished.len() < job_ids.len() {
        let pending: Vec<&String> = job_ids.iter().filter(|id| !finished.contains_key(*id)).collect();
        for id in pending {
            let snapshot = service.status(id).await?;
            if let Some(bar) = bars.get(id) {
                if snapshot.is_terminal() {
                    bar.finish(&snapshot);
                } else {
                    bar.update(&snapshot);
                }
            }
            if snapshot.is_terminal() {
                finished.insert(id.clone(), snapshot);
            }
        }

        if finished.len() == job_ids.len() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, canceling unfinished jobs");
                for id in job_ids.iter().filter(|id| !finished.contains_key(*id)) {
                    if let Err(e) = service.cancel(id).await {
                        warn!(job_id = %id, error = %e, "Cancel failed");
                    }
                }
            }
        }
    }

    Ok(job_ids
        .iter()
        .filter_map(|id| finished.remove(id))
        .collect())
}
