use anyhow::{Context, Result};
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;

use super::api::{CreatePayload, InpaintItem};
use super::budget::{BudgetGuard, estimate_cost};
use super::correlate::{CORRELATE_ATTEMPTS, CORRELATE_INTERVAL, Claim, Correlator};
use super::download::{DownloadOutcome, Downloader};
use super::job::{Job, Task};
use super::poll::{PollConfig, PollOutcome, wait_for_drain};
use super::service::{Service, ServiceError};
use crate::ui::prelude::{Level, emit, separator};

pub struct RunConfig {
    pub model: String,
    pub out_dir: PathBuf,
    pub poll: PollConfig,
    pub correlate_attempts: u32,
    pub correlate_interval: Duration,
    pub draft_page_size: usize,
}

impl RunConfig {
    pub fn new(model: String, out_dir: PathBuf, poll: PollConfig, draft_page_size: usize) -> Self {
        Self {
            model,
            out_dir,
            poll,
            correlate_attempts: CORRELATE_ATTEMPTS,
            correlate_interval: CORRELATE_INTERVAL,
            draft_page_size,
        }
    }
}

/// Counts reported at the end of a run. Per-job failures are collected here
/// and summarized, never silently swallowed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub requested: usize,
    pub submitted: usize,
    pub submit_failed: usize,
    pub budget_skipped: usize,
    pub downloaded: usize,
    pub duplicates: usize,
    pub unresolved: usize,
    pub timed_out: bool,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        if self.requested > 0 && self.submitted == 0 {
            1
        } else {
            0
        }
    }
}

/// Run the whole create workflow over one or many jobs: snapshot existing
/// drafts, gate and submit each job, share one poll pass, correlate drafts
/// back to tasks, then download and deduplicate.
pub async fn run(
    service: &dyn Service,
    budget: &mut BudgetGuard,
    jobs: &[Job],
    config: &RunConfig,
) -> Result<RunSummary> {
    let mut summary = RunSummary {
        requested: jobs.len(),
        ..Default::default()
    };

    // Snapshot of draft ids that already exist, taken before any submission
    // so the correlator's fallback can tell new work from history.
    let snapshot = Correlator::snapshot_ids(
        &service
            .drafts(config.draft_page_size)
            .await
            .context("listing drafts for pre-submission snapshot")?,
    );

    let tasks = submit_jobs(service, budget, jobs, config, &mut summary).await?;
    summary.submitted = tasks.len();
    if tasks.is_empty() {
        report(&summary);
        return Ok(summary);
    }

    let outstanding: HashSet<String> = tasks.iter().map(|t| t.id.clone()).collect();
    emit(
        Level::Info,
        "create.poll.start",
        &format!("Waiting for {} task(s) to generate...", tasks.len()),
        None,
    );
    match wait_for_drain(service, &outstanding, &config.poll).await? {
        PollOutcome::Drained { polls } => {
            emit(
                Level::Info,
                "create.poll.drained",
                &format!("All tasks left the pending set after {polls} poll(s)"),
                None,
            );
        }
        PollOutcome::TimedOut {
            polls,
            still_pending,
        } => {
            summary.timed_out = true;
            emit(
                Level::Warn,
                "create.poll.timeout",
                &format!(
                    "{still_pending} task(s) still pending after {polls} poll(s); attempting correlation anyway"
                ),
                None,
            );
        }
    }

    let claims = correlate(service, snapshot, &tasks, config, &mut summary).await?;

    let mut downloader = Downloader::new(&config.out_dir)?;
    for claim in &claims {
        match downloader.download(service, &claim.draft).await {
            Ok(DownloadOutcome::Saved(record)) => {
                summary.downloaded += 1;
                emit(
                    Level::Success,
                    "create.download.saved",
                    &format!(
                        "Downloaded {} ({:.1} MB)",
                        record.path.display(),
                        record.bytes as f64 / 1024.0 / 1024.0
                    ),
                    None,
                );
            }
            Ok(DownloadOutcome::DuplicateSkipped { bytes }) => {
                summary.duplicates += 1;
                emit(
                    Level::Info,
                    "create.download.duplicate",
                    &format!(
                        "Skipped draft {}: {bytes} bytes already downloaded",
                        claim.draft.id
                    ),
                    None,
                );
            }
            Err(err) => {
                summary.unresolved += 1;
                emit(
                    Level::Warn,
                    "create.download.failed",
                    &format!("Download failed for draft {}: {err:#}", claim.draft.id),
                    None,
                );
            }
        }
    }

    report(&summary);
    Ok(summary)
}

async fn submit_jobs(
    service: &dyn Service,
    budget: &mut BudgetGuard,
    jobs: &[Job],
    config: &RunConfig,
    summary: &mut RunSummary,
) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    for (index, job) in jobs.iter().enumerate() {
        let cost = estimate_cost(&config.model, job.size, job.n_frames)?;
        if !budget.check(cost) {
            summary.budget_skipped += 1;
            emit(
                Level::Warn,
                "budget.skip",
                &format!(
                    "Skipping job {}: cost ${cost:.2} exceeds remaining daily budget ${:.2}",
                    index + 1,
                    budget.remaining()
                ),
                None,
            );
            continue;
        }

        let mut inpaint_items = Vec::new();
        if let Some(image) = &job.image {
            emit(
                Level::Info,
                "create.submit.upload",
                &format!("Uploading reference image {}", image.display()),
                None,
            );
            // Upload failure aborts the run; the create call is never
            // attempted without the file id.
            let file_id = service
                .upload_media(image)
                .await
                .with_context(|| format!("uploading reference image {}", image.display()))?;
            emit(
                Level::Info,
                "create.submit.uploaded",
                &format!("Uploaded: {file_id}"),
                None,
            );
            inpaint_items.push(InpaintItem::file(file_id));
        }

        let preview: String = job.prompt.chars().take(80).collect();
        emit(
            Level::Info,
            "create.submit.task",
            &format!("Creating video: {preview}..."),
            None,
        );
        let payload = CreatePayload::from_job(job, &config.model, inpaint_items);
        match service.create_task(&payload).await {
            Ok(resp) => {
                budget.record(cost, &config.model, &job.prompt)?;
                let task = Task {
                    videos_remaining: resp.videos_remaining(),
                    id: resp.id,
                };
                emit(
                    Level::Success,
                    "create.submit.created",
                    &format!("Task created: {}", task.id),
                    None,
                );
                if let Some(remaining) = task.videos_remaining {
                    emit(
                        Level::Info,
                        "create.submit.quota",
                        &format!("Videos remaining: {remaining}"),
                        None,
                    );
                }
                tasks.push(task);
            }
            Err(err @ (ServiceError::NoAccessToken | ServiceError::ChallengePage)) => {
                return Err(err.into());
            }
            Err(err) => {
                summary.submit_failed += 1;
                emit(
                    Level::Warn,
                    "create.submit.failed",
                    &format!("Submission failed for job {}: {err}", index + 1),
                    None,
                );
            }
        }
    }
    Ok(tasks)
}

async fn correlate(
    service: &dyn Service,
    snapshot: HashSet<String>,
    tasks: &[Task],
    config: &RunConfig,
    summary: &mut RunSummary,
) -> Result<Vec<Claim>> {
    let outstanding = tasks.iter().map(|t| t.id.clone()).collect();
    let mut correlator = Correlator::new(snapshot, outstanding);
    let mut claims = Vec::new();

    for attempt in 0..config.correlate_attempts {
        match service.drafts(config.draft_page_size).await {
            Ok(drafts) => {
                for claim in correlator.claim(&drafts) {
                    emit(
                        Level::Info,
                        "create.correlate.match",
                        &format!(
                            "Matched task {} to draft {} ({})",
                            claim.task_id,
                            claim.draft.id,
                            claim.draft.describe_shape()
                        ),
                        None,
                    );
                    claims.push(claim);
                }
            }
            Err(err @ (ServiceError::NoAccessToken | ServiceError::ChallengePage)) => {
                return Err(err.into());
            }
            Err(err) => {
                emit(
                    Level::Warn,
                    "create.correlate.retry",
                    &format!("Draft listing failed, retrying: {err}"),
                    None,
                );
            }
        }

        if correlator.is_settled() {
            break;
        }
        if attempt + 1 < config.correlate_attempts {
            emit(
                Level::Info,
                "create.correlate.wait",
                &format!(
                    "Draft(s) not ready yet, retrying ({}/{})",
                    attempt + 1,
                    config.correlate_attempts
                ),
                None,
            );
            sleep(config.correlate_interval).await;
        }
    }

    summary.unresolved = correlator.outstanding().len();
    if summary.unresolved > 0 {
        emit(
            Level::Warn,
            "create.correlate.unresolved",
            &format!(
                "{} task(s) could not be matched to a draft within the retry budget",
                summary.unresolved
            ),
            None,
        );
    }
    Ok(claims)
}

fn report(summary: &RunSummary) {
    separator(false);
    emit(
        Level::Info,
        "create.summary",
        &format!(
            "{} submitted, {} downloaded, {} duplicate(s) skipped, {} unresolved",
            summary.submitted, summary.downloaded, summary.duplicates, summary.unresolved
        ),
        Some(json!({
            "requested": summary.requested,
            "submitted": summary.submitted,
            "submit_failed": summary.submit_failed,
            "budget_skipped": summary.budget_skipped,
            "downloaded": summary.downloaded,
            "duplicates": summary.duplicates,
            "unresolved": summary.unresolved,
            "timed_out": summary.timed_out,
        })),
    );
    if summary.submit_failed > 0 {
        emit(
            Level::Warn,
            "create.summary.failures",
            &format!("{} submission(s) skipped", summary.submit_failed),
            None,
        );
    }
    if summary.budget_skipped > 0 {
        emit(
            Level::Warn,
            "create.summary.budget",
            &format!("{} job(s) skipped by the budget guard", summary.budget_skipped),
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create::api::PendingEntry;
    use crate::create::testing::{FakeService, draft_with_url, job};
    use std::path::Path;

    fn test_config(base: &Path, max_polls: u32) -> RunConfig {
        RunConfig {
            model: "sy_8".to_string(),
            out_dir: base.join("out"),
            poll: PollConfig {
                interval: Duration::from_millis(0),
                max_polls,
            },
            correlate_attempts: 3,
            correlate_interval: Duration::from_millis(0),
            draft_page_size: 10,
        }
    }

    fn test_budget(dir: &Path, cap: f64) -> BudgetGuard {
        BudgetGuard::load(dir.join("budget.json"), cap)
    }

    fn pending(task_id: &str) -> PendingEntry {
        PendingEntry {
            task_id: task_id.to_string(),
            progress: Some(50.0),
        }
    }

    #[tokio::test]
    async fn failed_middle_submission_skips_only_that_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = FakeService::new();
        service.push_drafts(Vec::new()); // snapshot
        service.push_create_ok("t1", Some(9));
        service.push_create_status(403);
        service.push_create_ok("t3", Some(8));
        service.push_pending(Vec::new()); // immediate drain
        service.push_drafts(vec![
            draft_with_url("g1", Some("t1"), "https://cdn/a.mp4"),
            draft_with_url("g3", Some("t3"), "https://cdn/b.mp4"),
        ]);
        service.add_file("https://cdn/a.mp4", vec![1u8; 100]);
        service.add_file("https://cdn/b.mp4", vec![2u8; 200]);

        let mut budget = test_budget(dir.path(), 10.0);
        let jobs = vec![job("prompt A"), job("prompt B"), job("prompt C")];
        let summary = run(&service, &mut budget, &jobs, &test_config(dir.path(), 5))
            .await
            .expect("run");

        assert_eq!(summary.requested, 3);
        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.submit_failed, 1);
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.unresolved, 0);
        assert_eq!(budget.ledger().videos, 2);
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn timeout_still_correlates_and_downloads_primary_matches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = FakeService::new();
        service.push_drafts(Vec::new()); // snapshot
        service.push_create_ok("t1", None);
        for _ in 0..3 {
            service.push_pending(vec![pending("t1")]);
        }
        service.push_drafts(vec![draft_with_url("g1", Some("t1"), "https://cdn/a.mp4")]);
        service.add_file("https://cdn/a.mp4", vec![1u8; 64]);

        let mut budget = test_budget(dir.path(), 10.0);
        let jobs = vec![job("slow prompt")];
        let summary = run(&service, &mut budget, &jobs, &test_config(dir.path(), 3))
            .await
            .expect("run");

        assert!(summary.timed_out);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.unresolved, 0);
    }

    #[tokio::test]
    async fn equal_byte_lengths_keep_exactly_one_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = FakeService::new();
        service.push_drafts(Vec::new()); // snapshot
        service.push_create_ok("t1", None);
        service.push_create_ok("t2", None);
        service.push_pending(Vec::new());
        service.push_drafts(vec![
            draft_with_url("g1", Some("t1"), "https://cdn/a.mp4"),
            draft_with_url("g2", Some("t2"), "https://cdn/b.mp4"),
        ]);
        service.add_file("https://cdn/a.mp4", vec![1u8; 64]);
        service.add_file("https://cdn/b.mp4", vec![2u8; 64]);

        let mut budget = test_budget(dir.path(), 10.0);
        let jobs = vec![job("prompt A"), job("prompt B")];
        let summary = run(&service, &mut budget, &jobs, &test_config(dir.path(), 5))
            .await
            .expect("run");

        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.unresolved, 0);
        assert_eq!(
            summary.downloaded + summary.duplicates + summary.unresolved,
            summary.submitted
        );
        assert_eq!(std::fs::read_dir(dir.path().join("out")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn uncorrelated_tasks_are_reported_not_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = FakeService::new();
        service.push_drafts(Vec::new()); // snapshot; listings stay empty
        service.push_create_ok("t1", None);
        service.push_pending(Vec::new());

        let mut budget = test_budget(dir.path(), 10.0);
        let jobs = vec![job("never indexed")];
        let summary = run(&service, &mut budget, &jobs, &test_config(dir.path(), 5))
            .await
            .expect("run");

        assert_eq!(summary.submitted, 1);
        assert_eq!(summary.downloaded, 0);
        assert_eq!(summary.unresolved, 1);
        assert_eq!(
            summary.downloaded + summary.duplicates + summary.unresolved,
            summary.submitted
        );
    }

    #[tokio::test]
    async fn budget_guard_skips_jobs_beyond_the_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = FakeService::new();
        service.push_drafts(Vec::new()); // snapshot
        service.push_create_ok("t1", None);
        service.push_pending(Vec::new());
        service.push_drafts(vec![draft_with_url("g1", Some("t1"), "https://cdn/a.mp4")]);
        service.add_file("https://cdn/a.mp4", vec![1u8; 64]);

        // Cap fits exactly one small 150-frame job at $0.40
        let mut budget = test_budget(dir.path(), 0.5);
        let jobs = vec![job("affordable"), job("unaffordable")];
        let summary = run(&service, &mut budget, &jobs, &test_config(dir.path(), 5))
            .await
            .expect("run");

        assert_eq!(summary.submitted, 1);
        assert_eq!(summary.budget_skipped, 1);
        assert_eq!(summary.downloaded, 1);
    }

    #[tokio::test]
    async fn reference_image_is_uploaded_before_the_create_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = FakeService::new();
        service.push_drafts(Vec::new()); // snapshot
        service.push_create_ok("t1", None);
        service.push_pending(Vec::new());
        service.push_drafts(vec![draft_with_url("g1", Some("t1"), "https://cdn/a.mp4")]);
        service.add_file("https://cdn/a.mp4", vec![1u8; 64]);

        let mut budget = test_budget(dir.path(), 10.0);
        let mut image_job = job("with reference");
        image_job.image = Some(dir.path().join("ref.png"));

        let summary = run(
            &service,
            &mut budget,
            &[image_job],
            &test_config(dir.path(), 5),
        )
        .await
        .expect("run");

        assert_eq!(service.uploads().len(), 1);
        assert_eq!(summary.downloaded, 1);
    }

    #[tokio::test]
    async fn reference_image_upload_failure_aborts_the_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = FakeService::new();
        service.push_drafts(Vec::new()); // snapshot
        service.set_fail_upload(true);

        let mut budget = test_budget(dir.path(), 10.0);
        let mut image_job = job("with reference");
        image_job.image = Some(dir.path().join("ref.png"));

        let result = run(
            &service,
            &mut budget,
            &[image_job],
            &test_config(dir.path(), 5),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(budget.ledger().videos, 0);
    }

    #[tokio::test]
    async fn nothing_submitted_yields_nonzero_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = FakeService::new();
        service.push_drafts(Vec::new()); // snapshot
        service.push_create_status(500);

        let mut budget = test_budget(dir.path(), 10.0);
        let summary = run(
            &service,
            &mut budget,
            &[job("doomed")],
            &test_config(dir.path(), 5),
        )
        .await
        .expect("run");

        assert_eq!(summary.submitted, 0);
        assert_eq!(summary.submit_failed, 1);
        assert_eq!(summary.exit_code(), 1);
    }
}
