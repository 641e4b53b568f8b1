use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use super::budget::BudgetGuard;
use super::cli::{BatchArgs, CreateArgs, DraftsArgs};
use super::job::{self, Job};
use super::pipeline::{self, RunConfig, RunSummary};
use super::poll::PollConfig;
use super::proxy;
use super::service::{HttpService, RequestEvent, RequestObserver, Service};
use super::session::StoredSession;
use crate::common::config::AppConfig;
use crate::common::paths;
use crate::ui::prelude::{Level, emit, is_debug_enabled};

pub async fn handle_create(args: CreateArgs) -> Result<RunSummary> {
    let job = Job {
        prompt: args.prompt,
        orientation: args.orientation,
        size: args.size,
        n_frames: args.n_frames,
        image: args.image,
        audio_caption: args.audio_caption,
        audio_transcript: args.audio_transcript,
    };
    job.validate()?;
    run_jobs(vec![job], args.out_dir, PollConfig::single()).await
}

pub async fn handle_batch(args: BatchArgs) -> Result<RunSummary> {
    let jobs = job::load_batch_file(&args.jobs)?;
    emit(
        Level::Info,
        "create.batch.loaded",
        &format!("Loaded {} job(s) from {}", jobs.len(), args.jobs.display()),
        None,
    );
    run_jobs(jobs, args.out_dir, PollConfig::batch()).await
}

async fn run_jobs(
    jobs: Vec<Job>,
    out_dir: Option<PathBuf>,
    poll: PollConfig,
) -> Result<RunSummary> {
    let config = AppConfig::load()?;
    let service = connect(&config).await?;
    let mut budget = BudgetGuard::load(paths::ledger_path()?, config.daily_budget_usd);
    let out_dir = match out_dir {
        Some(dir) => dir,
        None => paths::output_dir()?,
    };
    let run_config = RunConfig::new(config.model.clone(), out_dir, poll, config.draft_page_size);
    pipeline::run(&service, &mut budget, &jobs, &run_config).await
}

pub async fn handle_drafts(args: DraftsArgs) -> Result<()> {
    let config = AppConfig::load()?;
    let service = connect(&config).await?;
    let drafts = service.drafts(args.limit).await?;
    if drafts.is_empty() {
        emit(Level::Info, "drafts.empty", "No drafts found", None);
        return Ok(());
    }
    for draft in drafts {
        let prompt: String = draft
            .prompt
            .as_deref()
            .unwrap_or("?")
            .chars()
            .take(60)
            .collect();
        let availability = if draft.download_url().is_some() {
            "downloadable"
        } else {
            "not ready"
        };
        emit(
            Level::Info,
            "drafts.item",
            &format!(
                "{}  {}  {}  {}",
                draft.id,
                draft.describe_shape(),
                availability,
                prompt
            ),
            None,
        );
    }
    Ok(())
}

pub fn handle_budget() -> Result<()> {
    let config = AppConfig::load()?;
    let budget = BudgetGuard::load(paths::ledger_path()?, config.daily_budget_usd);
    let ledger = budget.ledger();
    emit(
        Level::Info,
        "budget.status",
        &format!("Daily budget: ${:.2}", budget.cap()),
        None,
    );
    emit(
        Level::Info,
        "budget.status",
        &format!(
            "Spent today ({}): ${:.2} across {} video(s)",
            ledger.date, ledger.spent, ledger.videos
        ),
        None,
    );
    emit(
        Level::Info,
        "budget.status",
        &format!("Remaining: ${:.2}", budget.remaining()),
        None,
    );
    for entry in &ledger.log {
        emit(
            Level::Info,
            "budget.entry",
            &format!(
                "  {}  {}  ${:.2}  {}",
                entry.time.format("%H:%M:%S"),
                entry.model,
                entry.cost,
                entry.prompt
            ),
            None,
        );
    }
    Ok(())
}

/// Construct the run's service client: resolve the proxy API key, acquire one
/// egress endpoint, and bind it to the stored session.
async fn connect(config: &AppConfig) -> Result<HttpService> {
    let api_key = config.webshare_api_key()?;
    emit(Level::Info, "create.proxy", "Fetching US proxy...", None);
    let proxy = proxy::acquire(&api_key).await?;
    let session = Arc::new(StoredSession::new(paths::session_path()?));
    let observer = if is_debug_enabled() {
        Some(request_logger())
    } else {
        None
    };
    HttpService::new(&config.base_url, &proxy, session, observer)
        .context("building service client")
}

fn request_logger() -> RequestObserver {
    Arc::new(|event: &RequestEvent| {
        let line = match event.status {
            Some(status) => format!("  <- {status} {} {}", event.method, event.url),
            None => format!("  -> {} {}", event.method, event.url),
        };
        emit(Level::Debug, "create.http", &line, None);
    })
}
