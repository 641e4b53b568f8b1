use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;

use super::service::{Service, ServiceError};
use crate::ui::prelude::{Level, emit};

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_POLLS_SINGLE: u32 = 240;
pub const MAX_POLLS_BATCH: u32 = 120;

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_polls: u32,
}

impl PollConfig {
    pub fn single() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_polls: MAX_POLLS_SINGLE,
        }
    }

    pub fn batch() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_polls: MAX_POLLS_BATCH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Every outstanding task left the pending set.
    Drained { polls: u32 },
    /// The poll budget ran out first. Reported, not fatal: a task can
    /// disappear from pending before its draft is indexed, so the caller
    /// proceeds to correlation regardless.
    TimedOut { polls: u32, still_pending: usize },
}

/// Poll the remote pending set until no outstanding task remains in it, or
/// the poll budget is exhausted.
pub async fn wait_for_drain(
    service: &dyn Service,
    outstanding: &HashSet<String>,
    config: &PollConfig,
) -> Result<PollOutcome, ServiceError> {
    let mut still_pending = outstanding.len();
    for i in 0..config.max_polls {
        let pending = match service.pending().await {
            Ok(pending) => pending,
            Err(err @ (ServiceError::NoAccessToken | ServiceError::ChallengePage)) => {
                return Err(err);
            }
            Err(err) => {
                emit(
                    Level::Warn,
                    "create.poll.retry",
                    &format!("Pending query failed, retrying: {err}"),
                    None,
                );
                sleep(config.interval).await;
                continue;
            }
        };

        if pending.is_empty() {
            return Ok(PollOutcome::Drained { polls: i + 1 });
        }

        let elapsed = u64::from(i) * config.interval.as_secs();
        let in_flight: Vec<_> = pending
            .iter()
            .filter(|entry| outstanding.contains(&entry.task_id))
            .collect();
        if in_flight.is_empty() {
            return Ok(PollOutcome::Drained { polls: i + 1 });
        }

        still_pending = in_flight.len();
        for entry in &in_flight {
            let progress = entry
                .progress
                .map(|p| format!("{p:.0}%"))
                .unwrap_or_else(|| "?".to_string());
            emit(
                Level::Info,
                "create.poll.progress",
                &format!("  [{elapsed}s] {}: {progress}", entry.task_id),
                None,
            );
        }

        sleep(config.interval).await;
    }

    Ok(PollOutcome::TimedOut {
        polls: config.max_polls,
        still_pending,
    })
}
