use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::job::SizeClass;

/// Static cost table keyed by model and frame-count tier, in USD. Large size
/// applies a flat multiplier on top of the tier cost.
const FRAME_TIER_COSTS: &[(&str, u32, f64)] = &[
    ("sy_8", 150, 0.40),
    ("sy_8", 300, 0.80),
    ("sy_8", 450, 1.20),
    ("sy_8", 600, 1.60),
];

const LARGE_SIZE_MULTIPLIER: f64 = 2.5;

const PROMPT_PREFIX_LEN: usize = 60;

pub fn estimate_cost(model: &str, size: SizeClass, n_frames: u32) -> Result<f64> {
    let base = FRAME_TIER_COSTS
        .iter()
        .find(|(m, frames, _)| *m == model && *frames == n_frames)
        .map(|(_, _, cost)| *cost);
    let Some(base) = base else {
        bail!("no cost entry for model {model} at {n_frames} frames");
    };
    Ok(match size {
        SizeClass::Small => base,
        SizeClass::Large => base * LARGE_SIZE_MULTIPLIER,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub time: DateTime<Utc>,
    pub model: String,
    pub cost: f64,
    pub prompt: String,
}

/// Per-day spend state persisted as a small JSON file. Rolled over when the
/// persisted date differs from the current date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub date: NaiveDate,
    pub spent: f64,
    pub videos: u32,
    pub log: Vec<LedgerEntry>,
}

impl Ledger {
    fn fresh(date: NaiveDate) -> Self {
        Self {
            date,
            spent: 0.0,
            videos: 0,
            log: Vec::new(),
        }
    }

    /// Load the ledger for `today`. An unreadable, corrupt or stale-dated file
    /// yields a fresh zeroed day; budget tracking is best-effort, never a
    /// reason to fail the run. The file itself is left untouched.
    pub fn load(path: &Path, today: NaiveDate) -> Self {
        let Ok(contents) = fs::read_to_string(path) else {
            return Self::fresh(today);
        };
        match serde_json::from_str::<Ledger>(&contents) {
            Ok(ledger) if ledger.date == today => ledger,
            _ => Self::fresh(today),
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating ledger directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("serializing ledger")?;
        fs::write(path, json)
            .with_context(|| format!("writing ledger to {}", path.display()))?;
        Ok(())
    }
}

/// Gates job submission against the daily cap and records spend. The guard is
/// the only writer of the ledger file; single-process access assumed.
pub struct BudgetGuard {
    cap: f64,
    path: PathBuf,
    ledger: Ledger,
}

impl BudgetGuard {
    pub fn load(path: PathBuf, cap: f64) -> Self {
        let ledger = Ledger::load(&path, Local::now().date_naive());
        Self { cap, path, ledger }
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }

    pub fn remaining(&self) -> f64 {
        (self.cap - self.ledger.spent).max(0.0)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Whether `cost` fits within what is left of the daily cap.
    pub fn check(&self, cost: f64) -> bool {
        self.ledger.spent + cost <= self.cap + f64::EPSILON
    }

    /// Append a successful submission's cost to the ledger and persist it.
    /// Callers gate with `check` first; this is the only ledger mutation.
    pub fn record(&mut self, cost: f64, model: &str, prompt: &str) -> Result<()> {
        self.ledger.spent += cost;
        self.ledger.videos += 1;
        self.ledger.log.push(LedgerEntry {
            time: Utc::now(),
            model: model.to_string(),
            cost,
            prompt: prompt.chars().take(PROMPT_PREFIX_LEN).collect(),
        });
        self.ledger.save(&self.path)
    }
}
