use std::collections::HashSet;
use std::time::Duration;

use super::api::Draft;

pub const CORRELATE_ATTEMPTS: u32 = 18;
pub const CORRELATE_INTERVAL: Duration = Duration::from_secs(5);

/// A draft matched back to the task that produced it.
#[derive(Debug, Clone)]
pub struct Claim {
    pub task_id: String,
    pub draft: Draft,
}

/// Matches finished drafts back to submitted tasks. The remote does not
/// reliably attach the originating task identifier to draft records, so a
/// direct id match is tried first and a snapshot-diff heuristic picks up the
/// rest: any unclaimed draft that did not exist before submission is assigned
/// to the oldest unclaimed task, in listing order. The fallback is policy,
/// not contract; it runs as its own pass so it can be tested in isolation.
#[derive(Debug)]
pub struct Correlator {
    snapshot: HashSet<String>,
    claimed: HashSet<String>,
    outstanding: Vec<String>,
}

impl Correlator {
    /// `snapshot` holds the draft ids that existed before submission;
    /// `outstanding` the submitted task ids in submission order.
    pub fn new(snapshot: HashSet<String>, outstanding: Vec<String>) -> Self {
        Self {
            snapshot,
            claimed: HashSet::new(),
            outstanding,
        }
    }

    pub fn snapshot_ids(drafts: &[Draft]) -> HashSet<String> {
        drafts.iter().map(|d| d.id.clone()).collect()
    }

    pub fn outstanding(&self) -> &[String] {
        &self.outstanding
    }

    pub fn is_settled(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Run both passes over one draft listing and return the new claims.
    pub fn claim(&mut self, drafts: &[Draft]) -> Vec<Claim> {
        let mut claims = self.primary_claims(drafts);
        claims.extend(self.fallback_claims(drafts));
        claims
    }

    /// Tier one: the draft's task identifier equals an outstanding task.
    /// A draft is claimable only once its download URL is populated; until
    /// then it is left for a later listing.
    pub fn primary_claims(&mut self, drafts: &[Draft]) -> Vec<Claim> {
        let mut claims = Vec::new();
        for draft in drafts {
            if self.claimed.contains(&draft.id) || draft.download_url().is_none() {
                continue;
            }
            let Some(task_id) = &draft.task_id else {
                continue;
            };
            if let Some(index) = self.outstanding.iter().position(|t| t == task_id) {
                let task_id = self.outstanding.remove(index);
                self.claimed.insert(draft.id.clone());
                claims.push(Claim {
                    task_id,
                    draft: draft.clone(),
                });
            }
        }
        claims
    }

    /// Tier two: snapshot-diff. Every unclaimed draft absent from the
    /// pre-submission snapshot is consumed first-seen against the oldest
    /// outstanding task.
    pub fn fallback_claims(&mut self, drafts: &[Draft]) -> Vec<Claim> {
        let mut claims = Vec::new();
        for draft in drafts {
            if self.outstanding.is_empty() {
                break;
            }
            if self.claimed.contains(&draft.id)
                || self.snapshot.contains(&draft.id)
                || draft.download_url().is_none()
            {
                continue;
            }
            let task_id = self.outstanding.remove(0);
            self.claimed.insert(draft.id.clone());
            claims.push(Claim {
                task_id,
                draft: draft.clone(),
            });
        }
        claims
    }
}
