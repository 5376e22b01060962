//! The combined artifact handed to the persistent store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::{RunMode, Verdict};

/// Machine-readable totals across a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactTotals {
    pub rounds_completed: u32,
    pub units_attempted: usize,
    pub units_succeeded: usize,
    pub units_failed: usize,
    pub units_denied: usize,
    pub duplicates_skipped: usize,
    pub malformed_rounds: usize,
    /// Score of the last scored round (refinement only).
    pub final_score: Option<f64>,
    /// Best score seen across the run (refinement only).
    pub best_score: Option<f64>,
    /// Sum of collaborator-reported costs.
    pub total_cost: f64,
    /// Budget usage at termination, keyed by resource name.
    pub budget_used: BTreeMap<String, u64>,
}

/// Final output of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalArtifact {
    pub run_id: Uuid,
    pub topic: String,
    pub mode: RunMode,
    pub verdict: Verdict,
    /// True only when the run stopped with [`Verdict::StopSuccess`].
    pub approved: bool,
    /// Human-readable combined document (markdown).
    pub document: String,
    pub totals: ArtifactTotals,
}

impl FinalArtifact {
    /// A best-effort artifact did not meet the success criterion.
    pub const fn is_best_effort(&self) -> bool {
        !self.approved
    }
}
