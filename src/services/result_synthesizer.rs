//! Folds a terminal run into one [`FinalArtifact`].
//!
//! Synthesis is a pure function of the [`RunState`]: no timestamps, ordered
//! maps only, so two calls on the same state produce identical output.

use std::fmt::Write as _;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{
    ArtifactTotals, FinalArtifact, RoundFlag, RoundRecord, RunMode, UnitKind, Verdict, WorkUnit,
};

use super::run_state::RunState;

/// Builds the combined document and totals for hand-off.
#[derive(Debug, Clone)]
pub struct ResultSynthesizer {
    include_failures: bool,
}

impl Default for ResultSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSynthesizer {
    pub const fn new() -> Self {
        Self {
            include_failures: true,
        }
    }

    /// Omit failed units from the human-readable document. Totals still
    /// count them.
    #[must_use]
    pub const fn without_failures(mut self) -> Self {
        self.include_failures = false;
        self
    }

    pub fn synthesize(&self, state: &RunState) -> EngineResult<FinalArtifact> {
        if !state.is_terminal() {
            return Err(EngineError::invariant(format!(
                "synthesize called on non-terminal run {}",
                state.run_id()
            )));
        }
        let verdict = state.verdict().ok_or_else(|| {
            EngineError::invariant(format!("terminal run {} has no verdict", state.run_id()))
        })?;
        let approved = verdict == Verdict::StopSuccess;

        let totals = Self::totals(state);
        let document = match state.mode() {
            RunMode::Research => self.research_document(state, verdict, approved),
            RunMode::Refinement => self.refinement_document(state, verdict, approved, &totals),
        };

        Ok(FinalArtifact {
            run_id: state.run_id(),
            topic: state.topic().to_string(),
            mode: state.mode(),
            verdict,
            approved,
            document,
            totals,
        })
    }

    fn totals(state: &RunState) -> ArtifactTotals {
        let records = state.history().all();
        let units = || records.iter().flat_map(|r| r.produced_units.iter());
        let scores = state.scores();

        let (final_score, best_score) = match state.mode() {
            RunMode::Refinement => (
                state.last_signal().and_then(|s| s.score()),
                scores.iter().copied().reduce(f64::max),
            ),
            RunMode::Research => (None, None),
        };

        ArtifactTotals {
            rounds_completed: state.round_index(),
            units_attempted: units().count(),
            units_succeeded: units().filter(|u| u.is_success()).count(),
            units_failed: units().filter(|u| !u.is_success()).count(),
            units_denied: records.iter().map(|r| r.denied.len()).sum(),
            duplicates_skipped: records.iter().map(|r| r.skipped_duplicates).sum(),
            malformed_rounds: records.iter().filter(|r| r.is_malformed()).count(),
            final_score,
            best_score,
            total_cost: units().filter_map(|u| u.cost).sum(),
            budget_used: state
                .budgets()
                .snapshot()
                .into_iter()
                .map(|(name, usage)| (name, usage.used))
                .collect(),
        }
    }

    // -------------------------------------------------------------------------
    // Documents
    // -------------------------------------------------------------------------

    fn header(out: &mut String, state: &RunState, verdict: Verdict, approved: bool) {
        let _ = writeln!(out, "# {}", state.topic());
        let _ = writeln!(out);
        let status = if approved {
            "approved"
        } else {
            "best-effort (did not meet the success criterion)"
        };
        let _ = writeln!(out, "- Mode: {}", state.mode());
        let _ = writeln!(out, "- Verdict: {verdict}");
        let _ = writeln!(out, "- Status: {status}");
        let _ = writeln!(out, "- Rounds: {}", state.round_index());
        let _ = writeln!(out);
    }

    fn research_document(&self, state: &RunState, verdict: Verdict, approved: bool) -> String {
        let mut out = String::new();
        Self::header(&mut out, state, verdict, approved);

        for record in state.history().all() {
            let _ = writeln!(out, "## Round {}: {}", record.index + 1, record.label);
            let _ = writeln!(out);
            Self::write_flags(&mut out, record);

            for unit in record
                .produced_units
                .iter()
                .filter(|u| u.kind == UnitKind::Query)
            {
                self.write_query(&mut out, unit);
            }
            for unit in record
                .produced_units
                .iter()
                .filter(|u| u.kind == UnitKind::DeepResearch)
            {
                if unit.is_success() {
                    let _ = writeln!(out, "### Deep research");
                    let _ = writeln!(out);
                    let _ = writeln!(out, "{}", unit.payload.trim());
                    let _ = writeln!(out);
                } else if self.include_failures {
                    let _ = writeln!(
                        out,
                        "### Deep research (failed: {})",
                        unit.error().unwrap_or("unknown")
                    );
                    let _ = writeln!(out);
                }
            }
        }
        out
    }

    fn write_query(&self, out: &mut String, unit: &WorkUnit) {
        if let Some(error) = unit.error() {
            if self.include_failures {
                let _ = writeln!(out, "### Q: {} (failed: {error})", unit.subject);
                let _ = writeln!(out);
            }
            return;
        }
        let _ = writeln!(out, "### Q: {}", unit.subject);
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", unit.payload.trim());
        let _ = writeln!(out);
        if !unit.sources.is_empty() {
            let _ = writeln!(out, "Sources:");
            for source in &unit.sources {
                let _ = writeln!(out, "- {source}");
            }
            let _ = writeln!(out);
        }
    }

    fn write_flags(out: &mut String, record: &RoundRecord) {
        for flag in &record.flags {
            let note = match flag {
                RoundFlag::MalformedOutput { origin } => {
                    format!("{origin} output was malformed; raw text kept")
                }
                RoundFlag::FallbackLabel { attempts } => {
                    format!("generic label used after {attempts} rejected proposals")
                }
                RoundFlag::LabelCollision { existing } => {
                    format!("label overlaps the earlier perspective '{existing}'")
                }
                RoundFlag::RoundTimedOut { abandoned } => {
                    format!("round deadline passed; {abandoned} calls abandoned")
                }
                RoundFlag::CritiqueSkipped => "critique skipped (budget exhausted)".to_string(),
                RoundFlag::CritiqueFailed { error } => format!("critique failed: {error}"),
            };
            let _ = writeln!(out, "> Note: {note}");
        }
        if !record.denied.is_empty() {
            let _ = writeln!(
                out,
                "> Note: {} units not dispatched (budget denied)",
                record.denied.len()
            );
        }
        if !record.flags.is_empty() || !record.denied.is_empty() {
            let _ = writeln!(out);
        }
    }

    fn refinement_document(
        &self,
        state: &RunState,
        verdict: Verdict,
        approved: bool,
        totals: &ArtifactTotals,
    ) -> String {
        let mut out = String::new();
        Self::header(&mut out, state, verdict, approved);

        let records = state.history().all();
        let final_draft = records
            .iter()
            .rev()
            .find_map(|r| r.last_success(UnitKind::Draft).map(|u| (r, u)));

        match final_draft {
            Some((record, unit)) => {
                let score = record
                    .critic_signal
                    .as_ref()
                    .map_or_else(|| "unscored".to_string(), |c| format!("score {}", c.score));
                let _ = writeln!(out, "## Final draft ({}, {score})", record.label);
                let _ = writeln!(out);
                let _ = writeln!(out, "{}", unit.payload.trim());
                let _ = writeln!(out);
            }
            None => {
                let _ = writeln!(out, "## Final draft");
                let _ = writeln!(out);
                let _ = writeln!(out, "_No draft was produced._");
                let _ = writeln!(out);
            }
        }

        let _ = writeln!(out, "## Revision history");
        let _ = writeln!(out);
        for record in records {
            let outcome = match (&record.critic_signal, record.last_success(UnitKind::Draft)) {
                (Some(signal), _) => format!("score {}", signal.score),
                (None, Some(_)) => "unscored".to_string(),
                (None, None) => "no draft".to_string(),
            };
            let _ = writeln!(out, "- {}: {outcome}", record.label);
            if let Some(signal) = &record.critic_signal {
                for issue in &signal.issues {
                    let _ = writeln!(out, "  - {issue}");
                }
            }
            if self.include_failures {
                for unit in record.produced_units.iter().filter(|u| !u.is_success()) {
                    let _ = writeln!(
                        out,
                        "  - {} failed: {}",
                        unit.kind,
                        unit.error().unwrap_or("unknown")
                    );
                }
            }
            if record.raw_critique.is_some() {
                let _ = writeln!(out, "  - critique could not be parsed; raw text kept");
            }
        }
        if let Some(best) = totals.best_score {
            let _ = writeln!(out);
            let _ = writeln!(out, "Best score: {best}");
        }
        out
    }
}
