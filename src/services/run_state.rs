//! The single mutable object of a run.
//!
//! Only the round controller mutates a [`RunState`]; every mutator is
//! crate-private and refuses to run once the state is terminal. Other
//! components read it through the public accessors.

use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{ControllerPhase, QualitySignal, RoundRecord, RunMode, Verdict};

use super::budget_ledger::BudgetLedger;
use super::round_accumulator::RoundAccumulator;

#[derive(Debug, Clone)]
pub struct RunState {
    run_id: Uuid,
    topic: String,
    mode: RunMode,
    round_index: u32,
    history: RoundAccumulator,
    budgets: BudgetLedger,
    last_signal: Option<QualitySignal>,
    terminal: bool,
    verdict: Option<Verdict>,
    phase: ControllerPhase,
    transitions: u32,
}

impl RunState {
    pub fn new(topic: impl Into<String>, mode: RunMode, budgets: BudgetLedger) -> Self {
        Self::with_run_id(Uuid::new_v4(), topic, mode, budgets)
    }

    pub fn with_run_id(
        run_id: Uuid,
        topic: impl Into<String>,
        mode: RunMode,
        budgets: BudgetLedger,
    ) -> Self {
        Self {
            run_id,
            topic: topic.into(),
            mode,
            round_index: 0,
            history: RoundAccumulator::new(),
            budgets,
            last_signal: None,
            terminal: false,
            verdict: None,
            phase: ControllerPhase::Init,
            transitions: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Read access
    // -------------------------------------------------------------------------

    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub const fn mode(&self) -> RunMode {
        self.mode
    }

    /// Number of completed rounds.
    pub const fn round_index(&self) -> u32 {
        self.round_index
    }

    pub const fn history(&self) -> &RoundAccumulator {
        &self.history
    }

    pub const fn budgets(&self) -> &BudgetLedger {
        &self.budgets
    }

    pub const fn last_signal(&self) -> Option<&QualitySignal> {
        self.last_signal.as_ref()
    }

    pub const fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub const fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    pub const fn phase(&self) -> ControllerPhase {
        self.phase
    }

    /// Number of state-machine transitions taken so far.
    pub const fn transitions(&self) -> u32 {
        self.transitions
    }

    /// Critic scores of every scored round, oldest first.
    pub fn scores(&self) -> Vec<f64> {
        self.history
            .all()
            .iter()
            .filter_map(|r| r.critic_signal.as_ref().map(|c| c.score))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Controller-only mutation
    // -------------------------------------------------------------------------

    fn ensure_live(&self, action: &str) -> EngineResult<()> {
        if self.terminal {
            return Err(EngineError::invariant(format!(
                "{action} attempted on terminal run {}",
                self.run_id
            )));
        }
        Ok(())
    }

    pub(crate) fn budgets_mut(&mut self) -> EngineResult<&mut BudgetLedger> {
        self.ensure_live("budget update")?;
        Ok(&mut self.budgets)
    }

    /// Move the state machine to `next`.
    pub(crate) fn advance(&mut self, next: ControllerPhase) -> EngineResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(EngineError::invariant(format!(
                "undefined transition {} -> {next}",
                self.phase
            )));
        }
        self.phase = next;
        self.transitions += 1;
        Ok(())
    }

    /// Append a completed round and advance the round counter.
    pub(crate) fn complete_round(
        &mut self,
        record: RoundRecord,
        signal: Option<QualitySignal>,
    ) -> EngineResult<()> {
        self.ensure_live("round append")?;
        if record.index != self.round_index {
            return Err(EngineError::invariant(format!(
                "round record index {} does not match round index {}",
                record.index, self.round_index
            )));
        }
        self.history.append(record)?;
        self.round_index += 1;
        if signal.is_some() {
            self.last_signal = signal;
        }
        if self.history.len() != self.round_index as usize {
            return Err(EngineError::invariant(format!(
                "history length {} diverged from round index {}",
                self.history.len(),
                self.round_index
            )));
        }
        Ok(())
    }

    /// Mark the run terminal with a stop verdict.
    pub(crate) fn finalize(&mut self, verdict: Verdict) -> EngineResult<()> {
        self.ensure_live("finalize")?;
        if !verdict.is_stop() {
            return Err(EngineError::invariant(
                "cannot finalize a run with a CONTINUE verdict",
            ));
        }
        if self.budgets.outstanding() > 0 {
            return Err(EngineError::invariant(format!(
                "{} reservations still outstanding at finalization",
                self.budgets.outstanding()
            )));
        }
        self.advance(ControllerPhase::Finalized)?;
        self.terminal = true;
        self.verdict = Some(verdict);
        Ok(())
    }
}
