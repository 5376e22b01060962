//! Engine components consulted by the round controller.
//!
//! Everything here is synchronous and owned by a single run; the only
//! concurrency boundary is the collaborator calls made by the controller.

pub mod budget_ledger;
pub mod convergence_gate;
pub mod novelty_guard;
pub mod output_parser;
pub mod result_synthesizer;
pub mod round_accumulator;
pub mod run_state;

pub use budget_ledger::{BudgetLedger, Reservation, ResourceUsage};
pub use convergence_gate::{ConvergenceGate, ConvergencePolicy, PlateauRule};
pub use novelty_guard::{is_novel, similarity, NoveltyCheck, NoveltyGuard};
pub use output_parser::{parse_critique, parse_plan, parse_structured, Parsed, PlanProposal};
pub use result_synthesizer::ResultSynthesizer;
pub use round_accumulator::RoundAccumulator;
pub use run_state::RunState;
