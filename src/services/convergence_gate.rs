//! Stop/continue decisions.
//!
//! Both policies are pure functions of [`RunState`]: no clock, no randomness.
//!
//! | Mode       | STOP_SUCCESS                        | STOP_EXHAUSTED                                                  |
//! |------------|-------------------------------------|-----------------------------------------------------------------|
//! | Refinement | last score >= `success_threshold`   | `round_index >= max_iterations`, required budget empty, plateau |
//! | Research   | `round_index >= target_rounds` (>0) | `target_rounds == 0`, required budget empty                     |

use serde::{Deserialize, Serialize};

use crate::domain::models::{Config, RunMode, Verdict};

use super::run_state::RunState;

/// Stop when the best score has not improved by more than `min_delta`
/// across the last `rounds` scored rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauRule {
    pub rounds: u32,
    pub min_delta: f64,
}

/// Convergence detection policy, selected by mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConvergencePolicy {
    /// Draft/critique loop: quality threshold with an iteration cap.
    Refinement {
        success_threshold: f64,
        max_iterations: u32,
        required_resources: Vec<String>,
        plateau: Option<PlateauRule>,
    },
    /// Research accumulation: a fixed number of rounds decided up front.
    Research {
        target_rounds: u32,
        required_resources: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct ConvergenceGate {
    policy: ConvergencePolicy,
}

impl ConvergenceGate {
    pub const fn new(policy: ConvergencePolicy) -> Self {
        Self { policy }
    }

    /// Build the policy for `config.mode`.
    pub fn from_config(config: &Config) -> Self {
        let required_resources = Config::required_resources(config.mode);
        let policy = match config.mode {
            RunMode::Refinement => ConvergencePolicy::Refinement {
                success_threshold: config.refinement.success_threshold,
                max_iterations: config.refinement.max_iterations,
                required_resources,
                plateau: config.refinement.plateau_rounds.map(|rounds| PlateauRule {
                    rounds,
                    min_delta: config.refinement.plateau_min_delta,
                }),
            },
            RunMode::Research => ConvergencePolicy::Research {
                target_rounds: config.research.target_rounds,
                required_resources,
            },
        };
        Self::new(policy)
    }

    pub const fn policy(&self) -> &ConvergencePolicy {
        &self.policy
    }

    pub fn evaluate(&self, state: &RunState) -> Verdict {
        match &self.policy {
            ConvergencePolicy::Refinement {
                success_threshold,
                max_iterations,
                required_resources,
                plateau,
            } => {
                if state
                    .last_signal()
                    .and_then(|s| s.score())
                    .is_some_and(|score| score >= *success_threshold)
                {
                    return Verdict::StopSuccess;
                }
                if state.round_index() >= *max_iterations
                    || any_exhausted(state, required_resources)
                {
                    return Verdict::StopExhausted;
                }
                if let Some(rule) = plateau {
                    if has_plateaued(&state.scores(), rule) {
                        return Verdict::StopExhausted;
                    }
                }
                Verdict::Continue
            }
            ConvergencePolicy::Research {
                target_rounds,
                required_resources,
            } => {
                let completed = state.round_index();
                if *target_rounds == 0 {
                    return Verdict::StopExhausted;
                }
                if completed >= *target_rounds {
                    return Verdict::StopSuccess;
                }
                if any_exhausted(state, required_resources) {
                    return Verdict::StopExhausted;
                }
                Verdict::Continue
            }
        }
    }
}

fn any_exhausted(state: &RunState, resources: &[String]) -> bool {
    resources.iter().any(|r| state.budgets().remaining(r) == 0)
}

fn has_plateaued(scores: &[f64], rule: &PlateauRule) -> bool {
    let window = rule.rounds as usize;
    if window == 0 || scores.len() <= window {
        return false;
    }
    let (earlier, recent) = scores.split_at(scores.len() - window);
    let best_before = earlier.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let best_recent = recent.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    best_recent - best_before <= rule.min_delta
}
