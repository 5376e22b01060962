//! Run-level enums shared by the engine components.

use serde::{Deserialize, Serialize};

/// Operating mode of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Accumulate research across distinct perspectives.
    #[default]
    Research,
    /// Draft, critique, redraft.
    Refinement,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Research => write!(f, "research"),
            Self::Refinement => write!(f, "refinement"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "research" => Ok(Self::Research),
            "refinement" => Ok(Self::Refinement),
            other => Err(format!(
                "Invalid mode: {other}. Must be one of: research, refinement"
            )),
        }
    }
}

/// Convergence verdict after a round (or before the first one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Continue,
    StopSuccess,
    StopExhausted,
}

impl Verdict {
    pub const fn is_stop(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "CONTINUE"),
            Self::StopSuccess => write!(f, "STOP_SUCCESS"),
            Self::StopExhausted => write!(f, "STOP_EXHAUSTED"),
        }
    }
}

/// The latest quality signal observed by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualitySignal {
    /// Critic score for a refinement attempt.
    Score {
        label: String,
        score: f64,
        issues: Vec<String>,
    },
    /// Coverage achieved by a research round.
    Coverage {
        label: String,
        succeeded: usize,
        attempted: usize,
    },
}

impl QualitySignal {
    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Score { score, .. } => Some(*score),
            Self::Coverage { .. } => None,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Score { label, .. } | Self::Coverage { label, .. } => label,
        }
    }
}

/// States of the round controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerPhase {
    Init,
    Selecting,
    Dispatching,
    Collecting,
    Scoring,
    Finalized,
}

impl ControllerPhase {
    /// Whether `self -> next` is a defined transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::Selecting)
                | (Self::Selecting, Self::Dispatching)
                | (Self::Selecting, Self::Finalized)
                | (Self::Dispatching, Self::Collecting)
                | (Self::Collecting, Self::Scoring)
                | (Self::Scoring, Self::Selecting)
                | (Self::Scoring, Self::Finalized)
        )
    }
}

impl std::fmt::Display for ControllerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Selecting => "SELECTING",
            Self::Dispatching => "DISPATCHING",
            Self::Collecting => "COLLECTING",
            Self::Scoring => "SCORING",
            Self::Finalized => "FINALIZED",
        };
        write!(f, "{name}")
    }
}
