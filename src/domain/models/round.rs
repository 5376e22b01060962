//! Round records and the work units they contain.

use serde::{Deserialize, Serialize};

use crate::domain::errors::{BudgetDenied, DenialReason};

/// What kind of producer call a unit represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// One factual query answered by the query service.
    Query,
    /// One deep-research report.
    DeepResearch,
    /// One draft attempt.
    Draft,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::DeepResearch => write!(f, "deep_research"),
            Self::Draft => write!(f, "draft"),
        }
    }
}

/// Outcome of a single unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitStatus {
    Succeeded,
    Failed { error: String },
}

/// The result of one producer call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Stable identifier, unique within a run (e.g. `r1-q04`).
    pub id: String,
    pub kind: UnitKind,
    /// Textual identifier of the ask: the query, the research prompt label,
    /// or the attempt label.
    pub subject: String,
    /// Textual result; empty for failed units.
    pub payload: String,
    #[serde(default)]
    pub sources: Vec<String>,
    pub status: UnitStatus,
    /// Number of calls made, including retries.
    pub attempts: u32,
    /// Collaborator-reported cost, when the collaborator reports one.
    #[serde(default)]
    pub cost: Option<f64>,
    /// Set when the collaborator output could not be parsed and the raw text
    /// was kept instead.
    #[serde(default)]
    pub malformed: bool,
}

impl WorkUnit {
    /// A successful unit.
    pub fn succeeded(
        id: impl Into<String>,
        kind: UnitKind,
        subject: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            subject: subject.into(),
            payload: payload.into(),
            sources: Vec::new(),
            status: UnitStatus::Succeeded,
            attempts: 1,
            cost: None,
            malformed: false,
        }
    }

    /// A failed unit carrying an error marker.
    pub fn failed(
        id: impl Into<String>,
        kind: UnitKind,
        subject: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            subject: subject.into(),
            payload: String::new(),
            sources: Vec::new(),
            status: UnitStatus::Failed {
                error: error.into(),
            },
            attempts: 1,
            cost: None,
            malformed: false,
        }
    }

    #[must_use]
    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    #[must_use]
    pub const fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    #[must_use]
    pub const fn flagged_malformed(mut self) -> Self {
        self.malformed = true;
        self
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.status, UnitStatus::Succeeded)
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            UnitStatus::Succeeded => None,
            UnitStatus::Failed { error } => Some(error),
        }
    }
}

/// Structured critic feedback attached to a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticSignal {
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// A unit that was never dispatched because its reservation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeniedUnit {
    pub unit_id: String,
    pub resource: String,
    pub reason: DenialReason,
}

impl DeniedUnit {
    pub fn from_denial(unit_id: impl Into<String>, denied: &BudgetDenied) -> Self {
        Self {
            unit_id: unit_id.into(),
            resource: denied.resource.clone(),
            reason: denied.reason.clone(),
        }
    }
}

/// Visibility markers for degraded rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum RoundFlag {
    /// Collaborator output failed to parse; raw text was kept.
    MalformedOutput { origin: String },
    /// Perspective selection gave up and used a generic label.
    FallbackLabel { attempts: u32 },
    /// Every fallback label was already covered; `existing` is the closest.
    LabelCollision { existing: String },
    /// The round deadline passed with calls still in flight.
    RoundTimedOut { abandoned: usize },
    /// The critic step was skipped because its budget was exhausted.
    CritiqueSkipped,
    /// The critic call failed after retries; the round has no score.
    CritiqueFailed { error: String },
}

/// Immutable record of one completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Equals the run's round index when the round was assembled.
    pub index: u32,
    pub label: String,
    pub produced_units: Vec<WorkUnit>,
    #[serde(default)]
    pub critic_signal: Option<CriticSignal>,
    /// Raw critic text kept when it could not be parsed.
    #[serde(default)]
    pub raw_critique: Option<String>,
    #[serde(default)]
    pub denied: Vec<DeniedUnit>,
    /// Planned queries dropped as near-duplicates of earlier ones.
    #[serde(default)]
    pub skipped_duplicates: usize,
    #[serde(default)]
    pub flags: Vec<RoundFlag>,
}

impl RoundRecord {
    pub fn new(index: u32, label: impl Into<String>) -> Self {
        Self {
            index,
            label: label.into(),
            produced_units: Vec::new(),
            critic_signal: None,
            raw_critique: None,
            denied: Vec::new(),
            skipped_duplicates: 0,
            flags: Vec::new(),
        }
    }

    pub fn units_attempted(&self) -> usize {
        self.produced_units.len()
    }

    pub fn units_succeeded(&self) -> usize {
        self.produced_units.iter().filter(|u| u.is_success()).count()
    }

    pub fn units_failed(&self) -> usize {
        self.units_attempted() - self.units_succeeded()
    }

    pub fn is_malformed(&self) -> bool {
        self.produced_units.iter().any(|u| u.malformed)
            || self
                .flags
                .iter()
                .any(|f| matches!(f, RoundFlag::MalformedOutput { .. }))
    }

    /// The last successful unit of the given kind.
    pub fn last_success(&self, kind: UnitKind) -> Option<&WorkUnit> {
        self.produced_units
            .iter()
            .rev()
            .find(|u| u.kind == kind && u.is_success())
    }
}
