//! Domain errors for the Cadence round engine.
//!
//! The taxonomy mirrors how failures are absorbed by the engine:
//! budget denials, collaborator failures and malformed output are recorded on
//! the round and never abort a run; an [`EngineError::InvariantViolation`] is a
//! contract breach inside the engine and always does.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a budget reservation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The resource has no configured cap.
    UnknownResource,
    /// The requested amount exceeds the remaining headroom.
    InsufficientHeadroom,
    /// A zero-sized reservation was requested.
    ZeroAmount,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownResource => write!(f, "unknown resource"),
            Self::InsufficientHeadroom => write!(f, "insufficient headroom"),
            Self::ZeroAmount => write!(f, "zero amount"),
        }
    }
}

/// A refused reservation against the budget ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("budget denied for '{resource}': requested {requested}, remaining {remaining} ({reason})")]
pub struct BudgetDenied {
    pub resource: String,
    pub requested: u64,
    pub remaining: u64,
    pub reason: DenialReason,
}

/// Failure reported by (or on behalf of) an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// Failure that may succeed on retry (rate limits, 5xx, network).
    #[error("transient collaborator failure: {0}")]
    Transient(String),

    /// Failure that will not succeed on retry (4xx, rejected input).
    #[error("permanent collaborator failure: {0}")]
    Permanent(String),

    /// The call did not complete within its deadline.
    #[error("collaborator call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The call was abandoned because the round deadline passed.
    #[error("collaborator call cancelled at round deadline")]
    Cancelled,
}

impl CollaboratorError {
    /// Returns true if this error is transient and should be retried
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }

    /// Returns true if this is a permanent error that should not be retried
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_) | Self::Cancelled)
    }
}

/// Engine-level errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    BudgetDenied(#[from] BudgetDenied),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Malformed output from {origin}: {detail}")]
    MalformedOutput { origin: String, detail: String },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Artifact store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Shorthand for an invariant violation.
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::InvariantViolation(detail.into())
    }

    /// True for errors that must abort the whole run.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvariantViolation(_) | Self::Configuration(_) | Self::Store(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}
