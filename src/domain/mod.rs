//! Domain layer for the Cadence round engine
//!
//! This module contains the run models, the error taxonomy and the
//! collaborator ports the engine is written against.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{BudgetDenied, CollaboratorError, DenialReason, EngineError, EngineResult};
