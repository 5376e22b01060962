//! Cadence - bounded round-based research and refinement engine
//!
//! Cadence drives a producer/critic loop in discrete rounds. Each round fans
//! work out to external collaborators under a budget, folds the results into
//! an append-only history, and asks a convergence gate whether to continue.
//! Two modes share the engine: RESEARCH accumulates findings across distinct
//! perspectives, REFINEMENT drafts, critiques and redrafts until a quality
//! threshold is met or the budget runs out.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Run, round and artifact models, errors, collaborator ports
//! - **Service Layer** (`services`): Budget ledger, novelty guard, convergence gate, synthesis
//! - **Application Layer** (`application`): Round controller, bounded dispatch, pipeline host
//! - **Infrastructure Layer** (`infrastructure`): Config, logging, retry, HTTP collaborators, artifact store
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cadence::{ConfigLoader, Pipeline, RoundController};
//! use cadence::infrastructure::collaborators::HttpCollaborators;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let http = Arc::new(HttpCollaborators::from_config(&config.collaborators)?);
//!     let controller = RoundController::refinement(&config, http);
//!     let outcome = Pipeline::new(controller).execute("Write a product brief").await?;
//!     println!("{}", outcome.artifact.document);
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{Pipeline, RoundController, RunOutcome, UnitDispatcher};
pub use domain::errors::{BudgetDenied, CollaboratorError, EngineError, EngineResult};
pub use domain::models::{
    Config, CriticSignal, FinalArtifact, RoundFlag, RoundRecord, RunMode, Verdict, WorkUnit,
};
pub use domain::ports::{
    ArtifactStore, DeepResearchService, DraftContext, DraftService, PlanRequest, QueryAnswer,
    QueryService, ResearchReport, RoundPlanner,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    BudgetLedger, ConvergenceGate, NoveltyGuard, ResultSynthesizer, RoundAccumulator, RunState,
};
