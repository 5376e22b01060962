//! Collaborator ports.
//!
//! The engine only consumes structured signals from these traits; what a
//! planner, producer or critic actually says is opaque to it. Planner and
//! critic return raw text because their structured shape is validated by the
//! engine, which falls back to the raw text when validation fails.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{CollaboratorError, EngineResult};
use super::models::{CriticSignal, FinalArtifact};

/// Input to a perspective proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub topic: String,
    /// 1-based number of the round being planned.
    pub round: u32,
    /// Labels already explored in earlier rounds.
    pub covered: Vec<String>,
    /// Labels proposed for this round and rejected as near-duplicates.
    pub rejected: Vec<String>,
    /// Upper bound on the number of queries the round may dispatch.
    pub max_queries: usize,
}

/// Proposes the next exploration angle and its queries.
///
/// Expected output: `{"perspective": "...", "queries": ["...", ...]}`.
#[async_trait]
pub trait RoundPlanner: Send + Sync {
    async fn propose(&self, request: &PlanRequest) -> Result<String, CollaboratorError>;
}

/// One entry of a query-answering batch response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub query: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<String>,
    /// Per-query failure inside an otherwise successful batch.
    #[serde(default)]
    pub error: Option<String>,
}

/// Answers factual queries in batches, tolerating partial failure.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn answer_batch(&self, queries: &[String]) -> Result<Vec<QueryAnswer>, CollaboratorError>;
}

/// Result of a deep-research call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub report: String,
    #[serde(default)]
    pub cost: f64,
}

/// Single-shot, expensive long-form research.
#[async_trait]
pub trait DeepResearchService: Send + Sync {
    async fn research(&self, prompt: &str) -> Result<ResearchReport, CollaboratorError>;
}

/// Everything a draft or critique call needs to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftContext {
    pub topic: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub previous_draft: Option<String>,
    pub feedback: Option<CriticSignal>,
    /// Optional seed material (e.g. an earlier research artifact).
    pub material: Option<String>,
}

/// Produces drafts and critiques them (refinement mode).
///
/// Expected critique output: `{"score": 0-100, "issues": ["...", ...]}`.
#[async_trait]
pub trait DraftService: Send + Sync {
    async fn draft(&self, context: &DraftContext) -> Result<String, CollaboratorError>;

    async fn critique(
        &self,
        draft: &str,
        context: &DraftContext,
    ) -> Result<String, CollaboratorError>;
}

/// Durable write of a finished artifact, keyed by run identifier.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(&self, run_id: Uuid, topic: &str, artifact: &FinalArtifact) -> EngineResult<()>;
}
