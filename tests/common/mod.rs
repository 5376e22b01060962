//! Common test utilities for integration tests
//!
//! Scripted collaborators and config builders shared by the run tests.
//! Every stub is deterministic: outputs depend only on the request and the
//! call count.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use cadence::domain::errors::CollaboratorError;
use cadence::domain::models::{resources, Config, RunMode};
use cadence::domain::ports::{
    DeepResearchService, DraftContext, DraftService, PlanRequest, QueryAnswer, QueryService,
    ResearchReport, RoundPlanner,
};

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Config with fast retries and the given budgets.
pub fn test_config(mode: RunMode, budgets: &[(&str, u64)]) -> Config {
    let mut config = Config {
        mode,
        ..Config::default()
    };
    config.budgets = budgets
        .iter()
        .map(|(name, cap)| ((*name).to_string(), *cap))
        .collect::<BTreeMap<_, _>>();
    config.research.deep_research = false;
    config.retry.max_retries = 1;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config.dispatch.unit_timeout_ms = 2_000;
    config.dispatch.round_timeout_ms = 10_000;
    config
}

pub fn research_config(unit_calls: u64) -> Config {
    test_config(RunMode::Research, &[(resources::UNIT_CALLS, unit_calls)])
}

pub fn refinement_config(draft_calls: u64, critique_calls: u64) -> Config {
    test_config(
        RunMode::Refinement,
        &[
            (resources::DRAFT_CALLS, draft_calls),
            (resources::CRITIQUE_CALLS, critique_calls),
        ],
    )
}

pub fn plan_json(label: &str, queries: &[String]) -> String {
    serde_json::json!({ "perspective": label, "queries": queries }).to_string()
}

// ============================================================================
// Planners
// ============================================================================

/// Proposes `labels[round - 1]` (the last label once the list runs out) with
/// `queries_per_round` distinct queries.
pub struct LabelPlanner {
    labels: Vec<String>,
    queries_per_round: usize,
    calls: AtomicUsize,
}

impl LabelPlanner {
    pub fn new(labels: &[&str], queries_per_round: usize) -> Self {
        Self {
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
            queries_per_round,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoundPlanner for LabelPlanner {
    async fn propose(&self, request: &PlanRequest) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let idx = (request.round as usize - 1).min(self.labels.len() - 1);
        let queries: Vec<String> = (0..self.queries_per_round)
            .map(|i| format!("round{} item{i}", request.round))
            .collect();
        Ok(plan_json(&self.labels[idx], &queries))
    }
}

/// Always returns the same text.
pub struct FixedPlanner(pub String);

#[async_trait]
impl RoundPlanner for FixedPlanner {
    async fn propose(&self, _request: &PlanRequest) -> Result<String, CollaboratorError> {
        Ok(self.0.clone())
    }
}

/// Fails every proposal with the same error.
pub struct FailingPlanner {
    error: CollaboratorError,
    calls: AtomicUsize,
}

impl FailingPlanner {
    pub fn new(error: CollaboratorError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoundPlanner for FailingPlanner {
    async fn propose(&self, _request: &PlanRequest) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

// ============================================================================
// Query answering
// ============================================================================

/// Answers every query with `answer to <query>`. Batches containing a query
/// listed in `failing` fail permanently.
#[derive(Default)]
pub struct EchoQueryService {
    failing: Vec<String>,
    delay: Option<Duration>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl EchoQueryService {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_on(mut self, query: &str) -> Self {
        self.failing.push(query.to_string());
        self
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryService for EchoQueryService {
    async fn answer_batch(&self, queries: &[String]) -> Result<Vec<QueryAnswer>, CollaboratorError> {
        self.batches.lock().unwrap().push(queries.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if queries.iter().any(|q| self.failing.contains(q)) {
            return Err(CollaboratorError::Permanent("HTTP 400: rejected".to_string()));
        }
        Ok(queries
            .iter()
            .map(|q| QueryAnswer {
                query: q.clone(),
                answer: format!("answer to {q}"),
                sources: vec![format!("https://example.org/{}", q.replace(' ', "-"))],
                error: None,
            })
            .collect())
    }
}

/// Returns a fixed report with a fixed cost.
pub struct StubDeepResearch {
    pub cost: f64,
    pub prompts: Mutex<Vec<String>>,
}

impl StubDeepResearch {
    pub fn new(cost: f64) -> Self {
        Self {
            cost,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DeepResearchService for StubDeepResearch {
    async fn research(&self, prompt: &str) -> Result<ResearchReport, CollaboratorError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(ResearchReport {
            report: "Long-form report".to_string(),
            cost: self.cost,
        })
    }
}

// ============================================================================
// Drafting
// ============================================================================

/// Drafts `draft <attempt>` and critiques with `scores[attempt - 1]` (the
/// last score once the list runs out). A `raw_critique` replaces the JSON
/// critique entirely.
///
/// `failing_drafts` and `failing_critiques` list the attempts whose call
/// fails with the configured error.
pub struct ScriptedDrafter {
    scores: Vec<f64>,
    raw_critique: Option<String>,
    failing_drafts: Vec<u32>,
    failing_critiques: Vec<u32>,
    error: CollaboratorError,
    draft_delay: Option<Duration>,
    contexts: Mutex<Vec<DraftContext>>,
    critiques: AtomicUsize,
}

impl ScriptedDrafter {
    pub fn scoring(scores: &[f64]) -> Self {
        Self {
            scores: scores.to_vec(),
            raw_critique: None,
            failing_drafts: Vec::new(),
            failing_critiques: Vec::new(),
            error: CollaboratorError::Permanent("HTTP 400: rejected".to_string()),
            draft_delay: None,
            contexts: Mutex::new(Vec::new()),
            critiques: AtomicUsize::new(0),
        }
    }

    pub fn raw(critique: &str) -> Self {
        Self {
            raw_critique: Some(critique.to_string()),
            ..Self::scoring(&[0.0])
        }
    }

    #[must_use]
    pub fn failing_draft(mut self, attempt: u32) -> Self {
        self.failing_drafts.push(attempt);
        self
    }

    #[must_use]
    pub fn failing_critique(mut self, attempt: u32) -> Self {
        self.failing_critiques.push(attempt);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: CollaboratorError) -> Self {
        self.error = error;
        self
    }

    #[must_use]
    pub const fn with_draft_delay(mut self, delay: Duration) -> Self {
        self.draft_delay = Some(delay);
        self
    }

    pub fn contexts(&self) -> Vec<DraftContext> {
        self.contexts.lock().unwrap().clone()
    }

    pub fn critiques(&self) -> usize {
        self.critiques.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DraftService for ScriptedDrafter {
    async fn draft(&self, context: &DraftContext) -> Result<String, CollaboratorError> {
        self.contexts.lock().unwrap().push(context.clone());
        if let Some(delay) = self.draft_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_drafts.contains(&context.attempt) {
            return Err(self.error.clone());
        }
        Ok(format!("draft {}", context.attempt))
    }

    async fn critique(
        &self,
        _draft: &str,
        context: &DraftContext,
    ) -> Result<String, CollaboratorError> {
        self.critiques.fetch_add(1, Ordering::SeqCst);
        if self.failing_critiques.contains(&context.attempt) {
            return Err(self.error.clone());
        }
        if let Some(raw) = &self.raw_critique {
            return Ok(raw.clone());
        }
        let idx = (context.attempt as usize - 1).min(self.scores.len() - 1);
        Ok(serde_json::json!({
            "score": self.scores[idx],
            "issues": [format!("issue in attempt {}", context.attempt)],
        })
        .to_string())
    }
}

pub fn arc<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
