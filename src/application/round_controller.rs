//! RoundController - the run state machine
//!
//! Drives one run through `INIT -> SELECTING -> DISPATCHING -> COLLECTING ->
//! SCORING` rounds until the convergence gate returns a stop verdict, then
//! `FINALIZED`. Rounds are strictly sequential; only the collaborator calls
//! inside a round run concurrently (see [`UnitDispatcher`]).
//!
//! Failures are absorbed at the round level:
//! - denied reservations skip the unit and are recorded on the round
//! - collaborator errors become failed units after bounded retries
//! - malformed output keeps the raw text and flags the round
//!
//! Only invariant violations abort the run.

use std::sync::Arc;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{CollaboratorError, EngineError, EngineResult};
use crate::domain::models::{
    resources, Config, ControllerPhase, CriticSignal, DeniedUnit, QualitySignal, ResearchConfig,
    RoundFlag, RoundRecord, RunMode, UnitKind, WorkUnit,
};
use crate::domain::ports::{
    DeepResearchService, DraftContext, DraftService, PlanRequest, QueryAnswer, QueryService,
    ResearchReport, RoundPlanner,
};
use crate::services::{
    parse_critique, parse_plan, BudgetLedger, ConvergenceGate, NoveltyGuard, Parsed, Reservation,
    RunState,
};

use super::dispatch::{Job, JobOutcome, UnitDispatcher};

/// Generic angles used when the planner never proposes a novel perspective.
/// No two entries share a significant word, so each is novel against the
/// others.
const FALLBACK_ANGLES: &[&str] = &[
    "Historical background",
    "Key stakeholders",
    "Economic impact",
    "Regulatory environment",
    "Technology trends",
    "Risks and open problems",
    "Regional variation",
    "Future outlook",
    "Public perception",
    "Competitive dynamics",
    "Ethical considerations",
    "Case studies",
];

/// Collaborators wired for the selected mode.
enum Collaborators {
    Research {
        planner: Arc<dyn RoundPlanner>,
        queries: Arc<dyn QueryService>,
        deep: Option<Arc<dyn DeepResearchService>>,
    },
    Refinement {
        drafts: Arc<dyn DraftService>,
        material: Option<String>,
    },
}

/// Output of one research dispatch job.
enum Produced {
    Answers(Vec<QueryAnswer>),
    Report(ResearchReport),
}

/// Cross-round novelty state for a research run.
struct ResearchSession {
    labels: NoveltyGuard,
    queries: NoveltyGuard,
}

impl ResearchSession {
    fn new(config: &ResearchConfig) -> Self {
        Self {
            labels: NoveltyGuard::new(config.label_novelty_threshold),
            queries: NoveltyGuard::new(config.query_novelty_threshold),
        }
    }
}

/// Result of the SELECTING phase of a research round.
struct Selection {
    label: String,
    queries: Vec<String>,
}

/// A query that holds a reservation and will be dispatched.
#[derive(Clone)]
struct PlannedQuery {
    unit_id: String,
    query: String,
}

/// Drives a bounded sequence of rounds for one mode.
pub struct RoundController {
    mode: RunMode,
    config: Config,
    gate: ConvergenceGate,
    dispatcher: UnitDispatcher,
    collaborators: Collaborators,
}

impl RoundController {
    /// A research-mode controller. `deep` is optional: without it no
    /// deep-research unit is dispatched.
    pub fn research(
        config: &Config,
        planner: Arc<dyn RoundPlanner>,
        queries: Arc<dyn QueryService>,
        deep: Option<Arc<dyn DeepResearchService>>,
    ) -> Self {
        Self::build(
            config,
            RunMode::Research,
            Collaborators::Research {
                planner,
                queries,
                deep,
            },
        )
    }

    /// A refinement-mode controller.
    pub fn refinement(config: &Config, drafts: Arc<dyn DraftService>) -> Self {
        Self::build(
            config,
            RunMode::Refinement,
            Collaborators::Refinement {
                drafts,
                material: None,
            },
        )
    }

    /// Seed material handed to every draft call (refinement only).
    #[must_use]
    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        if let Collaborators::Refinement { material: slot, .. } = &mut self.collaborators {
            *slot = Some(material.into());
        }
        self
    }

    fn build(config: &Config, mode: RunMode, collaborators: Collaborators) -> Self {
        let mut config = config.clone();
        config.mode = mode;
        Self {
            mode,
            gate: ConvergenceGate::from_config(&config),
            dispatcher: UnitDispatcher::from_config(&config.dispatch, &config.retry),
            config,
            collaborators,
        }
    }

    pub const fn mode(&self) -> RunMode {
        self.mode
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Run to a stop verdict and return the terminal state.
    pub async fn run(&self, topic: &str) -> EngineResult<RunState> {
        self.run_with_id(Uuid::new_v4(), topic).await
    }

    #[instrument(skip(self), fields(mode = %self.mode))]
    pub async fn run_with_id(&self, run_id: Uuid, topic: &str) -> EngineResult<RunState> {
        let budgets = BudgetLedger::from_caps(&self.config.budgets);
        let mut state = RunState::with_run_id(run_id, topic, self.mode, budgets);
        let mut session = ResearchSession::new(&self.config.research);
        info!(%run_id, "run started");

        state.advance(ControllerPhase::Selecting)?;
        loop {
            let verdict = self.gate.evaluate(&state);
            if verdict.is_stop() {
                state.finalize(verdict)?;
                info!(
                    %run_id,
                    %verdict,
                    rounds = state.round_index(),
                    transitions = state.transitions(),
                    "run finalized"
                );
                return Ok(state);
            }
            if state.phase() == ControllerPhase::Scoring {
                state.advance(ControllerPhase::Selecting)?;
            }

            match &self.collaborators {
                Collaborators::Research {
                    planner,
                    queries,
                    deep,
                } => {
                    self.research_round(&mut state, &mut session, planner, queries, deep.as_ref())
                        .await?;
                }
                Collaborators::Refinement { drafts, material } => {
                    self.refinement_round(&mut state, drafts, material.as_deref())
                        .await?;
                }
            }
        }
    }

    // =========================================================================
    // Research rounds
    // =========================================================================

    #[instrument(skip_all, fields(round = state.round_index() + 1))]
    async fn research_round(
        &self,
        state: &mut RunState,
        session: &mut ResearchSession,
        planner: &Arc<dyn RoundPlanner>,
        queries: &Arc<dyn QueryService>,
        deep: Option<&Arc<dyn DeepResearchService>>,
    ) -> EngineResult<()> {
        let research = &self.config.research;
        let index = state.round_index();
        let round_no = index + 1;
        let deadline = self.dispatcher.round_deadline();

        // SELECTING
        let mut record = RoundRecord::new(index, String::new());
        let selection = self
            .select_perspective(state, session, &mut record, planner, deadline)
            .await?;
        record.label = selection.label;

        let mut holds: Vec<Reservation> = Vec::new();
        let mut planned: Vec<PlannedQuery> = Vec::new();
        let mut considered = 0usize;
        for query in selection.queries {
            if considered >= research.units_per_round {
                break;
            }
            if !session.queries.is_novel(&query) {
                record.skipped_duplicates += 1;
                debug!(query = %query, "skipping near-duplicate query");
                continue;
            }
            let unit_id = format!("r{round_no}-q{considered:02}");
            considered += 1;
            match state.budgets_mut()?.reserve(resources::UNIT_CALLS, 1) {
                Ok(hold) => {
                    session.queries.admit(&query);
                    holds.push(hold);
                    planned.push(PlannedQuery { unit_id, query });
                }
                Err(denied) => absorb(&mut record, &unit_id, denied.into())?,
            }
        }

        let batches: Vec<Vec<PlannedQuery>> = planned
            .chunks(research.batch_size.max(1))
            .map(<[PlannedQuery]>::to_vec)
            .collect();
        let mut jobs = Vec::with_capacity(batches.len() + 1);
        for (key, batch) in batches.iter().enumerate() {
            let service = Arc::clone(queries);
            let texts: Vec<String> = batch.iter().map(|p| p.query.clone()).collect();
            jobs.push(Job::new(key, move || {
                let service = Arc::clone(&service);
                let texts = texts.clone();
                async move { service.answer_batch(&texts).await.map(Produced::Answers) }.boxed()
            }));
        }

        let deep_id = format!("r{round_no}-deep");
        let mut deep_hold = None;
        if let Some(service) = deep.filter(|_| research.deep_research) {
            match state.budgets_mut()?.reserve(resources::DEEP_CALLS, 1) {
                Ok(hold) => {
                    deep_hold = Some(hold);
                    let service = Arc::clone(service);
                    let prompt = deep_prompt(state.topic(), &record.label, &planned);
                    jobs.push(Job::new(batches.len(), move || {
                        let service = Arc::clone(&service);
                        let prompt = prompt.clone();
                        async move { service.research(&prompt).await.map(Produced::Report) }
                            .boxed()
                    }));
                }
                Err(denied) => absorb(&mut record, &deep_id, denied.into())?,
            }
        }

        // DISPATCHING
        state.advance(ControllerPhase::Dispatching)?;
        info!(
            label = %record.label,
            queries = planned.len(),
            batches = batches.len(),
            deep = deep_hold.is_some(),
            "dispatching round"
        );
        let report = self.dispatcher.run_all(jobs, deadline).await;

        // COLLECTING
        state.advance(ControllerPhase::Collecting)?;
        if report.timed_out() {
            record.flags.push(RoundFlag::RoundTimedOut {
                abandoned: report.abandoned,
            });
        }
        for outcome in report.outcomes {
            match (batches.get(outcome.key), outcome.result) {
                (Some(batch), Ok(Produced::Answers(answers))) => {
                    record
                        .produced_units
                        .extend(collect_answers(batch, &answers, outcome.attempts));
                }
                (Some(batch), Err(err)) => {
                    warn!(error = %err, units = batch.len(), "query batch failed");
                    record.produced_units.extend(batch.iter().map(|p| {
                        WorkUnit::failed(&p.unit_id, UnitKind::Query, &p.query, err.to_string())
                            .with_attempts(outcome.attempts)
                    }));
                }
                (None, Ok(Produced::Report(deep_report))) => {
                    record.produced_units.push(
                        WorkUnit::succeeded(&deep_id, UnitKind::DeepResearch, &record.label, deep_report.report)
                            .with_attempts(outcome.attempts)
                            .with_cost(deep_report.cost),
                    );
                }
                (None, Err(err)) => {
                    warn!(error = %err, "deep research failed");
                    record.produced_units.push(
                        WorkUnit::failed(&deep_id, UnitKind::DeepResearch, &record.label, err.to_string())
                            .with_attempts(outcome.attempts),
                    );
                }
                (_, Ok(_)) => {
                    return Err(EngineError::invariant(format!(
                        "dispatch result {} routed to the wrong unit kind",
                        outcome.key
                    )));
                }
            }
        }

        // SCORING
        state.advance(ControllerPhase::Scoring)?;
        let ledger = state.budgets_mut()?;
        for hold in holds.into_iter().chain(deep_hold) {
            ledger.commit(hold)?;
        }

        let signal = QualitySignal::Coverage {
            label: record.label.clone(),
            succeeded: record.units_succeeded(),
            attempted: record.units_attempted(),
        };
        info!(
            label = %record.label,
            succeeded = record.units_succeeded(),
            failed = record.units_failed(),
            denied = record.denied.len(),
            skipped = record.skipped_duplicates,
            "round complete"
        );
        state.complete_round(record, Some(signal))
    }

    /// Ask the planner for a perspective not yet covered. After
    /// `max_selection_attempts` rejected or failed proposals a generic label
    /// is used instead.
    async fn select_perspective(
        &self,
        state: &RunState,
        session: &mut ResearchSession,
        record: &mut RoundRecord,
        planner: &Arc<dyn RoundPlanner>,
        deadline: Instant,
    ) -> EngineResult<Selection> {
        let research = &self.config.research;
        let round_no = state.round_index() + 1;
        let plan_id = format!("r{round_no}-plan");
        let mut rejected: Vec<String> = Vec::new();
        let mut last_queries = Vec::new();

        for attempt in 1..=research.max_selection_attempts {
            let request = PlanRequest {
                topic: state.topic().to_string(),
                round: round_no,
                covered: session.labels.history().map(str::to_string).collect(),
                rejected: rejected.clone(),
                max_queries: research.units_per_round,
            };
            let planner = Arc::clone(planner);
            let job = Job::new(0, move || {
                let planner = Arc::clone(&planner);
                let request = request.clone();
                async move { planner.propose(&request).await }.boxed()
            });

            let output = match self.dispatcher.run_one(job, deadline).await.result {
                Ok(output) => output,
                Err(err) => {
                    warn!(attempt, error = %err, "planner call failed");
                    continue;
                }
            };

            let (plan, malformed) = parse_plan(&output);
            if let Some(detail) = malformed {
                let err = EngineError::MalformedOutput {
                    origin: "planner".to_string(),
                    detail,
                };
                absorb(record, &plan_id, err)?;
            }
            if plan.perspective.is_empty() {
                continue;
            }

            let check = session.labels.check(&plan.perspective);
            if check.novel {
                session.labels.admit(&plan.perspective);
                debug!(attempt, label = %plan.perspective, "perspective accepted");
                return Ok(Selection {
                    label: plan.perspective,
                    queries: plan.queries,
                });
            }
            debug!(
                attempt,
                label = %plan.perspective,
                closest = ?check.closest,
                "perspective already covered"
            );
            last_queries = plan.queries;
            rejected.push(plan.perspective);
        }

        record.flags.push(RoundFlag::FallbackLabel {
            attempts: research.max_selection_attempts,
        });
        let label = match FALLBACK_ANGLES
            .iter()
            .find(|angle| session.labels.check(angle).novel)
        {
            Some(angle) => (*angle).to_string(),
            None => {
                let label = format!("General perspective (round {round_no})");
                let check = session.labels.check(&label);
                if let (false, Some((existing, _))) = (check.novel, check.closest) {
                    record.flags.push(RoundFlag::LabelCollision { existing });
                }
                label
            }
        };
        warn!(
            attempts = research.max_selection_attempts,
            label = %label,
            "no novel perspective proposed, using fallback label"
        );
        session.labels.admit(&label);
        let queries = if last_queries.is_empty() {
            vec![format!("{}: {label}", state.topic())]
        } else {
            last_queries
        };
        Ok(Selection { label, queries })
    }

    // =========================================================================
    // Refinement rounds
    // =========================================================================

    #[instrument(skip_all, fields(round = state.round_index() + 1))]
    async fn refinement_round(
        &self,
        state: &mut RunState,
        drafts: &Arc<dyn DraftService>,
        material: Option<&str>,
    ) -> EngineResult<()> {
        let index = state.round_index();
        let attempt = index + 1;
        let deadline = self.dispatcher.round_deadline();
        let label = format!("attempt {attempt}");
        let draft_id = format!("r{attempt}-draft");
        let mut record = RoundRecord::new(index, label.clone());

        // SELECTING: build on the previous draft and the feedback on that draft
        let previous = state
            .history()
            .all()
            .iter()
            .rev()
            .find_map(|r| r.last_success(UnitKind::Draft).map(|u| (r, u)));
        let context = DraftContext {
            topic: state.topic().to_string(),
            attempt,
            previous_draft: previous.map(|(_, unit)| unit.payload.clone()),
            feedback: previous.and_then(|(record, _)| record.critic_signal.clone()),
            material: material.map(str::to_string),
        };

        let draft_hold = match state.budgets_mut()?.reserve(resources::DRAFT_CALLS, 1) {
            Ok(hold) => Some(hold),
            Err(denied) => {
                absorb(&mut record, &draft_id, denied.into())?;
                None
            }
        };

        // DISPATCHING
        state.advance(ControllerPhase::Dispatching)?;
        let outcome = if draft_hold.is_some() {
            let service = Arc::clone(drafts);
            let ctx = context.clone();
            let job = Job::new(0, move || {
                let service = Arc::clone(&service);
                let ctx = ctx.clone();
                async move { service.draft(&ctx).await }.boxed()
            });
            Some(self.dispatcher.run_one(job, deadline).await)
        } else {
            None
        };

        // COLLECTING
        state.advance(ControllerPhase::Collecting)?;
        let draft = match outcome {
            Some(JobOutcome {
                result: Ok(text),
                attempts,
                ..
            }) if !text.trim().is_empty() => {
                record.produced_units.push(
                    WorkUnit::succeeded(&draft_id, UnitKind::Draft, &label, text.clone())
                        .with_attempts(attempts),
                );
                Some(text)
            }
            Some(JobOutcome {
                result, attempts, ..
            }) => {
                let error = match result {
                    Ok(_) => "empty draft".to_string(),
                    Err(CollaboratorError::Cancelled) => {
                        record
                            .flags
                            .push(RoundFlag::RoundTimedOut { abandoned: 1 });
                        CollaboratorError::Cancelled.to_string()
                    }
                    Err(err) => err.to_string(),
                };
                warn!(unit_id = %draft_id, error = %error, "draft failed");
                record.produced_units.push(
                    WorkUnit::failed(&draft_id, UnitKind::Draft, &label, error)
                        .with_attempts(attempts),
                );
                None
            }
            None => None,
        };

        // SCORING: the critic step depends on the draft, so it runs after it
        state.advance(ControllerPhase::Scoring)?;
        if let Some(hold) = draft_hold {
            state.budgets_mut()?.commit(hold)?;
        }
        let signal = match draft {
            Some(text) => {
                self.critique(state, &mut record, drafts, text, context, deadline)
                    .await?
            }
            None => None,
        };

        info!(
            label = %label,
            score = ?signal.as_ref().and_then(QualitySignal::score),
            "round complete"
        );
        state.complete_round(record, signal)
    }

    async fn critique(
        &self,
        state: &mut RunState,
        record: &mut RoundRecord,
        drafts: &Arc<dyn DraftService>,
        draft: String,
        context: DraftContext,
        deadline: Instant,
    ) -> EngineResult<Option<QualitySignal>> {
        let critique_id = format!("r{}-critique", record.index + 1);
        let mut hold = None;
        if state.budgets().contains(resources::CRITIQUE_CALLS) {
            match state.budgets_mut()?.reserve(resources::CRITIQUE_CALLS, 1) {
                Ok(h) => hold = Some(h),
                Err(denied) => {
                    absorb(record, &critique_id, denied.into())?;
                    record.flags.push(RoundFlag::CritiqueSkipped);
                    return Ok(None);
                }
            }
        }

        let service = Arc::clone(drafts);
        let job = Job::new(0, move || {
            let service = Arc::clone(&service);
            let draft = draft.clone();
            let context = context.clone();
            async move { service.critique(&draft, &context).await }.boxed()
        });
        let outcome = self.dispatcher.run_one(job, deadline).await;
        if let Some(hold) = hold {
            state.budgets_mut()?.commit(hold)?;
        }

        let text = match outcome.result {
            Ok(text) => text,
            Err(err) => {
                absorb(record, &critique_id, err.into())?;
                return Ok(None);
            }
        };

        match parse_critique(&text, self.config.refinement.score_scale) {
            Parsed::Structured(CriticSignal { score, issues }) => {
                record.critic_signal = Some(CriticSignal {
                    score,
                    issues: issues.clone(),
                });
                Ok(Some(QualitySignal::Score {
                    label: record.label.clone(),
                    score,
                    issues,
                }))
            }
            Parsed::Raw { text, reason } => {
                record.raw_critique = Some(text);
                let err = EngineError::MalformedOutput {
                    origin: "critic".to_string(),
                    detail: reason,
                };
                absorb(record, &critique_id, err)?;
                Ok(None)
            }
        }
    }
}

/// Record a non-fatal error on the round it happened in. Fatal errors are
/// handed back to abort the run.
///
/// A collaborator error reaching this point belongs to the critique: every
/// other collaborator call produces a failed work unit instead.
fn absorb(record: &mut RoundRecord, unit_id: &str, err: EngineError) -> EngineResult<()> {
    if err.is_fatal() {
        return Err(err);
    }
    warn!(unit_id, error = %err, "round error absorbed");
    match err {
        EngineError::BudgetDenied(denied) => {
            record.denied.push(DeniedUnit::from_denial(unit_id, &denied));
        }
        EngineError::MalformedOutput { origin, .. } => {
            let flag = RoundFlag::MalformedOutput { origin };
            if !record.flags.contains(&flag) {
                record.flags.push(flag);
            }
        }
        EngineError::Collaborator(err) => {
            record.flags.push(RoundFlag::CritiqueFailed {
                error: err.to_string(),
            });
        }
        other => {
            return Err(EngineError::invariant(format!(
                "unexpected non-fatal error: {other}"
            )));
        }
    }
    Ok(())
}

/// Turn one batch response into units, matching answers to queries by text
/// and falling back to position when the response has the batch's length.
fn collect_answers(batch: &[PlannedQuery], answers: &[QueryAnswer], attempts: u32) -> Vec<WorkUnit> {
    let positional = answers.len() == batch.len();
    batch
        .iter()
        .enumerate()
        .map(|(i, planned)| {
            let answer = answers
                .iter()
                .find(|a| a.query.trim() == planned.query.trim())
                .or_else(|| answers.get(i).filter(|_| positional));
            let unit = match answer {
                Some(QueryAnswer {
                    error: Some(error), ..
                }) => WorkUnit::failed(&planned.unit_id, UnitKind::Query, &planned.query, error),
                Some(a) if a.answer.trim().is_empty() => {
                    WorkUnit::failed(&planned.unit_id, UnitKind::Query, &planned.query, "empty answer")
                }
                Some(a) => WorkUnit::succeeded(
                    &planned.unit_id,
                    UnitKind::Query,
                    &planned.query,
                    a.answer.clone(),
                )
                .with_sources(a.sources.clone()),
                None => {
                    warn!(unit_id = %planned.unit_id, "answer missing from batch response");
                    WorkUnit::failed(
                        &planned.unit_id,
                        UnitKind::Query,
                        &planned.query,
                        "no answer returned for query",
                    )
                    .flagged_malformed()
                }
            };
            unit.with_attempts(attempts)
        })
        .collect()
}

fn deep_prompt(topic: &str, label: &str, planned: &[PlannedQuery]) -> String {
    let mut prompt = format!("{topic}\n\nPerspective: {label}\n");
    if !planned.is_empty() {
        prompt.push_str("\nQuestions:\n");
        for p in planned {
            prompt.push_str("- ");
            prompt.push_str(&p.query);
            prompt.push('\n');
        }
    }
    prompt
}
