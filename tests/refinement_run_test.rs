//! Integration tests for refinement-mode runs.

mod common;

use std::time::{Duration, Instant};

use cadence::domain::errors::CollaboratorError;
use cadence::domain::models::{resources, RoundFlag, UnitKind, Verdict};
use cadence::{Pipeline, RoundController};

use common::{arc, refinement_config, ScriptedDrafter};

#[tokio::test]
async fn test_unmet_threshold_runs_to_iteration_cap() {
    let config = refinement_config(4, 4);
    let drafter = arc(ScriptedDrafter::scoring(&[80.0]));

    let controller = RoundController::refinement(&config, drafter.clone());
    let outcome = Pipeline::new(controller)
        .execute("Write a product brief")
        .await
        .unwrap();

    let state = &outcome.state;
    assert_eq!(state.verdict(), Some(Verdict::StopExhausted));
    assert_eq!(state.history().len(), 4);
    assert_eq!(state.scores(), vec![80.0; 4]);
    assert_eq!(state.budgets().used(resources::DRAFT_CALLS), 4);
    assert_eq!(state.budgets().used(resources::CRITIQUE_CALLS), 4);

    assert!(!outcome.artifact.approved);
    assert!(outcome.artifact.is_best_effort());
    assert_eq!(outcome.artifact.totals.final_score, Some(80.0));
    assert!(outcome.artifact.document.contains("draft 4"));
}

#[tokio::test]
async fn test_threshold_met_on_first_attempt() {
    let mut config = refinement_config(4, 4);
    config.refinement.success_threshold = 0.0;
    let drafter = arc(ScriptedDrafter::scoring(&[80.0]));

    let controller = RoundController::refinement(&config, drafter.clone());
    let state = controller.run("Write a product brief").await.unwrap();

    assert_eq!(state.verdict(), Some(Verdict::StopSuccess));
    assert_eq!(state.round_index(), 1);
    assert_eq!(drafter.critiques(), 1);
}

#[tokio::test]
async fn test_success_after_improvement() {
    let config = refinement_config(4, 4);
    let drafter = arc(ScriptedDrafter::scoring(&[70.0, 88.0, 96.0]));

    let controller = RoundController::refinement(&config, drafter.clone());
    let state = controller.run("Write a product brief").await.unwrap();

    assert_eq!(state.verdict(), Some(Verdict::StopSuccess));
    assert_eq!(state.scores(), vec![70.0, 88.0, 96.0]);

    // Each redraft sees the previous draft and its critique
    let contexts = drafter.contexts();
    assert_eq!(contexts.len(), 3);
    assert!(contexts[0].previous_draft.is_none());
    assert_eq!(contexts[1].previous_draft.as_deref(), Some("draft 1"));
    assert_eq!(contexts[2].feedback.as_ref().map(|f| f.score), Some(88.0));

    let ids: Vec<String> = state
        .history()
        .all()
        .iter()
        .filter_map(|r| r.last_success(UnitKind::Draft))
        .map(|u| u.id.clone())
        .collect();
    assert_eq!(ids, vec!["r1-draft", "r2-draft", "r3-draft"]);
}

#[tokio::test]
async fn test_malformed_critique_keeps_raw_text() {
    let mut config = refinement_config(2, 2);
    config.refinement.max_iterations = 2;
    let drafter = arc(ScriptedDrafter::raw("Looks decent, maybe 7/10."));

    let controller = RoundController::refinement(&config, drafter);
    let state = controller.run("Write a product brief").await.unwrap();

    assert_eq!(state.verdict(), Some(Verdict::StopExhausted));
    let first = &state.history().all()[0];
    assert!(first.critic_signal.is_none());
    assert_eq!(
        first.raw_critique.as_deref(),
        Some("Looks decent, maybe 7/10.")
    );
    assert!(first.flags.contains(&RoundFlag::MalformedOutput {
        origin: "critic".to_string()
    }));
    assert!(state.scores().is_empty());
}

#[tokio::test]
async fn test_plateau_stops_early() {
    let mut config = refinement_config(10, 10);
    config.refinement.max_iterations = 10;
    config.refinement.plateau_rounds = Some(2);
    config.refinement.plateau_min_delta = 1.0;
    let drafter = arc(ScriptedDrafter::scoring(&[50.0, 60.0, 60.0, 60.5]));

    let controller = RoundController::refinement(&config, drafter);
    let state = controller.run("Write a product brief").await.unwrap();

    assert_eq!(state.verdict(), Some(Verdict::StopExhausted));
    assert_eq!(state.round_index(), 4);
}

#[tokio::test]
async fn test_exhausted_critique_budget_skips_scoring() {
    let config = refinement_config(3, 1);
    let drafter = arc(ScriptedDrafter::scoring(&[80.0]));

    let controller = RoundController::refinement(&config, drafter.clone());
    let state = controller.run("Write a product brief").await.unwrap();

    assert_eq!(state.verdict(), Some(Verdict::StopExhausted));
    assert_eq!(state.history().len(), 3);
    assert_eq!(drafter.critiques(), 1);

    let second = &state.history().all()[1];
    assert!(second.flags.contains(&RoundFlag::CritiqueSkipped));
    assert_eq!(second.denied.len(), 1);
    assert_eq!(second.denied[0].unit_id, "r2-critique");
    // The draft itself still counts
    assert_eq!(second.units_succeeded(), 1);
    assert_eq!(state.budgets().used(resources::CRITIQUE_CALLS), 1);
}

#[tokio::test]
async fn test_seed_material_reaches_every_draft() {
    let mut config = refinement_config(2, 2);
    config.refinement.max_iterations = 2;
    let drafter = arc(ScriptedDrafter::scoring(&[10.0]));

    let controller = RoundController::refinement(&config, drafter.clone())
        .with_material("Findings from an earlier research run");
    controller.run("Write a product brief").await.unwrap();

    assert!(drafter
        .contexts()
        .iter()
        .all(|c| c.material.as_deref() == Some("Findings from an earlier research run")));
}

#[tokio::test]
async fn test_failed_draft_spends_budget_and_skips_critique() {
    let config = refinement_config(4, 4);
    let drafter = arc(ScriptedDrafter::scoring(&[96.0]).failing_draft(1));

    let controller = RoundController::refinement(&config, drafter.clone());
    let state = controller.run("Write a product brief").await.unwrap();

    assert_eq!(state.verdict(), Some(Verdict::StopSuccess));
    assert_eq!(state.round_index(), 2);
    assert_eq!(state.budgets().used(resources::DRAFT_CALLS), 2);
    assert_eq!(state.budgets().used(resources::CRITIQUE_CALLS), 1);
    assert_eq!(drafter.critiques(), 1);

    let first = &state.history().all()[0];
    assert_eq!(first.units_failed(), 1);
    let unit = &first.produced_units[0];
    assert_eq!(unit.id, "r1-draft");
    assert!(unit.error().unwrap().contains("400"));
    assert_eq!(unit.attempts, 1);
    assert!(first.critic_signal.is_none());
    assert!(first.flags.is_empty());

    // Nothing to build on after a failed first draft
    let contexts = drafter.contexts();
    assert!(contexts[1].previous_draft.is_none());
    assert!(contexts[1].feedback.is_none());
}

#[tokio::test]
async fn test_failed_critique_leaves_round_unscored() {
    let config = refinement_config(4, 4);
    let drafter = arc(ScriptedDrafter::scoring(&[96.0]).failing_critique(1));

    let controller = RoundController::refinement(&config, drafter.clone());
    let state = controller.run("Write a product brief").await.unwrap();

    assert_eq!(state.verdict(), Some(Verdict::StopSuccess));
    assert_eq!(state.scores(), vec![96.0]);
    assert_eq!(state.budgets().used(resources::CRITIQUE_CALLS), 2);

    let first = &state.history().all()[0];
    assert_eq!(first.units_succeeded(), 1);
    assert!(first.critic_signal.is_none());
    assert!(first.raw_critique.is_none());
    assert!(first.flags.iter().any(|f| matches!(
        f,
        RoundFlag::CritiqueFailed { error } if error.contains("400")
    )));
}

#[tokio::test]
async fn test_redraft_feedback_belongs_to_previous_draft() {
    let mut config = refinement_config(3, 3);
    config.refinement.max_iterations = 3;
    let drafter = arc(ScriptedDrafter::scoring(&[70.0]).failing_critique(2));

    let controller = RoundController::refinement(&config, drafter.clone());
    controller.run("Write a product brief").await.unwrap();

    let contexts = drafter.contexts();
    assert_eq!(contexts.len(), 3);
    assert_eq!(contexts[1].previous_draft.as_deref(), Some("draft 1"));
    assert_eq!(contexts[1].feedback.as_ref().map(|f| f.score), Some(70.0));
    // The second draft was never scored, so the third gets no stale feedback
    assert_eq!(contexts[2].previous_draft.as_deref(), Some("draft 2"));
    assert!(contexts[2].feedback.is_none());
}

#[tokio::test]
async fn test_draft_cancelled_at_round_deadline() {
    let mut config = refinement_config(1, 1);
    config.refinement.max_iterations = 1;
    config.dispatch.round_timeout_ms = 100;
    config.dispatch.unit_timeout_ms = 5_000;
    let drafter = arc(ScriptedDrafter::scoring(&[96.0]).with_draft_delay(Duration::from_secs(2)));

    let controller = RoundController::refinement(&config, drafter.clone());
    let started = Instant::now();
    let state = controller.run("Write a product brief").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(state.verdict(), Some(Verdict::StopExhausted));
    let record = &state.history().all()[0];
    assert!(record
        .flags
        .contains(&RoundFlag::RoundTimedOut { abandoned: 1 }));
    assert_eq!(record.units_failed(), 1);
    assert_eq!(
        record.produced_units[0].error(),
        Some(CollaboratorError::Cancelled.to_string().as_str())
    );
    assert_eq!(state.budgets().used(resources::DRAFT_CALLS), 1);
    assert_eq!(state.budgets().used(resources::CRITIQUE_CALLS), 0);
    assert_eq!(drafter.critiques(), 0);
}
