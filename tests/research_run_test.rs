//! Integration tests for research-mode runs.
//!
//! Runs the round controller end to end against scripted collaborators and
//! checks budgets, history and flags on the terminal state.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence::domain::errors::CollaboratorError;
use cadence::domain::models::{resources, RoundFlag, UnitKind, Verdict};
use cadence::domain::ports::DeepResearchService;
use cadence::services::similarity;
use cadence::RoundController;

use common::{
    arc, research_config, EchoQueryService, FailingPlanner, FixedPlanner, LabelPlanner,
    StubDeepResearch,
};

#[tokio::test]
async fn test_three_rounds_spend_exact_budget() {
    common::setup_test_logging();
    let config = research_config(45);
    let planner = arc(LabelPlanner::new(
        &["Supply chain", "Consumer demand", "Regulatory landscape"],
        15,
    ));
    let queries = arc(EchoQueryService::new());

    let controller = RoundController::research(&config, planner, queries.clone(), None);
    let state = controller.run("Coffee markets").await.unwrap();

    assert_eq!(state.verdict(), Some(Verdict::StopSuccess));
    assert_eq!(state.round_index(), 3);
    assert_eq!(state.budgets().used(resources::UNIT_CALLS), 45);
    assert_eq!(state.budgets().outstanding(), 0);

    let history = state.history().all();
    let labels: HashSet<&str> = history.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels.len(), 3);
    for (i, record) in history.iter().enumerate() {
        assert_eq!(record.index as usize, i);
        assert_eq!(record.units_succeeded(), 15);
        assert!(record.denied.is_empty());
    }

    // 15 queries in batches of 5, three rounds
    let batches = queries.batches();
    assert_eq!(batches.len(), 9);
    assert!(batches.iter().all(|b| b.len() == 5));
}

#[tokio::test]
async fn test_partial_batch_failure_is_isolated() {
    let mut config = research_config(5);
    config.research.target_rounds = 1;
    config.research.units_per_round = 5;
    config.research.batch_size = 1;
    let planner = arc(LabelPlanner::new(&["Pricing"], 5));
    let queries = arc(EchoQueryService::new().failing_on("round1 item3"));

    let controller = RoundController::research(&config, planner, queries, None);
    let state = controller.run("Coffee markets").await.unwrap();

    assert_eq!(state.verdict(), Some(Verdict::StopSuccess));
    let record = &state.history().all()[0];
    assert_eq!(record.units_attempted(), 5);
    assert_eq!(record.units_succeeded(), 4);

    let failed: Vec<_> = record
        .produced_units
        .iter()
        .filter(|u| !u.is_success())
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, "r1-q03");
    assert!(failed[0].error().unwrap().contains("400"));
    // Permanent errors are not retried
    assert_eq!(failed[0].attempts, 1);
    // Budget is consumed for the failed unit too
    assert_eq!(state.budgets().used(resources::UNIT_CALLS), 5);
}

#[tokio::test]
async fn test_zero_budget_stops_before_first_round() {
    let config = research_config(0);
    let planner = arc(LabelPlanner::new(&["Anything"], 5));
    let queries = arc(EchoQueryService::new());

    let controller = RoundController::research(&config, planner.clone(), queries.clone(), None);
    let state = controller.run("Coffee markets").await.unwrap();

    assert_eq!(state.verdict(), Some(Verdict::StopExhausted));
    assert_eq!(state.round_index(), 0);
    assert!(state.history().is_empty());
    assert_eq!(planner.calls(), 0);
    assert!(queries.batches().is_empty());
}

#[tokio::test]
async fn test_zero_target_rounds_is_exhausted() {
    let mut config = research_config(45);
    config.research.target_rounds = 0;
    let controller = RoundController::research(
        &config,
        arc(LabelPlanner::new(&["Anything"], 5)),
        arc(EchoQueryService::new()),
        None,
    );

    let state = controller.run("Coffee markets").await.unwrap();
    assert_eq!(state.verdict(), Some(Verdict::StopExhausted));
    assert_eq!(state.round_index(), 0);
}

#[tokio::test]
async fn test_budget_runs_out_mid_round() {
    let config = research_config(20);
    let planner = arc(LabelPlanner::new(&["Supply chain", "Consumer demand", "Retail"], 15));

    let controller =
        RoundController::research(&config, planner, arc(EchoQueryService::new()), None);
    let state = controller.run("Coffee markets").await.unwrap();

    assert_eq!(state.verdict(), Some(Verdict::StopExhausted));
    assert_eq!(state.round_index(), 2);
    assert_eq!(state.budgets().used(resources::UNIT_CALLS), 20);

    let second = &state.history().all()[1];
    assert_eq!(second.units_attempted(), 5);
    assert_eq!(second.denied.len(), 10);
    assert!(second
        .denied
        .iter()
        .all(|d| d.resource == resources::UNIT_CALLS));
}

#[tokio::test]
async fn test_round_deadline_abandons_slow_batches() {
    let mut config = research_config(10);
    config.research.target_rounds = 1;
    config.research.units_per_round = 4;
    config.dispatch.round_timeout_ms = 100;
    config.dispatch.unit_timeout_ms = 5_000;
    let queries = arc(EchoQueryService::new().with_delay(Duration::from_secs(2)));

    let controller = RoundController::research(
        &config,
        arc(LabelPlanner::new(&["Logistics"], 4)),
        queries,
        None,
    );

    let started = Instant::now();
    let state = controller.run("Coffee markets").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    let record = &state.history().all()[0];
    assert!(record
        .flags
        .contains(&RoundFlag::RoundTimedOut { abandoned: 1 }));
    assert_eq!(record.units_attempted(), 4);
    assert_eq!(record.units_succeeded(), 0);
    assert_eq!(state.budgets().used(resources::UNIT_CALLS), 4);
    assert_eq!(state.verdict(), Some(Verdict::StopSuccess));
}

#[tokio::test]
async fn test_malformed_plan_uses_raw_lines() {
    let mut config = research_config(10);
    config.research.target_rounds = 1;
    let planner = arc(FixedPlanner(
        "Market sizing\n- Total addressable market\n- Annual growth rate".to_string(),
    ));

    let controller =
        RoundController::research(&config, planner, arc(EchoQueryService::new()), None);
    let state = controller.run("Coffee markets").await.unwrap();

    let record = &state.history().all()[0];
    assert_eq!(record.label, "Market sizing");
    assert_eq!(record.units_succeeded(), 2);
    assert!(record.flags.contains(&RoundFlag::MalformedOutput {
        origin: "planner".to_string()
    }));
    assert!(record.is_malformed());
}

#[tokio::test]
async fn test_repeated_label_falls_back_to_generic_perspective() {
    let mut config = research_config(45);
    config.research.target_rounds = 2;
    config.research.units_per_round = 3;
    let planner = arc(LabelPlanner::new(&["Supply chain"], 3));

    let controller =
        RoundController::research(&config, planner.clone(), arc(EchoQueryService::new()), None);
    let state = controller.run("Coffee markets").await.unwrap();

    let history = state.history().all();
    assert_eq!(history[0].label, "Supply chain");
    assert_eq!(history[1].label, "Historical background");
    assert!(history[1]
        .flags
        .contains(&RoundFlag::FallbackLabel { attempts: 3 }));
    // The rejected proposal's queries are still dispatched
    assert_eq!(history[1].units_succeeded(), 3);
    assert_eq!(planner.calls(), 4);
}

#[tokio::test]
async fn test_repeated_fallbacks_keep_labels_distinct() {
    let mut config = research_config(45);
    config.research.target_rounds = 3;
    config.research.units_per_round = 3;
    let threshold = config.research.label_novelty_threshold;
    let planner = arc(LabelPlanner::new(&["Supply chain"], 3));

    let controller =
        RoundController::research(&config, planner, arc(EchoQueryService::new()), None);
    let state = controller.run("Coffee markets").await.unwrap();

    assert_eq!(state.verdict(), Some(Verdict::StopSuccess));
    let labels = state.history().labels();
    assert_eq!(
        labels,
        vec!["Supply chain", "Historical background", "Key stakeholders"]
    );
    for (i, a) in labels.iter().enumerate() {
        for b in &labels[i + 1..] {
            assert!(
                similarity(a, b) <= threshold,
                "{a:?} and {b:?} are near-duplicates"
            );
        }
    }
    for record in &state.history().all()[1..] {
        assert!(record
            .flags
            .contains(&RoundFlag::FallbackLabel { attempts: 3 }));
        assert!(!record
            .flags
            .iter()
            .any(|f| matches!(f, RoundFlag::LabelCollision { .. })));
    }
}

#[tokio::test]
async fn test_failing_planner_uses_fallback_label_and_topic_query() {
    let mut config = research_config(10);
    config.research.target_rounds = 1;
    let planner = arc(FailingPlanner::new(CollaboratorError::Permanent(
        "HTTP 400: bad prompt".to_string(),
    )));
    let queries = arc(EchoQueryService::new());

    let controller = RoundController::research(&config, planner.clone(), queries.clone(), None);
    let state = controller.run("Coffee markets").await.unwrap();

    assert_eq!(state.verdict(), Some(Verdict::StopSuccess));
    // Permanent failures are not retried, so one call per selection attempt
    assert_eq!(planner.calls(), 3);

    let record = &state.history().all()[0];
    assert_eq!(record.label, "Historical background");
    assert!(record
        .flags
        .contains(&RoundFlag::FallbackLabel { attempts: 3 }));
    assert!(!record.is_malformed());
    assert_eq!(record.units_succeeded(), 1);
    assert_eq!(
        record.produced_units[0].subject,
        "Coffee markets: Historical background"
    );
    assert_eq!(
        queries.batches(),
        vec![vec!["Coffee markets: Historical background".to_string()]]
    );
    assert_eq!(state.budgets().used(resources::UNIT_CALLS), 1);
}

#[tokio::test]
async fn test_blank_perspective_is_never_a_label() {
    let mut config = research_config(10);
    config.research.target_rounds = 1;
    let planner = arc(FixedPlanner(
        r#"{"perspective": "  ", "queries": ["Who roasts the beans?"]}"#.to_string(),
    ));

    let controller =
        RoundController::research(&config, planner, arc(EchoQueryService::new()), None);
    let state = controller.run("Coffee markets").await.unwrap();

    let record = &state.history().all()[0];
    assert_eq!(record.label, "Historical background");
    assert!(record.flags.contains(&RoundFlag::MalformedOutput {
        origin: "planner".to_string()
    }));
    assert!(record
        .flags
        .contains(&RoundFlag::FallbackLabel { attempts: 3 }));
}

#[tokio::test]
async fn test_near_duplicate_queries_are_skipped() {
    let mut config = research_config(10);
    config.research.target_rounds = 1;
    let queries = vec![
        "Coffee price history".to_string(),
        "coffee prices history".to_string(),
        "Coffee export volumes".to_string(),
    ];
    let planner = arc(FixedPlanner(common::plan_json("Trade", &queries)));

    let controller =
        RoundController::research(&config, planner, arc(EchoQueryService::new()), None);
    let state = controller.run("Coffee markets").await.unwrap();

    let record = &state.history().all()[0];
    assert_eq!(record.skipped_duplicates, 1);
    assert_eq!(record.units_attempted(), 2);
    assert_eq!(state.budgets().used(resources::UNIT_CALLS), 2);
    let ids: Vec<&str> = record.produced_units.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["r1-q00", "r1-q01"]);
}

#[tokio::test]
async fn test_deep_research_unit_per_round() {
    let mut config = research_config(10);
    config.budgets.insert(resources::DEEP_CALLS.to_string(), 1);
    config.research.deep_research = true;
    config.research.target_rounds = 2;
    config.research.units_per_round = 2;
    let deep = Arc::new(StubDeepResearch::new(0.25));

    let controller = RoundController::research(
        &config,
        arc(LabelPlanner::new(&["Supply chain", "Consumer demand"], 2)),
        arc(EchoQueryService::new()),
        Some(deep.clone() as Arc<dyn DeepResearchService>),
    );
    let state = controller.run("Coffee markets").await.unwrap();

    let history = state.history().all();
    let first_deep = history[0].last_success(UnitKind::DeepResearch).unwrap();
    assert_eq!(first_deep.id, "r1-deep");
    assert_eq!(first_deep.cost, Some(0.25));
    // Second round is denied its deep call but still answers queries
    assert!(history[1].last_success(UnitKind::DeepResearch).is_none());
    assert_eq!(history[1].denied.len(), 1);
    assert_eq!(history[1].denied[0].unit_id, "r2-deep");
    assert_eq!(history[1].units_succeeded(), 2);

    let prompts = deep.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Perspective: Supply chain"));
}
