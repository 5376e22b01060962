//! Implementation of the `cadence run` command.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use crate::application::{Pipeline, RoundController, RunOutcome};
use crate::cli::load_config;
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{ArtifactTotals, FinalArtifact, RoundRecord, RunMode, Verdict};
use crate::domain::ports::DeepResearchService;
use crate::infrastructure::collaborators::HttpCollaborators;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::store::FileArtifactStore;
use crate::services::ResourceUsage;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Topic or question the run works on
    #[arg(short, long)]
    pub topic: String,

    /// Override the configured mode (research | refinement)
    #[arg(short, long)]
    pub mode: Option<RunMode>,

    /// Seed material file handed to every draft (refinement only)
    #[arg(long)]
    pub material: Option<PathBuf>,

    /// Skip writing the artifact to the store
    #[arg(long)]
    pub no_store: bool,

    /// Also print the synthesized document
    #[arg(long)]
    pub show_document: bool,
}

#[derive(Debug, Serialize)]
pub struct RoundSummary {
    pub index: u32,
    pub label: String,
    pub succeeded: usize,
    pub failed: usize,
    pub denied: usize,
    pub score: Option<f64>,
    pub flags: usize,
}

impl From<&RoundRecord> for RoundSummary {
    fn from(record: &RoundRecord) -> Self {
        Self {
            index: record.index,
            label: record.label.clone(),
            succeeded: record.units_succeeded(),
            failed: record.units_failed(),
            denied: record.denied.len(),
            score: record.critic_signal.as_ref().map(|c| c.score),
            flags: record.flags.len(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub success: bool,
    pub run_id: Uuid,
    pub topic: String,
    pub mode: RunMode,
    pub verdict: Verdict,
    pub approved: bool,
    pub totals: ArtifactTotals,
    pub rounds: Vec<RoundSummary>,
    pub budgets: BTreeMap<String, ResourceUsage>,
    pub artifact_json: Option<PathBuf>,
    pub artifact_markdown: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(skip)]
    artifact: FinalArtifact,
    #[serde(skip)]
    records: Vec<RoundRecord>,
}

impl RunOutput {
    fn new(outcome: RunOutcome, store: Option<&FileArtifactStore>, show_document: bool) -> Self {
        let RunOutcome { state, artifact } = outcome;
        let records = state.history().all().to_vec();
        let run_id = artifact.run_id;
        Self {
            success: true,
            run_id,
            topic: artifact.topic.clone(),
            mode: artifact.mode,
            verdict: artifact.verdict,
            approved: artifact.approved,
            totals: artifact.totals.clone(),
            rounds: records.iter().map(RoundSummary::from).collect(),
            budgets: state.budgets().snapshot(),
            artifact_json: store.map(|s| s.json_path(run_id)),
            artifact_markdown: store.map(|s| s.markdown_path(run_id)),
            document: show_document.then(|| artifact.document.clone()),
            artifact,
            records,
        }
    }
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let formatter = TableFormatter::new();
        let mut lines = vec![formatter.format_summary(&self.artifact)];

        if !self.records.is_empty() {
            lines.push("\nRounds:".to_string());
            lines.push(formatter.format_rounds(&self.records));
        }
        lines.push("\nBudgets:".to_string());
        lines.push(formatter.format_budgets(&self.budgets));

        if let Some(path) = &self.artifact_markdown {
            lines.push(format!("\nArtifact written to {}", path.display()));
        }
        if let Some(document) = &self.document {
            lines.push(String::new());
            lines.push(document.clone());
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Build the controller for the effective mode of `config`.
fn build_controller(
    config: &crate::domain::models::Config,
    http: &Arc<HttpCollaborators>,
    material: Option<String>,
) -> RoundController {
    match config.mode {
        RunMode::Research => {
            let deep = config
                .research
                .deep_research
                .then(|| Arc::clone(http) as Arc<dyn DeepResearchService>);
            RoundController::research(config, http.clone(), http.clone(), deep)
        }
        RunMode::Refinement => {
            let controller = RoundController::refinement(config, http.clone());
            match material {
                Some(material) => controller.with_material(material),
                None => controller,
            }
        }
    }
}

pub async fn execute(args: RunArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(mode) = args.mode {
        config.mode = mode;
        ConfigLoader::validate(&config).context("Configuration invalid for the requested mode")?;
    }

    let material = match &args.material {
        Some(path) => Some(
            fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read material file {}", path.display()))?,
        ),
        None => None,
    };

    let http = Arc::new(
        HttpCollaborators::from_config(&config.collaborators)
            .context("Failed to build collaborator client")?,
    );
    let controller = build_controller(&config, &http, material);

    let store = (!args.no_store).then(|| FileArtifactStore::new(&config.store.dir));
    let mut pipeline = Pipeline::new(controller);
    if let Some(store) = &store {
        pipeline = pipeline.with_store(Arc::new(store.clone()));
    }

    let outcome = pipeline
        .execute(&args.topic)
        .await
        .context("Run failed")?;

    output(
        &RunOutput::new(outcome, store.as_ref(), args.show_document),
        json_mode,
    );
    Ok(())
}
