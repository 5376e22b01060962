//! Pipeline host: run the controller, fold the result, persist it.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::errors::EngineResult;
use crate::domain::models::FinalArtifact;
use crate::domain::ports::ArtifactStore;
use crate::services::{ResultSynthesizer, RunState};

use super::round_controller::RoundController;

/// Terminal state of a run and the artifact synthesized from it.
#[derive(Debug)]
pub struct RunOutcome {
    pub state: RunState,
    pub artifact: FinalArtifact,
}

/// One pipeline execution per call; nothing is shared between runs.
pub struct Pipeline {
    controller: RoundController,
    synthesizer: ResultSynthesizer,
    store: Option<Arc<dyn ArtifactStore>>,
}

impl Pipeline {
    pub fn new(controller: RoundController) -> Self {
        Self {
            controller,
            synthesizer: ResultSynthesizer::new(),
            store: None,
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub const fn with_synthesizer(mut self, synthesizer: ResultSynthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub const fn controller(&self) -> &RoundController {
        &self.controller
    }

    pub async fn execute(&self, topic: &str) -> EngineResult<RunOutcome> {
        self.execute_with_id(Uuid::new_v4(), topic).await
    }

    #[instrument(skip(self))]
    pub async fn execute_with_id(&self, run_id: Uuid, topic: &str) -> EngineResult<RunOutcome> {
        let state = self.controller.run_with_id(run_id, topic).await?;
        let artifact = self.synthesizer.synthesize(&state)?;

        if let Some(store) = &self.store {
            store.save(run_id, topic, &artifact).await?;
            info!(%run_id, "artifact stored");
        }
        info!(
            %run_id,
            verdict = %artifact.verdict,
            approved = artifact.approved,
            rounds = artifact.totals.rounds_completed,
            "pipeline complete"
        );

        Ok(RunOutcome { state, artifact })
    }
}
