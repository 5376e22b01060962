pub mod artifact;
pub mod config;
pub mod round;
pub mod run;

pub use artifact::{ArtifactTotals, FinalArtifact};
pub use config::{
    resources, CollaboratorsConfig, Config, DispatchConfig, LoggingConfig, RefinementConfig,
    ResearchConfig, RetryConfig, StoreConfig,
};
pub use round::{CriticSignal, DeniedUnit, RoundFlag, RoundRecord, UnitKind, UnitStatus, WorkUnit};
pub use run::{ControllerPhase, QualitySignal, RunMode, Verdict};
