use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::run::RunMode;

/// Well-known budget resource names.
pub mod resources {
    /// Per-query calls to the query-answering service.
    pub const UNIT_CALLS: &str = "unit_calls";
    /// Deep-research calls.
    pub const DEEP_CALLS: &str = "deep_calls";
    /// Draft attempts.
    pub const DRAFT_CALLS: &str = "draft_calls";
    /// Critique calls.
    pub const CRITIQUE_CALLS: &str = "critique_calls";
}

/// Main configuration structure for Cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Operating mode: research or refinement
    #[serde(default)]
    pub mode: RunMode,

    /// Research-mode round shape
    #[serde(default)]
    pub research: ResearchConfig,

    /// Refinement-mode convergence policy
    #[serde(default)]
    pub refinement: RefinementConfig,

    /// Resource caps keyed by resource name
    #[serde(default = "default_budgets")]
    pub budgets: BTreeMap<String, u64>,

    /// Concurrency and deadlines inside a round
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Retry policy at the collaborator-call boundary
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Collaborator endpoints
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,

    /// Artifact store location
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_budgets() -> BTreeMap<String, u64> {
    BTreeMap::from([
        (resources::UNIT_CALLS.to_string(), 45),
        (resources::DEEP_CALLS.to_string(), 3),
        (resources::DRAFT_CALLS.to_string(), 4),
        (resources::CRITIQUE_CALLS.to_string(), 4),
    ])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            research: ResearchConfig::default(),
            refinement: RefinementConfig::default(),
            budgets: default_budgets(),
            dispatch: DispatchConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
            collaborators: CollaboratorsConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Resources whose exhaustion ends a run in the given mode.
    pub fn required_resources(mode: RunMode) -> Vec<String> {
        match mode {
            RunMode::Research => vec![resources::UNIT_CALLS.to_string()],
            RunMode::Refinement => vec![resources::DRAFT_CALLS.to_string()],
        }
    }
}

/// Research-mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResearchConfig {
    /// Number of perspectives to cover before stopping
    #[serde(default = "default_target_rounds")]
    pub target_rounds: u32,

    /// Maximum queries dispatched in one round
    #[serde(default = "default_units_per_round")]
    pub units_per_round: usize,

    /// Queries per call to the query-answering service
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Dispatch one deep-research call per round
    #[serde(default = "default_true")]
    pub deep_research: bool,

    /// Planner attempts before falling back to a generic label
    #[serde(default = "default_max_selection_attempts")]
    pub max_selection_attempts: u32,

    /// Similarity above which a perspective label counts as already covered
    #[serde(default = "default_label_novelty_threshold")]
    pub label_novelty_threshold: f64,

    /// Similarity above which a query counts as already asked
    #[serde(default = "default_query_novelty_threshold")]
    pub query_novelty_threshold: f64,
}

const fn default_target_rounds() -> u32 {
    3
}

const fn default_units_per_round() -> usize {
    15
}

const fn default_batch_size() -> usize {
    5
}

const fn default_true() -> bool {
    true
}

const fn default_max_selection_attempts() -> u32 {
    3
}

const fn default_label_novelty_threshold() -> f64 {
    0.6
}

const fn default_query_novelty_threshold() -> f64 {
    0.85
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            target_rounds: default_target_rounds(),
            units_per_round: default_units_per_round(),
            batch_size: default_batch_size(),
            deep_research: default_true(),
            max_selection_attempts: default_max_selection_attempts(),
            label_novelty_threshold: default_label_novelty_threshold(),
            query_novelty_threshold: default_query_novelty_threshold(),
        }
    }
}

/// Refinement-mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RefinementConfig {
    /// Maximum draft/critique attempts
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Critic score at or above which the draft is approved.
    /// Deliberately near the top of the scale: most runs exhaust iterations.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,

    /// Upper bound of the critic's score range
    #[serde(default = "default_score_scale")]
    pub score_scale: f64,

    /// Stop when the best score has not improved over this many rounds
    #[serde(default)]
    pub plateau_rounds: Option<u32>,

    /// Minimum improvement that counts as progress for plateau detection
    #[serde(default = "default_plateau_min_delta")]
    pub plateau_min_delta: f64,
}

const fn default_max_iterations() -> u32 {
    4
}

const fn default_success_threshold() -> f64 {
    95.0
}

const fn default_score_scale() -> f64 {
    100.0
}

const fn default_plateau_min_delta() -> f64 {
    1.0
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            success_threshold: default_success_threshold(),
            score_scale: default_score_scale(),
            plateau_rounds: None,
            plateau_min_delta: default_plateau_min_delta(),
        }
    }
}

/// Dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DispatchConfig {
    /// Maximum collaborator calls in flight within a round
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Deadline for a single collaborator call, in milliseconds
    #[serde(default = "default_unit_timeout_ms")]
    pub unit_timeout_ms: u64,

    /// Deadline for all calls of a round, in milliseconds
    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: u64,
}

const fn default_max_concurrency() -> usize {
    4
}

const fn default_unit_timeout_ms() -> u64 {
    120_000
}

const fn default_round_timeout_ms() -> u64 {
    600_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            unit_timeout_ms: default_unit_timeout_ms(),
            round_timeout_ms: default_round_timeout_ms(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation policy for file output: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// HTTP collaborator endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CollaboratorsConfig {
    /// Base URL of the collaborator gateway
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_planner_path")]
    pub planner_path: String,

    #[serde(default = "default_query_path")]
    pub query_path: String,

    #[serde(default = "default_research_path")]
    pub research_path: String,

    #[serde(default = "default_draft_path")]
    pub draft_path: String,

    #[serde(default = "default_critique_path")]
    pub critique_path: String,

    /// Environment variable holding the bearer token, if any
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8700".to_string()
}

fn default_planner_path() -> String {
    "/v1/plan".to_string()
}

fn default_query_path() -> String {
    "/v1/answer".to_string()
}

fn default_research_path() -> String {
    "/v1/research".to_string()
}

fn default_draft_path() -> String {
    "/v1/draft".to_string()
}

fn default_critique_path() -> String {
    "/v1/critique".to_string()
}

fn default_api_key_env() -> String {
    "CADENCE_API_KEY".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            planner_path: default_planner_path(),
            query_path: default_query_path(),
            research_path: default_research_path(),
            draft_path: default_draft_path(),
            critique_path: default_critique_path(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Artifact store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// Directory receiving `<run_id>.json` and `<run_id>.md`
    #[serde(default = "default_store_dir")]
    pub dir: String,
}

fn default_store_dir() -> String {
    ".cadence/artifacts".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
        }
    }
}
