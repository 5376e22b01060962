//! HTTP adapters for the collaborator ports.
//!
//! All calls POST JSON to a gateway under `collaborators.base_url`.
//!
//! | Port                  | Path (default)  | Request                 | Response              |
//! |-----------------------|-----------------|-------------------------|-----------------------|
//! | `RoundPlanner`        | `/v1/plan`      | `PlanRequest`           | raw text              |
//! | `QueryService`        | `/v1/answer`    | `{"queries": [...]}`    | `{"answers": [...]}`  |
//! | `DeepResearchService` | `/v1/research`  | `{"prompt": "..."}`     | `ResearchReport`      |
//! | `DraftService::draft` | `/v1/draft`     | `DraftContext`          | raw text              |
//! | `DraftService::critique` | `/v1/critique` | `{"draft", "context"}` | raw text             |
//!
//! Planner and critic bodies are returned verbatim; the engine validates them.
//! HTTP 429 and 5xx, timeouts and connection failures are transient; any
//! other non-success status or an undecodable body is permanent.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::domain::errors::CollaboratorError;
use crate::domain::models::CollaboratorsConfig;
use crate::domain::ports::{
    DeepResearchService, DraftContext, DraftService, PlanRequest, QueryAnswer, QueryService,
    ResearchReport, RoundPlanner,
};

#[derive(Serialize)]
struct AnswerRequest<'a> {
    queries: &'a [String],
}

#[derive(Deserialize)]
struct AnswerResponse {
    answers: Vec<QueryAnswer>,
}

#[derive(Serialize)]
struct ResearchRequest<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
struct CritiqueRequest<'a> {
    draft: &'a str,
    context: &'a DraftContext,
}

/// Map an HTTP status to a collaborator error.
pub fn classify_status(status: StatusCode, body: &str) -> CollaboratorError {
    let detail = format!("HTTP {status}: {}", body.chars().take(500).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CollaboratorError::Transient(detail)
    } else {
        CollaboratorError::Permanent(detail)
    }
}

/// One client implementing every collaborator port against the gateway.
#[derive(Clone)]
pub struct HttpCollaborators {
    http_client: ReqwestClient,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    config: CollaboratorsConfig,
}

impl HttpCollaborators {
    /// Build from configuration. The bearer token is read from the
    /// environment variable named by `api_key_env`, when set.
    pub fn from_config(config: &CollaboratorsConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &CollaboratorsConfig, api_key: Option<String>) -> Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let http_client = ReqwestClient::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
            config: config.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, CollaboratorError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.http_client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Timeout(self.timeout)
            } else {
                CollaboratorError::Transient(format!("request to {url} failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(classify_status(status, &body));
        }
        debug!(%url, %status, "collaborator call succeeded");
        Ok(response)
    }

    async fn post_text<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String, CollaboratorError> {
        self.send(path, body)
            .await?
            .text()
            .await
            .map_err(|e| CollaboratorError::Transient(format!("failed to read body: {e}")))
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CollaboratorError> {
        let text = self.post_text(path, body).await?;
        serde_json::from_str(&text)
            .map_err(|e| CollaboratorError::Permanent(format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl RoundPlanner for HttpCollaborators {
    #[instrument(skip(self, request), fields(round = request.round))]
    async fn propose(&self, request: &PlanRequest) -> Result<String, CollaboratorError> {
        self.post_text(&self.config.planner_path, request).await
    }
}

#[async_trait]
impl QueryService for HttpCollaborators {
    #[instrument(skip(self, queries), fields(batch = queries.len()))]
    async fn answer_batch(&self, queries: &[String]) -> Result<Vec<QueryAnswer>, CollaboratorError> {
        let response: AnswerResponse = self
            .post_json(&self.config.query_path, &AnswerRequest { queries })
            .await?;
        Ok(response.answers)
    }
}

#[async_trait]
impl DeepResearchService for HttpCollaborators {
    #[instrument(skip_all)]
    async fn research(&self, prompt: &str) -> Result<ResearchReport, CollaboratorError> {
        self.post_json(&self.config.research_path, &ResearchRequest { prompt })
            .await
    }
}

#[async_trait]
impl DraftService for HttpCollaborators {
    #[instrument(skip_all, fields(attempt = context.attempt))]
    async fn draft(&self, context: &DraftContext) -> Result<String, CollaboratorError> {
        self.post_text(&self.config.draft_path, context).await
    }

    #[instrument(skip_all, fields(attempt = context.attempt))]
    async fn critique(
        &self,
        draft: &str,
        context: &DraftContext,
    ) -> Result<String, CollaboratorError> {
        self.post_text(&self.config.critique_path, &CritiqueRequest { draft, context })
            .await
    }
}
