use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use scheduler_core::config::OllamaConfig;
use scheduler_core::{ExecutionMetadata, TaskAssignment, ToolCapability};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ToolAdapter, ToolError, ToolOutput};

const TOOL_ID: &str = "ollama";

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
}

/// Local Ollama server reached over HTTP.
pub struct OllamaAdapter {
    base_url: String,
    default_model: Option<String>,
    timeout: Duration,
    probe_timeout: Duration,
    http_client: Client,
}

impl OllamaAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: None,
            timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(3),
            http_client: Client::new(),
        }
    }

    pub fn from_config(config: &OllamaConfig, probe_timeout: Duration) -> Self {
        let mut adapter = Self::new(&config.base_url);
        adapter.default_model = config.default_model.clone();
        adapter.timeout = Duration::from_secs(config.timeout_seconds);
        adapter.probe_timeout = probe_timeout;
        adapter
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn list_models(&self) -> Result<Vec<String>, ToolError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| http_error(&e))?;
        let tags: TagsResponse = response.json().await.map_err(|e| malformed(&e))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn select_model(&self, assignment: &TaskAssignment) -> Result<String, ToolError> {
        if let Some(model) = assignment.context_str("model").filter(|m| !m.trim().is_empty()) {
            return Ok(model.to_string());
        }
        if let Some(model) = &self.default_model {
            return Ok(model.clone());
        }
        self.list_models()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::Unavailable("ollama has no models installed".to_string()))
    }

    fn effective_timeout(&self, assignment: &TaskAssignment) -> Duration {
        assignment
            .timeout_override_seconds()
            .map(Duration::from_secs)
            .map_or(self.timeout, |requested| requested.min(self.timeout))
    }
}

#[async_trait]
impl ToolAdapter for OllamaAdapter {
    fn id(&self) -> &str {
        TOOL_ID
    }

    fn display_name(&self) -> &str {
        "Ollama"
    }

    async fn probe(&self) -> ToolCapability {
        let url = format!("{}/api/tags", self.base_url);
        let response = match self
            .http_client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!("Ollama probe returned HTTP {}", response.status());
                return ToolCapability::unavailable(TOOL_ID, self.display_name());
            }
            Err(e) => {
                debug!("Ollama not reachable at {}: {}", self.base_url, e);
                return ToolCapability::unavailable(TOOL_ID, self.display_name());
            }
        };

        // The model count is only a hint; an unparseable body still means the server is up.
        let version = response
            .json::<TagsResponse>()
            .await
            .ok()
            .map(|tags| format!("{} models", tags.models.len()));
        ToolCapability::available(TOOL_ID, self.display_name(), version)
    }

    async fn run(&self, assignment: &TaskAssignment) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();
        let model = self.select_model(assignment).await?;
        let limit = self.effective_timeout(assignment);

        info!(
            task_id = %assignment.task_id,
            tool = TOOL_ID,
            "Generating with model {} ({:?} limit)",
            model,
            limit
        );

        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &model,
            prompt: &assignment.description,
            stream: false,
        };
        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .timeout(limit)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout {
                        tool: TOOL_ID.to_string(),
                        limit,
                    }
                } else {
                    http_error(&e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Http {
                tool: TOOL_ID.to_string(),
                message: format!("HTTP {status} - {body}"),
            });
        }

        let generated: GenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::Timeout {
                    tool: TOOL_ID.to_string(),
                    limit,
                }
            } else {
                malformed(&e)
            }
        })?;

        Ok(ToolOutput {
            output: generated.response,
            metadata: ExecutionMetadata::Model {
                tool: TOOL_ID.to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
                model,
                eval_count: generated.eval_count,
                prompt_eval_count: generated.prompt_eval_count,
            },
        })
    }
}

fn http_error(e: &reqwest::Error) -> ToolError {
    ToolError::Http {
        tool: TOOL_ID.to_string(),
        message: e.to_string(),
    }
}

fn malformed(e: &reqwest::Error) -> ToolError {
    ToolError::MalformedResponse {
        tool: TOOL_ID.to_string(),
        message: e.to_string(),
    }
}
