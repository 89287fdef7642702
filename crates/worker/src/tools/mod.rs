//! Tool adapters and the registry that probes and resolves them.

pub mod cli;
pub mod ollama;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use scheduler_core::config::ToolsConfig;
use scheduler_core::{ExecutionMetadata, TaskAssignment, ToolCapability};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub use cli::CliAdapter;
pub use ollama::OllamaAdapter;

/// Normalised result of a successful tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub output: String,
    pub metadata: ExecutionMetadata,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch {tool}: {message}")]
    Spawn { tool: String, message: String },

    #[error("{tool} timed out after {limit:?}")]
    Timeout { tool: String, limit: Duration },

    #[error("{tool} exited with code {code:?}: {stderr}")]
    NonZeroExit {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} request failed: {message}")]
    Http { tool: String, message: String },

    #[error("{tool} returned a malformed response: {message}")]
    MalformedResponse { tool: String, message: String },

    #[error("{0}")]
    Unavailable(String),
}

impl ToolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ToolError::Timeout { .. })
    }
}

/// One external capability: a CLI binary or a local HTTP service.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Never fails; problems are reported as an unavailable capability.
    async fn probe(&self) -> ToolCapability;

    async fn run(&self, assignment: &TaskAssignment) -> Result<ToolOutput, ToolError>;
}

/// Fixed set of adapters plus the capability snapshot from the latest probe.
pub struct ToolRegistry {
    adapters: Vec<Arc<dyn ToolAdapter>>,
    capabilities: RwLock<Vec<ToolCapability>>,
    probe_timeout: Duration,
}

impl ToolRegistry {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            adapters: Vec::new(),
            capabilities: RwLock::new(Vec::new()),
            probe_timeout,
        }
    }

    /// Built-in adapters in resolution order, skipping those disabled in config.
    pub fn from_config(config: &ToolsConfig) -> Self {
        let probe_timeout = Duration::from_secs(config.probe_timeout_seconds);
        let mut registry = Self::new(probe_timeout);

        if config.claude_code.enabled {
            registry.register(Arc::new(CliAdapter::claude_code(&config.claude_code, probe_timeout)));
        }
        if config.codex.enabled {
            registry.register(Arc::new(CliAdapter::codex(&config.codex, probe_timeout)));
        }
        if config.gemini.enabled {
            registry.register(Arc::new(CliAdapter::gemini_cli(&config.gemini, probe_timeout)));
        }
        if config.ollama.enabled {
            registry.register(Arc::new(OllamaAdapter::from_config(
                &config.ollama,
                Duration::from_secs(config.http_probe_timeout_seconds),
            )));
        }
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ToolAdapter>) {
        if self.adapters.iter().any(|a| a.id() == adapter.id()) {
            warn!("Tool adapter {} already registered, ignoring", adapter.id());
            return;
        }
        self.adapters.push(adapter);
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ToolAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn tool_ids(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.id().to_string()).collect()
    }

    /// Probe every adapter concurrently, each bounded by the per-check timeout,
    /// and replace the capability snapshot.
    pub async fn probe_all(&self) -> Vec<ToolCapability> {
        let checks = self.adapters.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            let limit = self.probe_timeout;
            async move {
                match tokio::time::timeout(limit, adapter.probe()).await {
                    Ok(capability) => capability,
                    Err(_) => {
                        debug!("Probe for {} timed out after {:?}", adapter.id(), limit);
                        ToolCapability::unavailable(adapter.id(), adapter.display_name())
                    }
                }
            }
        });
        let capabilities = join_all(checks).await;

        let available: Vec<&str> = capabilities
            .iter()
            .filter(|c| c.available)
            .map(|c| c.id.as_str())
            .collect();
        info!(
            "Probed {} tools, {} available: [{}]",
            capabilities.len(),
            available.len(),
            available.join(", ")
        );

        *self.capabilities.write().await = capabilities.clone();
        capabilities
    }

    pub async fn capabilities(&self) -> Vec<ToolCapability> {
        self.capabilities.read().await.clone()
    }

    pub async fn available_count(&self) -> usize {
        self.capabilities
            .read()
            .await
            .iter()
            .filter(|c| c.available)
            .count()
    }

    /// A hint must name an available tool; without one the first available
    /// tool in registration order is used.
    pub async fn resolve(&self, hint: Option<&str>) -> Result<Arc<dyn ToolAdapter>, ToolError> {
        let capabilities = self.capabilities.read().await;
        let is_available = |id: &str| capabilities.iter().any(|c| c.id == id && c.available);

        match hint {
            Some(hint) => {
                let Some(adapter) = self.adapters.iter().find(|a| a.id() == hint) else {
                    return Err(ToolError::Unavailable(format!("unknown tool: {hint}")));
                };
                if !is_available(hint) {
                    return Err(ToolError::Unavailable(format!(
                        "tool {hint} is not available on this worker"
                    )));
                }
                Ok(Arc::clone(adapter))
            }
            None => self
                .adapters
                .iter()
                .find(|a| is_available(a.id()))
                .cloned()
                .ok_or_else(|| ToolError::Unavailable("no tools available".to_string())),
        }
    }
}
