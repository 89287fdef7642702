use std::path::{Path, PathBuf};
use std::sync::Arc;

use scheduler_core::{
    AgentConfig, AgentEvent, AgentResult, ConfigValidator, LoginResponse, ToolCapability,
};
use scheduler_worker::{ConnectionSupervisor, WorkerStatus};
use tokio::sync::{broadcast, RwLock};
use tracing::info;

/// 宿主界面调用的命令/事件边界
///
/// Saved settings are written to disk immediately and picked up the next time
/// the agent process starts; the running supervisor keeps the settings it was
/// built with.
pub struct AgentHost {
    supervisor: Arc<ConnectionSupervisor>,
    settings: RwLock<AgentConfig>,
    settings_path: PathBuf,
}

impl AgentHost {
    pub fn new(config: AgentConfig, settings_path: impl Into<PathBuf>) -> AgentResult<Self> {
        config.validate()?;
        let supervisor = Arc::new(ConnectionSupervisor::from_config(&config)?);
        Ok(Self::with_supervisor(supervisor, config, settings_path))
    }

    pub fn with_supervisor(
        supervisor: Arc<ConnectionSupervisor>,
        config: AgentConfig,
        settings_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            supervisor,
            settings: RwLock::new(config),
            settings_path: settings_path.into(),
        }
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    pub async fn login(&self, username: &str, password: &str) -> AgentResult<LoginResponse> {
        self.supervisor.session().login(username, password).await
    }

    /// Stops the worker before dropping the session tokens.
    pub async fn logout(&self) -> AgentResult<()> {
        self.supervisor.stop().await?;
        self.supervisor.session().logout();
        info!("Logged out");
        Ok(())
    }

    pub async fn start_worker(&self) -> AgentResult<()> {
        self.supervisor.start().await
    }

    pub async fn stop_worker(&self) -> AgentResult<()> {
        self.supervisor.stop().await
    }

    pub async fn get_worker_status(&self) -> WorkerStatus {
        self.supervisor.status().await
    }

    /// Re-run the capability probe without registering.
    pub async fn probe_tools(&self) -> Vec<ToolCapability> {
        self.supervisor.registry().probe_all().await
    }

    pub async fn get_settings(&self) -> AgentConfig {
        self.settings.read().await.clone()
    }

    /// Validate, persist, then replace the in-memory copy. Invalid settings
    /// leave both the file and the in-memory copy untouched.
    pub async fn save_settings(&self, config: AgentConfig) -> AgentResult<()> {
        let mut settings = self.settings.write().await;
        config.save(&self.settings_path)?;
        info!("Settings saved to {}", self.settings_path.display());
        *settings = config;
        Ok(())
    }

    /// `status-changed` and `log-emitted` events.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.supervisor.subscribe()
    }
}
