//! Agent配置
//!
//! 配置来源按优先级从低到高：结构体默认值 → TOML 配置文件 → `AGENT__*` 环境变量。
//!
//! ```toml
//! [coordinator]
//! base_url = "https://coordinator.example.com/api"
//! api_key = "wk_..."
//!
//! [agent]
//! heartbeat_interval_seconds = 30
//! poll_interval_seconds = 10
//!
//! [tools.ollama]
//! base_url = "http://127.0.0.1:11434"
//! ```

pub mod validation;

use std::fmt;
use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::{AgentError, AgentResult};
pub use validation::{ConfigValidator, ValidationUtils};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config/agent.toml", "agent.toml"];
const MAX_TIMEOUT_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub coordinator: CoordinatorConfig,
    pub agent: RuntimeConfig,
    pub tools: ToolsConfig,
    pub debug: DebugConfig,
    pub logging: LoggingConfig,
}

/// 协调器连接配置
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub base_url: String,
    /// Worker-scoped API key; when absent the token from `login` is used.
    pub api_key: Option<String>,
    pub request_timeout_seconds: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            api_key: None,
            request_timeout_seconds: 10,
        }
    }
}

impl fmt::Debug for CoordinatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// 运行时定时器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub heartbeat_interval_seconds: u64,
    pub poll_interval_seconds: u64,
    pub reconnect_delay_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub report_retries: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 30,
            poll_interval_seconds: 10,
            reconnect_delay_seconds: 5,
            shutdown_grace_seconds: 3,
            report_retries: 3,
        }
    }
}

/// 命令行工具配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliToolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub binary: String,
    #[serde(default = "default_cli_timeout")]
    pub timeout_seconds: u64,
}

impl CliToolConfig {
    fn with_binary(binary: &str) -> Self {
        Self {
            enabled: true,
            binary: binary.to_string(),
            timeout_seconds: default_cli_timeout(),
        }
    }
}

/// 本地 Ollama 服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub enabled: bool,
    pub base_url: String,
    pub default_model: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://127.0.0.1:11434".to_string(),
            default_model: None,
            timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub probe_timeout_seconds: u64,
    pub http_probe_timeout_seconds: u64,
    pub claude_code: CliToolConfig,
    pub codex: CliToolConfig,
    pub gemini: CliToolConfig,
    pub ollama: OllamaConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            probe_timeout_seconds: 5,
            http_probe_timeout_seconds: 3,
            claude_code: CliToolConfig::with_binary("claude"),
            codex: CliToolConfig::with_binary("codex"),
            gemini: CliToolConfig::with_binary("gemini"),
            ollama: OllamaConfig::default(),
        }
    }
}

/// 远程调试通道配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
    pub command_timeout_seconds: u64,
    pub shell: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command_timeout_seconds: 30,
            shell: if cfg!(windows) { "cmd" } else { "sh" }.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cli_timeout() -> u64 {
    600
}

impl AgentConfig {
    /// Load from an explicit TOML file (must exist) or the first default path found,
    /// then apply `AGENT__SECTION__KEY` environment overrides.
    pub fn load(config_path: Option<&str>) -> AgentResult<Self> {
        let mut builder = ConfigBuilder::builder();

        match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(AgentError::Configuration(format!(
                        "config file not found: {path}"
                    )));
                }
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            None => {
                if let Some(path) = DEFAULT_CONFIG_PATHS
                    .iter()
                    .find(|path| Path::new(path).exists())
                {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("AGENT")
                .separator("__")
                .try_parsing(true),
        );

        let config: AgentConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> AgentResult<Self> {
        let config: AgentConfig = toml::from_str(toml_str)
            .map_err(|e| AgentError::Configuration(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> AgentResult<String> {
        toml::to_string_pretty(self).map_err(|e| AgentError::Serialization(e.to_string()))
    }

    /// Validate and write the settings to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> AgentResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}

impl ConfigValidator for AgentConfig {
    fn validate(&self) -> AgentResult<()> {
        self.coordinator.validate()?;
        self.agent.validate()?;
        self.tools.validate()?;
        self.debug.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

impl ConfigValidator for CoordinatorConfig {
    fn validate(&self) -> AgentResult<()> {
        ValidationUtils::validate_url(&self.base_url, "coordinator.base_url")?;
        ValidationUtils::validate_seconds(
            self.request_timeout_seconds,
            "coordinator.request_timeout_seconds",
            300,
        )?;
        if let Some(key) = &self.api_key {
            ValidationUtils::validate_not_empty(key, "coordinator.api_key")?;
        }
        Ok(())
    }
}

impl ConfigValidator for RuntimeConfig {
    fn validate(&self) -> AgentResult<()> {
        ValidationUtils::validate_seconds(
            self.heartbeat_interval_seconds,
            "agent.heartbeat_interval_seconds",
            MAX_TIMEOUT_SECONDS,
        )?;
        ValidationUtils::validate_seconds(
            self.poll_interval_seconds,
            "agent.poll_interval_seconds",
            MAX_TIMEOUT_SECONDS,
        )?;
        ValidationUtils::validate_seconds(
            self.reconnect_delay_seconds,
            "agent.reconnect_delay_seconds",
            MAX_TIMEOUT_SECONDS,
        )?;
        ValidationUtils::validate_seconds(
            self.shutdown_grace_seconds,
            "agent.shutdown_grace_seconds",
            60,
        )?;
        if self.report_retries == 0 {
            return Err(AgentError::Configuration(
                "agent.report_retries must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl ConfigValidator for ToolsConfig {
    fn validate(&self) -> AgentResult<()> {
        ValidationUtils::validate_seconds(
            self.probe_timeout_seconds,
            "tools.probe_timeout_seconds",
            60,
        )?;
        ValidationUtils::validate_seconds(
            self.http_probe_timeout_seconds,
            "tools.http_probe_timeout_seconds",
            60,
        )?;
        for (name, tool) in [
            ("tools.claude_code", &self.claude_code),
            ("tools.codex", &self.codex),
            ("tools.gemini", &self.gemini),
        ] {
            ValidationUtils::validate_not_empty(&tool.binary, &format!("{name}.binary"))?;
            ValidationUtils::validate_seconds(
                tool.timeout_seconds,
                &format!("{name}.timeout_seconds"),
                MAX_TIMEOUT_SECONDS,
            )?;
        }
        ValidationUtils::validate_url(&self.ollama.base_url, "tools.ollama.base_url")?;
        ValidationUtils::validate_seconds(
            self.ollama.timeout_seconds,
            "tools.ollama.timeout_seconds",
            MAX_TIMEOUT_SECONDS,
        )?;
        Ok(())
    }
}

impl ConfigValidator for DebugConfig {
    fn validate(&self) -> AgentResult<()> {
        ValidationUtils::validate_not_empty(&self.shell, "debug.shell")?;
        ValidationUtils::validate_seconds(
            self.command_timeout_seconds,
            "debug.command_timeout_seconds",
            600,
        )
    }
}

impl ConfigValidator for LoggingConfig {
    fn validate(&self) -> AgentResult<()> {
        ValidationUtils::validate_one_of(
            &self.level,
            "logging.level",
            &["trace", "debug", "info", "warn", "error"],
        )?;
        ValidationUtils::validate_one_of(&self.format, "logging.format", &["json", "pretty"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.agent.heartbeat_interval_seconds, 30);
        assert_eq!(config.agent.poll_interval_seconds, 10);
        assert_eq!(config.agent.reconnect_delay_seconds, 5);
        assert_eq!(config.tools.probe_timeout_seconds, 5);
        assert_eq!(config.tools.http_probe_timeout_seconds, 3);
        assert_eq!(config.debug.command_timeout_seconds, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AgentConfig::from_toml(
            r#"
            [coordinator]
            base_url = "https://coord.example.com/api"
            api_key = "wk_test"

            [tools.codex]
            binary = "/opt/bin/codex"
            "#,
        )
        .unwrap();

        assert_eq!(config.coordinator.base_url, "https://coord.example.com/api");
        assert_eq!(config.coordinator.api_key.as_deref(), Some("wk_test"));
        assert_eq!(config.tools.codex.binary, "/opt/bin/codex");
        assert!(config.tools.codex.enabled);
        assert_eq!(config.tools.codex.timeout_seconds, 600);
        assert_eq!(config.agent.heartbeat_interval_seconds, 30);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = AgentConfig::default();
        config.agent.poll_interval_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.coordinator.base_url = "coordinator:8080".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_output_redacts_api_key() {
        let mut config = AgentConfig::default();
        config.coordinator.api_key = Some("super-secret".to_string());
        let printed = format!("{:?}", config);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("[REDACTED]"));
    }

    #[test]
    fn test_save_and_load_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agent.toml");

        let mut config = AgentConfig::default();
        config.agent.heartbeat_interval_seconds = 45;
        config.tools.ollama.default_model = Some("llama3".to_string());
        config.save(&path).unwrap();

        let loaded = AgentConfig::load(path.to_str()).unwrap();
        assert_eq!(loaded.agent.heartbeat_interval_seconds, 45);
        assert_eq!(loaded.tools.ollama.default_model.as_deref(), Some("llama3"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = AgentConfig::load(Some("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
    }
}
