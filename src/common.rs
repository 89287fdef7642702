use std::io::Write;

use anyhow::{Context, Result};
use scheduler_core::{AgentConfig, AgentEvent};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 命令行对配置的覆盖项
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

impl StartupConfig {
    /// 命令行优先，其次配置文件
    pub fn logging<'a>(&'a self, config: &'a AgentConfig) -> (&'a str, &'a str) {
        (
            self.log_level.as_deref().unwrap_or(&config.logging.level),
            self.log_format.as_deref().unwrap_or(&config.logging.format),
        )
    }
}

/// 初始化日志系统，`RUST_LOG` 优先于给定级别
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("failed to initialise json logging")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("failed to initialise pretty logging")?;
        }
        _ => {
            return Err(anyhow::anyhow!("unsupported log format: {log_format}"));
        }
    }

    Ok(())
}

/// 加载配置：显式路径必须存在，否则回退到默认路径与环境变量
pub fn load_config(startup_config: &StartupConfig) -> Result<AgentConfig> {
    let path = startup_config.config_path.as_deref();
    AgentConfig::load(path).with_context(|| match path {
        Some(path) => format!("failed to load config file {path}"),
        None => "failed to load configuration".to_string(),
    })
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// 将事件逐行以 JSON 写出，直到收到停止信号
///
/// 停止时先写出已发布但尚未读取的事件。
pub async fn forward_events<W: Write>(
    mut events: broadcast::Receiver<AgentEvent>,
    mut stop_rx: broadcast::Receiver<()>,
    mut out: W,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => write_event(&mut out, &event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event printer lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = stop_rx.recv() => {
                while let Ok(event) = events.try_recv() {
                    write_event(&mut out, &event);
                }
                break;
            }
        }
    }
}

fn write_event<W: Write>(out: &mut W, event: &AgentEvent) {
    match serde_json::to_string(event) {
        Ok(line) => {
            if let Err(e) = writeln!(out, "{line}") {
                warn!("Failed to write event: {}", e);
            }
        }
        Err(e) => warn!("Failed to encode event: {}", e),
    }
}
