use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scheduler_agent::common::{
    forward_events, init_logging, load_config, wait_for_shutdown_signal, StartupConfig,
};
use scheduler_agent::AgentHost;
use scheduler_core::ToolCapability;
use scheduler_worker::resolve_machine_id;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const DEFAULT_SETTINGS_PATH: &str = "config/agent.toml";

/// Worker Agent 命令行入口
#[derive(Parser, Debug)]
#[command(name = "scheduler-agent")]
#[command(version)]
#[command(about = "Worker agent that runs coding-assistant tasks for a coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径
    #[arg(short, long, global = true, env = "AGENT_CONFIG")]
    config: Option<String>,

    /// 日志级别
    #[arg(short, long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式
    #[arg(long, global = true, value_parser = ["json", "pretty"])]
    log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 注册并运行 Worker，直到收到 Ctrl+C / SIGTERM
    Run {
        /// 以 JSON 行输出 status-changed / log-emitted 事件
        #[arg(long)]
        events: bool,
    },
    /// 探测本机可用的工具
    Probe,
    /// 打印本机的 machine id
    Identity,
    /// 登录协调器并打印访问令牌
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "AGENT_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let startup_config = StartupConfig {
        config_path: cli.config.clone(),
        log_level: cli.log_level.clone(),
        log_format: cli.log_format.clone(),
    };
    let config = load_config(&startup_config)?;
    let (log_level, log_format) = startup_config.logging(&config);
    init_logging(log_level, log_format)?;

    let settings_path = startup_config
        .config_path
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH));

    match cli.command {
        Commands::Identity => {
            println!("{}", resolve_machine_id());
            Ok(())
        }
        Commands::Probe => {
            let host = AgentHost::new(config, settings_path).context("failed to build agent")?;
            print_capabilities(&host.probe_tools().await);
            Ok(())
        }
        Commands::Login { username, password } => {
            let host = AgentHost::new(config, settings_path).context("failed to build agent")?;
            let response = host
                .login(&username, &password)
                .await
                .context("login failed")?;
            println!("{}", response.token);
            Ok(())
        }
        Commands::Run { events } => {
            let host = AgentHost::new(config, settings_path).context("failed to build agent")?;
            run_worker(Arc::new(host), events).await
        }
    }
}

async fn run_worker(host: Arc<AgentHost>, print_events: bool) -> Result<()> {
    let (stop_tx, _) = broadcast::channel(1);

    let printer = print_events.then(|| {
        let events = host.subscribe();
        let stop_rx = stop_tx.subscribe();
        tokio::spawn(forward_events(events, stop_rx, std::io::stdout()))
    });

    info!("Starting worker agent");
    if let Err(e) = host.start_worker().await {
        error!("Worker failed to start: {}", e);
        let _ = host.stop_worker().await;
        let _ = stop_tx.send(());
        return Err(e).context("worker failed to start");
    }

    wait_for_shutdown_signal().await;
    info!("Shutting down worker agent");

    if let Err(e) = host.stop_worker().await {
        warn!("Worker did not stop cleanly: {}", e);
    }
    let _ = stop_tx.send(());

    if let Some(printer) = printer {
        let _ = printer.await;
    }
    info!("Worker agent exited");
    Ok(())
}

fn print_capabilities(capabilities: &[ToolCapability]) {
    println!("{:<12} {:<14} {:<10} VERSION", "ID", "NAME", "AVAILABLE");
    for capability in capabilities {
        println!(
            "{:<12} {:<14} {:<10} {}",
            capability.id,
            capability.display_name,
            capability.available,
            capability.version.as_deref().unwrap_or("-"),
        );
    }
}
