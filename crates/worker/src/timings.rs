use std::time::Duration;

use scheduler_core::AgentConfig;

/// 运行时定时参数，由配置转换而来；测试可直接构造毫秒级的值
#[derive(Debug, Clone)]
pub struct AgentTimings {
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub shutdown_grace: Duration,
    pub request_timeout: Duration,
    pub debug_command_timeout: Duration,
    pub report_retries: u32,
}

impl Default for AgentTimings {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for AgentTimings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(config.agent.heartbeat_interval_seconds),
            poll_interval: Duration::from_secs(config.agent.poll_interval_seconds),
            reconnect_delay: Duration::from_secs(config.agent.reconnect_delay_seconds),
            shutdown_grace: Duration::from_secs(config.agent.shutdown_grace_seconds),
            request_timeout: Duration::from_secs(config.coordinator.request_timeout_seconds),
            debug_command_timeout: Duration::from_secs(config.debug.command_timeout_seconds),
            report_retries: config.agent.report_retries,
        }
    }
}
