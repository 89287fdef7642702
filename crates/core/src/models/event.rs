use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ConnectionState;

/// 事件日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// 推送给宿主界面的事件（status-changed / log-emitted）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum AgentEvent {
    StatusChanged {
        state: ConnectionState,
    },
    LogEmitted {
        level: EventLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl AgentEvent {
    pub fn log(level: EventLevel, message: impl Into<String>) -> Self {
        AgentEvent::LogEmitted {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
