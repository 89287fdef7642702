use thiserror::Error;

use crate::models::ConnectionState;

/// Agent错误类型定义
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("coordinator returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not authenticated, call login first")]
    NotAuthenticated,

    #[error("worker registration failed: {0}")]
    Registration(String),

    #[error("no tool runtimes available on this host")]
    NoToolsAvailable,

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("worker is already running")]
    AlreadyRunning,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Startup failures keep the agent out of the online state.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            AgentError::Registration(_)
                | AgentError::NoToolsAvailable
                | AgentError::NotAuthenticated
                | AgentError::Authentication(_)
        )
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::Configuration(e.to_string())
    }
}

/// 统一的Result类型
pub type AgentResult<T> = std::result::Result<T, AgentError>;
