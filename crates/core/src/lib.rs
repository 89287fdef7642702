//! Worker Agent 核心类型：数据模型、推送通道消息、错误与配置。

pub mod config;
pub mod errors;
pub mod models;

pub use config::{AgentConfig, ConfigValidator};
pub use errors::*;
pub use models::*;
