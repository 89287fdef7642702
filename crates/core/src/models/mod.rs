//! # 数据模型
//!
//! Worker Agent 的核心数据结构：机器身份、工具能力、连接状态、任务分配与结果、
//! 心跳负载，以及与协调器之间的 HTTP / WebSocket 消息格式。
//!
//! ## 连接状态流转
//! ```text
//! Disconnected → Connecting → Online ⇄ Busy
//!                    ↓           ↓
//!                  Error ←───────┘
//! ```
//!
//! 所有模型实现 `serde` 序列化；入站字段同时接受 `snake_case` 与 `camelCase`。

pub mod event;
pub mod message;
pub mod task;
pub mod worker;

pub use event::*;
pub use message::*;
pub use task::*;
pub use worker::*;
