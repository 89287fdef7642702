use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker身份信息
///
/// `machine_id` 在进程生命周期内不可变；`worker_id` 由协调器在注册成功时分配，
/// 只能写入一次。
#[derive(Debug)]
pub struct WorkerIdentity {
    machine_id: String,
    worker_id: OnceLock<String>,
}

impl WorkerIdentity {
    pub fn new(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            worker_id: OnceLock::new(),
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn worker_id(&self) -> Option<&str> {
        self.worker_id.get().map(String::as_str)
    }

    /// Returns false if a worker id was already assigned; the first one is kept.
    pub fn assign_worker_id(&self, worker_id: impl Into<String>) -> bool {
        self.worker_id.set(worker_id.into()).is_ok()
    }
}

/// 工具能力
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCapability {
    pub id: String,
    #[serde(alias = "displayName")]
    pub display_name: String,
    pub available: bool,
    pub version: Option<String>,
}

impl ToolCapability {
    pub fn available(id: &str, display_name: &str, version: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            available: true,
            version,
        }
    }

    pub fn unavailable(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            available: false,
            version: None,
        }
    }
}

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Online,
    Busy,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Online => "online",
            ConnectionState::Busy => "busy",
            ConnectionState::Error => "error",
        }
    }

    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Error, Connecting)
                | (Connecting, Online)
                | (Connecting, Error)
                | (Online, Busy)
                | (Busy, Online)
                | (Online, Error)
                | (Busy, Error)
                | (Online, Disconnected)
                | (Busy, Disconnected)
                | (Error, Disconnected)
        )
    }

    /// Online or busy: the timers and channels are running.
    pub fn is_running(&self) -> bool {
        matches!(self, ConnectionState::Online | ConnectionState::Busy)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 心跳中上报的Worker状态标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatusLabel {
    Online,
    Busy,
    Offline,
}

impl WorkerStatusLabel {
    pub fn from_current_task(current_task: Option<&str>) -> Self {
        if current_task.is_some() {
            WorkerStatusLabel::Busy
        } else {
            WorkerStatusLabel::Online
        }
    }
}

/// 资源使用率快照（百分比, 0-100）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
}

/// 心跳负载
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub status: WorkerStatusLabel,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
    pub current_task: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HeartbeatPayload {
    pub fn new(status: WorkerStatusLabel, usage: ResourceUsage, current_task: Option<String>) -> Self {
        Self {
            status,
            cpu_percent: usage.cpu_percent,
            memory_percent: usage.memory_percent,
            disk_percent: usage.disk_percent,
            current_task,
            timestamp: Utc::now(),
        }
    }
}

/// 注册时上报的静态主机信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub os_name: String,
    pub os_version: String,
    pub cpu_brand: String,
    pub cpu_cores: usize,
    pub total_memory_bytes: u64,
    pub total_disk_bytes: u64,
}
