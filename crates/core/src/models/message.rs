use serde::{Deserialize, Serialize};

use super::{ExecutionMetadata, SystemInfo, TaskAssignment, TaskOutcome, TaskResult, ToolCapability};

/// `POST /auth/login` 请求体
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `POST /auth/login` 响应体
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "access_token", alias = "accessToken")]
    pub token: String,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
}

/// `POST /workers/register` 请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub machine_id: String,
    pub hostname: String,
    pub capabilities: Vec<ToolCapability>,
    pub system_info: SystemInfo,
}

/// `POST /workers/register` 响应体
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationResponse {
    #[serde(alias = "workerId", alias = "id")]
    pub worker_id: String,
}

/// `GET /workers/{id}/pull-task` 响应体，兼容包裹与未包裹两种格式
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PullTaskResponse {
    Wrapped { task: TaskAssignment },
    Bare(TaskAssignment),
}

impl PullTaskResponse {
    pub fn into_assignment(self) -> TaskAssignment {
        match self {
            PullTaskResponse::Wrapped { task } => task,
            PullTaskResponse::Bare(task) => task,
        }
    }
}

/// `POST /workers/{id}/task-complete` 请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleteRequest {
    pub task_id: String,
    pub output: String,
    pub metadata: ExecutionMetadata,
}

/// `POST /workers/{id}/task-failed` 请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailedRequest {
    pub task_id: String,
    pub error: String,
}

/// 结果上报：根据执行结果选择 task-complete 或 task-failed
#[derive(Debug, Clone)]
pub enum TaskReport {
    Complete(TaskCompleteRequest),
    Failed(TaskFailedRequest),
}

impl From<&TaskResult> for TaskReport {
    fn from(result: &TaskResult) -> Self {
        match &result.outcome {
            TaskOutcome::Success { output, metadata } => TaskReport::Complete(TaskCompleteRequest {
                task_id: result.task_id.clone(),
                output: output.clone(),
                metadata: metadata.clone(),
            }),
            TaskOutcome::Failure { error_message } => TaskReport::Failed(TaskFailedRequest {
                task_id: result.task_id.clone(),
                error: error_message.clone(),
            }),
        }
    }
}

impl TaskReport {
    pub fn task_id(&self) -> &str {
        match self {
            TaskReport::Complete(req) => &req.task_id,
            TaskReport::Failed(req) => &req.task_id,
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            TaskReport::Complete(_) => "task-complete",
            TaskReport::Failed(_) => "task-failed",
        }
    }
}

/// 协调器通过推送通道下发的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    TaskAssignment(TaskAssignment),
    RemoteCommand(RemoteCommand),
    Ping,
}

/// 远程调试命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCommand {
    #[serde(alias = "requestId")]
    pub request_id: String,
    pub command: String,
}

/// Agent通过推送通道发出的消息（仅 pong 与 command_result）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Pong,
    CommandResult(CommandResult),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub request_id: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}
