use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 任务分配，接收后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    #[serde(alias = "taskId")]
    pub task_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "toolHint")]
    pub tool_hint: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

impl TaskAssignment {
    pub fn new(task_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            tool_hint: None,
            context: HashMap::new(),
        }
    }

    pub fn with_tool_hint(mut self, tool: impl Into<String>) -> Self {
        self.tool_hint = Some(tool.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Tool hint with blank values treated as absent.
    pub fn tool_hint(&self) -> Option<&str> {
        self.tool_hint
            .as_deref()
            .map(str::trim)
            .filter(|hint| !hint.is_empty())
    }

    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    pub fn working_directory(&self) -> Option<&str> {
        self.context_str("working_directory")
            .or_else(|| self.context_str("workingDirectory"))
    }

    pub fn timeout_override_seconds(&self) -> Option<u64> {
        self.context
            .get("timeout_seconds")
            .or_else(|| self.context.get("timeoutSeconds"))
            .and_then(Value::as_u64)
            .filter(|secs| *secs > 0)
    }
}

/// 执行元数据，按工具类型区分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionMetadata {
    Cli {
        tool: String,
        duration_ms: u64,
        exit_code: Option<i32>,
    },
    Model {
        tool: String,
        duration_ms: u64,
        model: String,
        eval_count: Option<u64>,
        prompt_eval_count: Option<u64>,
    },
}

impl ExecutionMetadata {
    pub fn tool(&self) -> &str {
        match self {
            ExecutionMetadata::Cli { tool, .. } | ExecutionMetadata::Model { tool, .. } => tool,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            ExecutionMetadata::Cli { duration_ms, .. }
            | ExecutionMetadata::Model { duration_ms, .. } => *duration_ms,
        }
    }
}

/// 任务执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success {
        output: String,
        metadata: ExecutionMetadata,
    },
    Failure {
        error_message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

impl TaskResult {
    pub fn success(task_id: impl Into<String>, output: String, metadata: ExecutionMetadata) -> Self {
        Self {
            task_id: task_id.into(),
            outcome: TaskOutcome::Success { output, metadata },
        }
    }

    pub fn failure(task_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            outcome: TaskOutcome::Failure {
                error_message: error_message.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Success { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            TaskOutcome::Failure { error_message } => Some(error_message),
            TaskOutcome::Success { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assignment_accepts_camel_case_fields() {
        let assignment: TaskAssignment = serde_json::from_value(json!({
            "taskId": "t1",
            "description": "say hi",
            "toolHint": "echoTool",
            "context": {"workingDirectory": "/tmp", "timeout_seconds": 12}
        }))
        .unwrap();

        assert_eq!(assignment.task_id, "t1");
        assert_eq!(assignment.tool_hint(), Some("echoTool"));
        assert_eq!(assignment.working_directory(), Some("/tmp"));
        assert_eq!(assignment.timeout_override_seconds(), Some(12));
    }

    #[test]
    fn blank_tool_hint_counts_as_absent() {
        let assignment = TaskAssignment::new("t2", "x").with_tool_hint("  ");
        assert_eq!(assignment.tool_hint(), None);
    }

    #[test]
    fn missing_optional_fields_default() {
        let assignment: TaskAssignment =
            serde_json::from_value(json!({"task_id": "t3"})).unwrap();
        assert!(assignment.description.is_empty());
        assert!(assignment.context.is_empty());
        assert_eq!(assignment.timeout_override_seconds(), None);
    }

    #[test]
    fn metadata_is_tagged_per_tool_kind() {
        let metadata = ExecutionMetadata::Model {
            tool: "ollama".into(),
            duration_ms: 20,
            model: "llama3".into(),
            eval_count: Some(42),
            prompt_eval_count: Some(7),
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["kind"], "model");
        assert_eq!(value["eval_count"], 42);
        assert_eq!(metadata.tool(), "ollama");
    }

    #[test]
    fn failure_result_exposes_error_message() {
        let result = TaskResult::failure("t4", "tool exited with code 2");
        assert!(!result.is_success());
        assert_eq!(result.error_message(), Some("tool exited with code 2"));
    }
}
