use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use scheduler_core::config::CliToolConfig;
use scheduler_core::{ExecutionMetadata, TaskAssignment, ToolCapability};
use tracing::{debug, info, warn};

use super::{ToolAdapter, ToolError, ToolOutput};
use crate::process::{run_bounded, ProcessSpec};

const STDERR_EXCERPT_CHARS: usize = 2000;

type ArgsBuilder = fn(&TaskAssignment) -> Vec<String>;

/// Adapter for a command-line tool: probed with a version flag, run with the
/// task description as its prompt argument.
pub struct CliAdapter {
    id: String,
    display_name: String,
    binary: String,
    version_args: Vec<String>,
    exec_args: ArgsBuilder,
    timeout: Duration,
    probe_timeout: Duration,
}

impl CliAdapter {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        binary: impl Into<String>,
        exec_args: ArgsBuilder,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            binary: binary.into(),
            version_args: vec!["--version".to_string()],
            exec_args,
            timeout: Duration::from_secs(600),
            probe_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_version_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.version_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn claude_code(config: &CliToolConfig, probe_timeout: Duration) -> Self {
        Self::new("claude-code", "Claude Code", &config.binary, |task| {
            vec!["-p".to_string(), task.description.clone()]
        })
        .with_timeout(Duration::from_secs(config.timeout_seconds))
        .with_probe_timeout(probe_timeout)
    }

    pub fn codex(config: &CliToolConfig, probe_timeout: Duration) -> Self {
        Self::new("codex", "Codex CLI", &config.binary, |task| {
            vec!["exec".to_string(), task.description.clone()]
        })
        .with_timeout(Duration::from_secs(config.timeout_seconds))
        .with_probe_timeout(probe_timeout)
    }

    pub fn gemini_cli(config: &CliToolConfig, probe_timeout: Duration) -> Self {
        Self::new("gemini-cli", "Gemini CLI", &config.binary, |task| {
            vec!["-p".to_string(), task.description.clone()]
        })
        .with_timeout(Duration::from_secs(config.timeout_seconds))
        .with_probe_timeout(probe_timeout)
    }

    /// The task may shorten the limit through `timeout_seconds`, never extend it.
    fn effective_timeout(&self, assignment: &TaskAssignment) -> Duration {
        assignment
            .timeout_override_seconds()
            .map(Duration::from_secs)
            .map_or(self.timeout, |requested| requested.min(self.timeout))
    }
}

#[async_trait]
impl ToolAdapter for CliAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn probe(&self) -> ToolCapability {
        let spec = ProcessSpec::new(&self.binary, self.probe_timeout).args(self.version_args.clone());
        match run_bounded(&spec).await {
            Ok(outcome) if outcome.success => {
                let version = first_line(&outcome.stdout).or_else(|| first_line(&outcome.stderr));
                ToolCapability::available(&self.id, &self.display_name, version)
            }
            Ok(outcome) => {
                debug!(
                    "{} version check failed (exit {:?}, timed out: {})",
                    self.binary, outcome.exit_code, outcome.timed_out
                );
                ToolCapability::unavailable(&self.id, &self.display_name)
            }
            Err(e) => {
                debug!("{} not runnable: {}", self.binary, e);
                ToolCapability::unavailable(&self.id, &self.display_name)
            }
        }
    }

    async fn run(&self, assignment: &TaskAssignment) -> Result<ToolOutput, ToolError> {
        let limit = self.effective_timeout(assignment);
        let spec = ProcessSpec::new(&self.binary, limit)
            .args((self.exec_args)(assignment))
            .current_dir(assignment.working_directory().map(PathBuf::from));

        info!(
            task_id = %assignment.task_id,
            tool = %self.id,
            "Running {} with a {:?} limit",
            self.binary,
            limit
        );

        let outcome = run_bounded(&spec).await.map_err(|e| ToolError::Spawn {
            tool: self.id.clone(),
            message: e.to_string(),
        })?;

        if outcome.timed_out {
            warn!(task_id = %assignment.task_id, tool = %self.id, "Tool killed at timeout");
            return Err(ToolError::Timeout {
                tool: self.id.clone(),
                limit,
            });
        }

        if !outcome.success {
            let diagnostics = if outcome.stderr.trim().is_empty() {
                &outcome.stdout
            } else {
                &outcome.stderr
            };
            return Err(ToolError::NonZeroExit {
                tool: self.id.clone(),
                code: outcome.exit_code,
                stderr: excerpt(diagnostics),
            });
        }

        Ok(ToolOutput {
            output: outcome.stdout,
            metadata: ExecutionMetadata::Cli {
                tool: self.id.clone(),
                duration_ms: outcome.duration.as_millis() as u64,
                exit_code: outcome.exit_code,
            },
        })
    }
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= STDERR_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let tail: String = trimmed
        .chars()
        .rev()
        .take(STDERR_EXCERPT_CHARS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}
