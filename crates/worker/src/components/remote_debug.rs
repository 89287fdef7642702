use std::time::Duration;

use scheduler_core::{CommandResult, RemoteCommand};
use tracing::{info, warn};

use crate::process::{run_bounded, ProcessSpec};

/// Runs operator shell commands received over the push channel. Independent of
/// the task slot, so it may run while a task executes.
pub struct RemoteDebugChannel {
    shell: String,
    command_timeout: Duration,
}

impl RemoteDebugChannel {
    pub fn new(shell: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            command_timeout,
        }
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    fn command_flag(&self) -> &'static str {
        let name = self
            .shell
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or(&self.shell)
            .to_ascii_lowercase();
        match name.as_str() {
            "cmd" | "cmd.exe" => "/C",
            "powershell" | "powershell.exe" | "pwsh" | "pwsh.exe" => "-Command",
            _ => "-c",
        }
    }

    pub async fn run(&self, command: &RemoteCommand) -> CommandResult {
        info!(request_id = %command.request_id, "Running remote command");
        let spec = ProcessSpec::new(&self.shell, self.command_timeout)
            .args([self.command_flag().to_string(), command.command.clone()]);

        match run_bounded(&spec).await {
            Ok(outcome) => {
                let mut stderr = outcome.stderr;
                if outcome.timed_out {
                    warn!(request_id = %command.request_id, "Remote command timed out");
                    if !stderr.is_empty() && !stderr.ends_with('\n') {
                        stderr.push('\n');
                    }
                    stderr.push_str(&format!(
                        "command timed out after {:?}",
                        self.command_timeout
                    ));
                }
                CommandResult {
                    request_id: command.request_id.clone(),
                    stdout: outcome.stdout,
                    stderr,
                    exit_code: outcome.exit_code,
                    timed_out: outcome.timed_out,
                }
            }
            Err(e) => {
                warn!(request_id = %command.request_id, "Failed to start {}: {}", self.shell, e);
                CommandResult {
                    request_id: command.request_id.clone(),
                    stdout: String::new(),
                    stderr: format!("failed to start {}: {e}", self.shell),
                    exit_code: None,
                    timed_out: false,
                }
            }
        }
    }
}
