//! Subprocess runner with a hard wall-clock limit.
//!
//! The child is killed (not abandoned) when the limit is hit, and
//! `kill_on_drop` covers callers that drop the future mid-run.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            stdin: None,
            timeout,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.current_dir = dir;
        self
    }

    pub fn stdin(mut self, input: Option<String>) -> Self {
        self.stdin = input;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Spawn failures (binary missing, bad cwd) are returned as `Err`; everything
/// after a successful spawn is reported through `ProcessOutcome`.
pub async fn run_bounded(spec: &ProcessSpec) -> std::io::Result<ProcessOutcome> {
    let started = Instant::now();

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;
    debug!("Spawned {} (pid {:?})", spec.program, child.id());

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let run = async {
        let write_stdin = async {
            if let (Some(mut pipe), Some(input)) = (stdin, spec.stdin.as_deref()) {
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    debug!("Child closed stdin early: {}", e);
                }
            }
        };
        tokio::join!(
            write_stdin,
            drain(stdout, &mut stdout_buf),
            drain(stderr, &mut stderr_buf)
        );
        child.wait().await
    };

    let waited = tokio::time::timeout(spec.timeout, run).await;
    let status = match waited {
        Ok(status) => Some(status?),
        Err(_) => None,
    };

    let outcome = match status {
        Some(status) => ProcessOutcome {
            exit_code: status.code(),
            success: status.success(),
            stdout: lossy(&stdout_buf),
            stderr: lossy(&stderr_buf),
            timed_out: false,
            duration: started.elapsed(),
        },
        None => {
            warn!(
                "{} exceeded {:?}, killing process",
                spec.program, spec.timeout
            );
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {}: {}", spec.program, e);
            }
            ProcessOutcome {
                exit_code: None,
                success: false,
                stdout: lossy(&stdout_buf),
                stderr: lossy(&stderr_buf),
                timed_out: true,
                duration: started.elapsed(),
            }
        }
    };

    Ok(outcome)
}

/// Reads the pipe to EOF so the child never blocks or sees a closed pipe.
/// Bytes past the capture limit are read and discarded.
async fn drain<R>(pipe: Option<R>, buf: &mut Vec<u8>)
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = MAX_CAPTURE_BYTES.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                debug!("Stopped reading child output: {}", e);
                break;
            }
        }
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
