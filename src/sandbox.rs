//! Running the external analysis tool inside a container, with a hard
//! wall-clock timeout (`spec.md` §4.4).
//!
//! Grounded on `original_source/asdb_jobs/core.py`'s `run_process` /
//! `cancel` pair (the `asyncio.Future` + `loop.call_later` timeout race),
//! reshaped into a `tokio::select!` race the way the teacher's
//! `kernel/jobs/worker.rs::execute_with_heartbeat` races a cancellation
//! token against a tick, and behind a trait so `handler.rs` can be tested
//! without spawning real containers.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::AsdbJobsError;

/// How long a sandboxed run is allowed before it is killed.
pub const SANDBOX_TIMEOUT: Duration = Duration::from_secs(3600);

/// How the sandboxed run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxOutcome {
    Success,
    Failure,
    Timeout,
    /// Reserved for the handler's own exceptional paths (spawn failure,
    /// non-UTF-8 output); never produced by [`PodmanSandbox`] itself.
    InternalError,
}

/// The captured result of a sandboxed run.
#[derive(Debug, Clone)]
pub struct SandboxOutput {
    pub outcome: SandboxOutcome,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl SandboxOutput {
    fn success(stdout: Vec<String>, stderr: Vec<String>) -> Self {
        Self {
            outcome: SandboxOutcome::Success,
            stdout,
            stderr,
        }
    }

    fn failure(stdout: Vec<String>, stderr: Vec<String>) -> Self {
        Self {
            outcome: SandboxOutcome::Failure,
            stdout,
            stderr,
        }
    }

    fn timeout() -> Self {
        Self {
            outcome: SandboxOutcome::Timeout,
            stdout: Vec::new(),
            stderr: vec!["timeout exceeded".to_string()],
        }
    }
}

/// Runs a command line against a container, feeding it `stdin` and racing
/// it against a hard timeout. Implemented as a trait so `handler.rs` can be
/// exercised against a fake in tests.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        container_name: &str,
        cmdline: &[String],
        stdin: &str,
    ) -> Result<SandboxOutput, AsdbJobsError>;
}

/// Runs jobs in `podman` containers, killing the named container by id if
/// the timeout elapses.
pub struct PodmanSandbox {
    timeout: Duration,
}

impl PodmanSandbox {
    pub fn new() -> Self {
        Self { timeout: SANDBOX_TIMEOUT }
    }

    #[cfg(test)]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for PodmanSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessRunner for PodmanSandbox {
    async fn run(
        &self,
        container_name: &str,
        cmdline: &[String],
        stdin: &str,
    ) -> Result<SandboxOutput, AsdbJobsError> {
        let mut child = Command::new(&cmdline[0])
            .args(&cmdline[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| AsdbJobsError::InvalidJobData(format!("failed to spawn sandbox: {err}")))?;

        let mut stdin_pipe = child.stdin.take().expect("piped stdin");
        let stdin_data = stdin.as_bytes().to_vec();
        let write_result = async {
            stdin_pipe.write_all(&stdin_data).await?;
            stdin_pipe.shutdown().await
        }
        .await;
        if let Err(err) = write_result {
            warn!(container = container_name, error = %err, "failed to write sandbox stdin");
        }

        tokio::select! {
            biased;
            _ = tokio::time::sleep(self.timeout) => {
                debug!(container = container_name, "sandbox timeout elapsed, killing container");
                kill_container(container_name).await;
                let _ = child.kill().await;
                Ok(SandboxOutput::timeout())
            }
            output = read_output(&mut child) => {
                let (status, stdout, stderr) = output?;
                if status.success() {
                    Ok(SandboxOutput::success(stdout, stderr))
                } else {
                    Ok(SandboxOutput::failure(stdout, stderr))
                }
            }
        }
    }
}

async fn read_output(
    child: &mut tokio::process::Child,
) -> Result<(std::process::ExitStatus, Vec<String>, Vec<String>), AsdbJobsError> {
    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let stdout_task = tokio::spawn(read_lines(BufReader::new(stdout)));
    let stderr_task = tokio::spawn(read_lines(BufReader::new(stderr)));

    let status = child
        .wait()
        .await
        .map_err(|err| AsdbJobsError::InvalidJobData(format!("sandbox wait failed: {err}")))?;

    let stdout_lines = stdout_task
        .await
        .map_err(|err| AsdbJobsError::InvalidJobData(format!("stdout reader panicked: {err}")))?;
    let stderr_lines = stderr_task
        .await
        .map_err(|err| AsdbJobsError::InvalidJobData(format!("stderr reader panicked: {err}")))?;

    Ok((status, stdout_lines, stderr_lines))
}

async fn read_lines<R: tokio::io::AsyncRead + Unpin>(reader: BufReader<R>) -> Vec<String> {
    use tokio::io::AsyncBufReadExt;
    let mut lines = reader.lines();
    let mut out = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        out.push(line);
    }
    out
}

/// Kill the named container out of band. Best-effort: a failure here is
/// logged and otherwise ignored, since the process is being killed anyway.
async fn kill_container(container_name: &str) {
    let result = Command::new("podman")
        .args(["kill", container_name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    if let Err(err) = result {
        warn!(container = container_name, error = %err, "failed to kill container after timeout");
    }
}
