//! Execution service
//!
//! Runs the configured command for a job and streams its output line by
//! line. stdout and stderr are both forwarded; the exit status decides the
//! job result.

use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_core::domain::job::JobDescriptor;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Environment variable carrying the job id into the command
pub const JOB_ID_ENV: &str = "COURIER_JOB_ID";

/// Service trait for executing jobs
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Executes a job
    ///
    /// # Arguments
    /// * `job` - The job to execute
    /// * `lines` - Receives output lines while the job runs
    ///
    /// # Returns
    /// Whether the job succeeded
    async fn execute(&self, job: &JobDescriptor, lines: mpsc::Sender<String>) -> Result<bool>;
}

/// Runs a shell command per job
pub struct CommandExecutionService {
    command: String,
    timeout: Duration,
}

impl CommandExecutionService {
    /// Creates a new command execution service
    ///
    /// # Arguments
    /// * `command` - Shell command, run with `sh -c`
    /// * `timeout` - Time after which the command is killed
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ExecutionService for CommandExecutionService {
    async fn execute(&self, job: &JobDescriptor, lines: mpsc::Sender<String>) -> Result<bool> {
        debug!("Running `{}` for job {}", self.command, job);

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env(JOB_ID_ENV, job.identifier())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn `{}`", self.command))?;

        let stdout = child.stdout.take().context("stdout not captured")?;
        let stderr = child.stderr.take().context("stderr not captured")?;

        let waited = tokio::time::timeout(self.timeout, async {
            let (status, _, _) = tokio::join!(
                child.wait(),
                forward_lines(stdout, lines.clone()),
                forward_lines(stderr, lines.clone()),
            );
            status
        })
        .await;

        match waited {
            Ok(status) => {
                let status = status.context("Failed to wait for command")?;
                debug!("Job {} exited with {}", job, status);
                Ok(status.success())
            }
            Err(_) => {
                warn!("Job {} exceeded {:?}, killing it", job, self.timeout);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill command for job {}: {}", job, e);
                }
                let _ = lines
                    .send(format!("job timed out after {:?}", self.timeout))
                    .await;
                Ok(false)
            }
        }
    }
}

/// Sends each line of `reader` until EOF or until the receiver is gone
async fn forward_lines<R>(reader: R, lines: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader).lines();
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                if lines.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read command output: {}", e);
                break;
            }
        }
    }
}
