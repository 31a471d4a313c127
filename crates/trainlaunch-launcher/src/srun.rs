//! Launcher backend that runs the submission command as a subprocess.
//!
//! The job's own output is redirected to files by the launcher; whatever the
//! launcher itself prints is forwarded to tracing line by line.

use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{JobHandle, SubmissionBackend, SubmissionRequest};
use crate::error::LaunchError;

/// Runs `srun` (or any compatible launcher) and waits for it to exit.
#[derive(Debug, Clone, Default)]
pub struct SrunBackend {
    /// Extra variables for the launcher process, on top of the request's exports.
    env_vars: Vec<(String, String)>,
}

impl SrunBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl SubmissionBackend for SrunBackend {
    async fn submit(&self, request: &SubmissionRequest) -> Result<JobHandle, LaunchError> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }
        for var in &request.env {
            cmd.env(&var.name, &var.value);
        }

        info!(
            program = %request.program,
            job_id = ?request.job_id,
            exports = ?request.env,
            "Spawning launcher"
        );
        debug!(command = %request.command_line(), "Full launcher command");

        let submitted_at = Utc::now();
        let mut child = cmd.spawn().map_err(|e| {
            error!(program = %request.program, error = %e, "Failed to spawn launcher");
            LaunchError::Spawn {
                program: request.program.clone(),
                source: e,
            }
        })?;

        let stdout = child.stdout.take().map(|s| forward_lines(s, "stdout"));
        let stderr = child.stderr.take().map(|s| forward_lines(s, "stderr"));

        let status = child.wait().await.map_err(|e| LaunchError::Spawn {
            program: request.program.clone(),
            source: e,
        })?;

        // Drain the readers so launcher output lands before our own exit log.
        for reader in [stdout, stderr].into_iter().flatten() {
            let _ = reader.await;
        }

        let exit_code = status.code();
        info!(
            program = %request.program,
            exit_code = ?exit_code,
            success = status.success(),
            "Launcher exited"
        );

        if !status.success() {
            return Err(LaunchError::LauncherFailed {
                program: request.program.clone(),
                code: exit_code,
                signal: exit_signal(&status),
            });
        }

        Ok(JobHandle {
            program: request.program.clone(),
            job_id: request.job_id.clone(),
            exit_code: exit_code.unwrap_or(0),
            submitted_at,
        })
    }
}

/// Forward each non-empty line of a child stream to tracing.
pub(crate) fn forward_lines<R>(stream: R, name: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if name == "stderr" {
                        warn!(stream = name, line = %trimmed, "launcher");
                    } else {
                        info!(stream = name, line = %trimmed, "launcher");
                    }
                }
                Ok(None) => break, // EOF
                Err(e) => {
                    error!(stream = name, error = %e, "Error reading launcher output");
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
pub(crate) fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
pub(crate) fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
