//! Batch wrapper submission via `sbatch`.
//!
//! The wrapper carries the `#SBATCH` directives derived from the `JobSpec` and
//! re-invokes `trainlaunch submit` once the allocation starts, so the scheduler
//! environment is read where it actually exists.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use trainlaunch_core::{shell_escape, ExportVar, JobId, LaunchPlan, SchedulerDirectives};

use crate::backend::{JobHandle, SubmissionBackend, SubmissionRequest};
use crate::error::LaunchError;
use crate::srun::exit_signal;

/// `sbatch` batch script for one experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchWrapper {
    directives: SchedulerDirectives,
    command: Vec<String>,
}

impl BatchWrapper {
    /// Wrap `command` (the `trainlaunch ... submit` invocation) for `plan`.
    pub fn new(plan: &LaunchPlan, command: Vec<String>) -> Self {
        let mut directives = plan.job.directives();
        let log = plan
            .paths
            .output_dir
            .join(format!("{}-batch-%j.out", plan.identity));
        directives.push("output", log.display().to_string());
        Self {
            directives,
            command,
        }
    }

    /// Where the wrapper is written: `<output_dir>/<identity>.sbatch`.
    pub fn path_for(plan: &LaunchPlan) -> PathBuf {
        plan.paths
            .output_dir
            .join(format!("{}.sbatch", plan.identity))
    }

    pub fn directives(&self) -> &SchedulerDirectives {
        &self.directives
    }

    pub fn render(&self) -> String {
        let command = self
            .command
            .iter()
            .map(|word| shell_escape(word))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "#!/bin/bash\n{}\nset -euo pipefail\n\nexec {command}\n",
            self.directives.render()
        )
    }
}

impl SubmissionRequest {
    /// Build the `sbatch --parsable` invocation for a written wrapper.
    pub fn sbatch(wrapper: &Path, env: Vec<ExportVar>) -> Self {
        Self {
            program: "sbatch".to_string(),
            args: vec!["--parsable".to_string(), wrapper.display().to_string()],
            env,
            job_id: None,
        }
    }
}

/// Submits batch wrappers and reports the scheduler-assigned job id.
#[derive(Debug, Clone, Default)]
pub struct SbatchBackend;

impl SbatchBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SubmissionBackend for SbatchBackend {
    async fn submit(&self, request: &SubmissionRequest) -> Result<JobHandle, LaunchError> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for var in &request.env {
            cmd.env(&var.name, &var.value);
        }

        debug!(command = %request.command_line(), "Running sbatch");
        let submitted_at = Utc::now();
        let output = cmd.output().await.map_err(|e| {
            error!(program = %request.program, error = %e, "Failed to run sbatch");
            LaunchError::Spawn {
                program: request.program.clone(),
                source: e,
            }
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            warn!(line = %line.trim(), "sbatch");
        }

        if !output.status.success() {
            return Err(LaunchError::LauncherFailed {
                program: request.program.clone(),
                code: output.status.code(),
                signal: exit_signal(&output.status),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = JobId::from_parsable(&stdout)
            .ok_or_else(|| LaunchError::Protocol(format!("no job id in sbatch output: {:?}", stdout.trim())))?;

        info!(job_id = %job_id, "Batch job submitted");

        Ok(JobHandle {
            program: request.program.clone(),
            job_id: Some(job_id),
            exit_code: output.status.code().unwrap_or(0),
            submitted_at,
        })
    }
}
