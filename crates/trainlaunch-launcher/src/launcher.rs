//! Job launcher: prepare, render, persist, submit.
//!
//! Each phase is exposed separately so it can be exercised without a real
//! cluster; [`JobLauncher::launch`] runs them in order.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use trainlaunch_core::{LaunchConfig, LaunchPlan, SchedulerEnv, Script};

use crate::backend::{JobHandle, SubmissionBackend, SubmissionRequest};
use crate::error::LaunchError;

/// Launches one training job described by a validated plan.
pub struct JobLauncher<B> {
    plan: LaunchPlan,
    backend: B,
}

impl<B: SubmissionBackend> JobLauncher<B> {
    pub fn new(plan: LaunchPlan, backend: B) -> Self {
        Self { plan, backend }
    }

    /// Validate `config` against the scheduler environment and build a launcher.
    ///
    /// Fails before touching the filesystem if the configuration is invalid.
    pub fn from_config(
        config: LaunchConfig,
        scheduler: SchedulerEnv,
        backend: B,
    ) -> Result<Self, LaunchError> {
        let plan = config.resolve(scheduler)?;
        for adj in &plan.adjustments {
            warn!(
                field = adj.field,
                configured = adj.configured,
                scheduler = adj.scheduler,
                "Scheduler allocation differs from configuration; using scheduler value"
            );
        }
        Ok(Self::new(plan, backend))
    }

    pub fn plan(&self) -> &LaunchPlan {
        &self.plan
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Create the results directory. Succeeds if it already exists.
    pub async fn prepare(&self) -> Result<PathBuf, LaunchError> {
        let dir = self.plan.results_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| LaunchError::io("create results directory", &dir, e))?;
        info!(results_dir = %dir.display(), "Results directory ready");
        Ok(dir)
    }

    /// Render the job script.
    pub fn render(&self) -> Script {
        self.plan.run_script()
    }

    /// Write `script` to `path`, replacing any previous file, and mark it executable.
    pub async fn persist(&self, script: &Script, path: &Path) -> Result<(), LaunchError> {
        tokio::fs::write(path, script.render())
            .await
            .map_err(|e| LaunchError::io("write job script", path, e))?;
        #[cfg(unix)]
        tokio::fs::set_permissions(
            path,
            <std::fs::Permissions as std::os::unix::fs::PermissionsExt>::from_mode(0o755),
        )
        .await
        .map_err(|e| LaunchError::io("set permissions on job script", path, e))?;
        info!(path = %path.display(), "Job script written");
        Ok(())
    }

    /// Launcher invocation that runs the persisted script at `script_mount`.
    pub fn submission(&self, script_mount: &Path) -> SubmissionRequest {
        SubmissionRequest::srun(&self.plan, script_mount)
    }

    /// Hand a request to the backend. No retries.
    pub async fn submit(&self, request: &SubmissionRequest) -> Result<JobHandle, LaunchError> {
        self.backend.submit(request).await
    }

    /// Run every phase in order.
    pub async fn launch(&self) -> Result<JobHandle, LaunchError> {
        info!(
            identity = %self.plan.identity,
            nodes = self.plan.job.nodes,
            gpus_per_node = self.plan.job.gpus_per_node,
            tasks = self.plan.task_count(),
            job_id = ?self.plan.scheduler.job_id,
            node_rank = ?self.plan.scheduler.node_rank,
            "Launching training job"
        );

        self.prepare().await?;
        let script = self.render();
        self.persist(&script, &self.plan.script_path()).await?;
        let request = self.submission(&self.plan.script_mount());
        let handle = self.submit(&request).await?;

        info!(
            identity = %self.plan.identity,
            job_id = ?handle.job_id,
            exit_code = handle.exit_code,
            "Training job finished"
        );
        Ok(handle)
    }
}
