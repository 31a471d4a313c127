//! Submission backend abstraction.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trainlaunch_core::{shell_escape, ExportVar, JobId, LaunchPlan};

use crate::error::LaunchError;

/// A fully-rendered launcher invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    /// Launcher program (e.g. `srun`).
    pub program: String,

    /// Arguments after the program name.
    pub args: Vec<String>,

    /// Variables set on the launcher process and propagated into the job.
    pub env: Vec<ExportVar>,

    /// Scheduler job this submission runs under, if already inside one.
    pub job_id: Option<JobId>,
}

impl SubmissionRequest {
    /// Build the `srun` invocation that runs `script_mount` inside the container.
    ///
    /// Exported values travel in the launcher's environment and are named in
    /// `--export`, so secrets never appear on the command line.
    ///
    /// The job shape is always passed. Outside an allocation srun requests
    /// one itself, so partition, account, and time limit are passed too.
    pub fn srun(plan: &LaunchPlan, script_mount: &Path) -> Self {
        let env = plan.exports();
        let export = std::iter::once("ALL".to_string())
            .chain(env.iter().map(|var| var.name.clone()))
            .collect::<Vec<_>>()
            .join(",");

        let shape = if plan.scheduler.in_allocation() {
            plan.job.step_shape()
        } else {
            plan.job.directives()
        };

        let mut args = shape.to_args();
        args.extend([
            "--output".to_string(),
            plan.stdout_template().display().to_string(),
            "--error".to_string(),
            plan.stderr_template().display().to_string(),
            "--container-image".to_string(),
            plan.image.clone(),
            "--container-mounts".to_string(),
            plan.paths.mount_list(),
            "--container-workdir".to_string(),
            plan.workdir().display().to_string(),
            format!("--export={export}"),
            "bash".to_string(),
            script_mount.display().to_string(),
        ]);

        Self {
            program: plan.launcher.clone(),
            args,
            env,
            job_id: plan.scheduler.job_id.clone(),
        }
    }

    /// Value following `flag` in the argument list.
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Shell-quoted command line, for logs and dry runs.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|word| shell_escape(word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    /// Launcher program that accepted the job.
    pub program: String,

    /// Scheduler job id, when known.
    pub job_id: Option<JobId>,

    /// Launcher exit code.
    pub exit_code: i32,

    /// When the launcher was started.
    pub submitted_at: DateTime<Utc>,
}

/// Something that can hand a rendered job to the cluster.
///
/// Implementations must not retry: a failed launcher is reported as
/// [`LaunchError::LauncherFailed`] with its exit status untouched.
#[async_trait]
pub trait SubmissionBackend: Send + Sync {
    async fn submit(&self, request: &SubmissionRequest) -> Result<JobHandle, LaunchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainlaunch_core::{LaunchConfig, SchedulerEnv};

    fn plan() -> LaunchPlan {
        let mut config = LaunchConfig::default();
        config.storage.root = Some("/gpfs/megatron".into());
        config.tracking.token = Some("secret-token".to_string());
        config.container.image = "registry#team/image:tag".to_string();
        config
            .resolve(SchedulerEnv {
                job_id: Some(JobId::new("77")),
                ..SchedulerEnv::default()
            })
            .unwrap()
    }

    #[test]
    fn test_srun_arguments() {
        let plan = plan();
        let request = SubmissionRequest::srun(&plan, &plan.script_mount());

        assert_eq!(request.program, "srun");
        assert_eq!(
            request.arg_value("--output"),
            Some("/gpfs/megatron/nemo/Draco-RNO_nodes_2_gpus_16/slurm-%j-%n.out")
        );
        assert_eq!(
            request.arg_value("--error"),
            Some("/gpfs/megatron/nemo/Draco-RNO_nodes_2_gpus_16/error-%j-%n.out")
        );
        assert_eq!(
            request.arg_value("--container-image"),
            Some("registry#team/image:tag")
        );
        assert_eq!(request.arg_value("--container-workdir"), Some("/code"));
        assert_eq!(request.arg_value("bash"), Some("/result/Draco-RNO_nodes_2_gpus_16/job_script.sh"));
        assert!(request.args.contains(&"--export=ALL,WANDB,PYTHONPATH".to_string()));
        assert_eq!(request.job_id, Some(JobId::new("77")));
    }

    #[test]
    fn test_mounts_have_three_distinct_targets() {
        let plan = plan();
        let request = SubmissionRequest::srun(&plan, &plan.script_mount());
        let mounts: Vec<&str> = request
            .arg_value("--container-mounts")
            .unwrap()
            .split(',')
            .collect();
        assert_eq!(mounts.len(), 3);

        let mut targets: Vec<&str> = mounts
            .iter()
            .map(|m| m.rsplit_once(':').unwrap().1)
            .collect();
        targets.sort_unstable();
        targets.dedup();
        assert_eq!(targets, vec!["/code", "/data", "/result"]);
    }

    #[test]
    fn test_shape_inside_allocation() {
        let plan = plan();
        let request = SubmissionRequest::srun(&plan, &plan.script_mount());
        assert_eq!(
            request.args[..3],
            ["--nodes=2", "--ntasks-per-node=16", "--gpus-per-node=16"]
        );
        assert!(!request.args.iter().any(|a| a.starts_with("--partition")));
    }

    #[test]
    fn test_shape_outside_allocation() {
        let mut config = LaunchConfig::default();
        config.storage.root = Some("/gpfs/megatron".into());
        config.tracking.token = Some("secret-token".to_string());
        config.job.account = "chem".to_string();
        let plan = config.resolve(SchedulerEnv::default()).unwrap();
        let request = SubmissionRequest::srun(&plan, &plan.script_mount());

        for expected in [
            "--nodes=2",
            "--ntasks=32",
            "--ntasks-per-node=16",
            "--gpus-per-node=16",
            "--partition=batch",
            "--account=chem",
            "--time=8:00:00",
        ] {
            assert!(request.args.contains(&expected.to_string()), "missing {expected}");
        }
        // Launcher options come before the program it runs.
        let bash = request.args.iter().position(|a| a == "bash").unwrap();
        let nodes = request.args.iter().position(|a| a == "--nodes=2").unwrap();
        assert!(nodes < bash);
    }

    #[test]
    fn test_secret_not_on_command_line() {
        let plan = plan();
        let request = SubmissionRequest::srun(&plan, &plan.script_mount());
        assert!(!request.command_line().contains("secret-token"));
        assert!(request.env.iter().any(|var| var.value == "secret-token"));
    }
}
