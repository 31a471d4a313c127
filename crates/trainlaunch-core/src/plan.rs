//! Validated launch plan.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::TrainingConfig;
use crate::{
    DeviceList, ExperimentIdentity, Flag, JobSpec, PathSet, SchedulerEnv, Script, Step,
};

const START_BANNER: &str = "*******STARTING********";

/// A configured value replaced by what the scheduler reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvAdjustment {
    pub field: &'static str,
    pub configured: u32,
    pub scheduler: u32,
}

impl EnvAdjustment {
    pub fn new(field: &'static str, configured: u32, scheduler: u32) -> Self {
        Self {
            field,
            configured,
            scheduler,
        }
    }
}

/// An environment variable exported into the submitted job.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportVar {
    pub name: String,
    pub value: String,
    /// Hidden from logs and dry-run output.
    pub secret: bool,
}

impl ExportVar {
    /// The value as it may be shown to a human.
    pub fn display_value(&self) -> &str {
        if self.secret {
            "<redacted>"
        } else {
            &self.value
        }
    }
}

impl fmt::Debug for ExportVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportVar")
            .field("name", &self.name)
            .field("value", &self.display_value())
            .finish()
    }
}

/// Everything needed to render and submit one training job.
///
/// Produced by `LaunchConfig::resolve`; every field has been validated.
#[derive(Clone)]
pub struct LaunchPlan {
    pub job: JobSpec,
    pub paths: PathSet,
    pub identity: ExperimentIdentity,
    pub devices: DeviceList,
    pub project: String,
    pub image: String,
    pub launcher: String,
    pub training: TrainingConfig,
    pub token: String,
    pub token_var: String,
    pub login_command: String,
    pub overrides: Vec<Flag>,
    pub scheduler: SchedulerEnv,
    pub adjustments: Vec<EnvAdjustment>,
}

impl fmt::Debug for LaunchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchPlan")
            .field("job", &self.job)
            .field("identity", &self.identity)
            .field("results_dir", &self.results_dir())
            .field("image", &self.image)
            .field("launcher", &self.launcher)
            .finish_non_exhaustive()
    }
}

impl LaunchPlan {
    pub fn task_count(&self) -> u64 {
        self.job.task_count()
    }

    pub fn results_dir(&self) -> PathBuf {
        self.paths.results_dir(&self.identity)
    }

    pub fn results_mount(&self) -> PathBuf {
        self.paths.results_mount(&self.identity)
    }

    pub fn script_path(&self) -> PathBuf {
        self.paths.script_path(&self.identity)
    }

    pub fn script_mount(&self) -> PathBuf {
        self.paths.script_mount(&self.identity)
    }

    /// Container working directory.
    pub fn workdir(&self) -> &Path {
        &self.paths.code_mount
    }

    /// Launcher stdout template; `%j` is the job id and `%n` the node rank.
    pub fn stdout_template(&self) -> PathBuf {
        self.results_dir().join("slurm-%j-%n.out")
    }

    /// Launcher stderr template.
    pub fn stderr_template(&self) -> PathBuf {
        self.results_dir().join("error-%j-%n.out")
    }

    /// Variables exported into the job.
    pub fn exports(&self) -> Vec<ExportVar> {
        vec![
            ExportVar {
                name: self.token_var.clone(),
                value: self.token.clone(),
                secret: true,
            },
            ExportVar {
                name: "PYTHONPATH".to_string(),
                value: self.paths.code_mount.to_string_lossy().into_owned(),
                secret: false,
            },
        ]
    }

    /// Build the job script run inside the container.
    pub fn run_script(&self) -> Script {
        let code = &self.paths.code_mount;
        let example_dir = code.join(&self.training.example_dir);

        Script::new()
            .step(Step::echo(START_BANNER))
            .step(Step::Authenticate {
                command: self.login_command.clone(),
                token_var: self.token_var.clone(),
            })
            .step(Step::Export {
                name: "CUDA_VISIBLE_DEVICES".to_string(),
                value: self.devices.to_string(),
            })
            .step(Step::PrependPath {
                name: "PYTHONPATH".to_string(),
                entry: code.to_string_lossy().into_owned(),
            })
            .step(Step::Export {
                name: "HYDRA_FULL_ERROR".to_string(),
                value: "1".to_string(),
            })
            .step(Step::change_dir(example_dir))
            .step(Step::invoke(
                [self.training.interpreter.as_str(), self.training.entry_point.as_str()],
                self.training_flags(),
            ))
    }

    fn training_flags(&self) -> Vec<Flag> {
        let t = &self.training;
        let results_mount = self.results_mount();
        let vocab = self.paths.code_mount.join(&t.vocab_path);

        let mut flags = vec![
            Flag::long("config-path", &t.config_path),
            Flag::long("config-name", &t.config_name),
            Flag::set(
                "exp_manager.wandb_logger_kwargs.offline",
                if t.offline { "True" } else { "False" },
            ),
            Flag::set("trainer.num_nodes", self.job.nodes),
            Flag::set("trainer.gpus", self.job.gpus_per_node),
            Flag::set("exp_manager.name", &self.identity),
            Flag::set("exp_manager.exp_dir", results_mount.display()),
            Flag::set("exp_manager.wandb_logger_kwargs.name", &self.identity),
            Flag::set("exp_manager.wandb_logger_kwargs.project", &self.project),
            Flag::set("tokenizer.vocab_path", vocab.display()),
        ];
        for (dataset, split, workers) in [
            ("train_ds", &t.train_split, t.train_workers),
            ("validation_ds", &t.validation_split, t.validation_workers),
        ] {
            let split_dir = self.paths.data_mount.join(split);
            flags.push(Flag::set(
                format!("model.{dataset}.filepath"),
                split_dir.join(&t.data_files).display(),
            ));
            flags.push(Flag::set(
                format!("model.{dataset}.metadata_path"),
                split_dir.join(&t.metadata_file).display(),
            ));
            flags.push(Flag::set(format!("model.{dataset}.num_workers"), workers));
        }
        flags.extend(self.overrides.iter().cloned());
        flags
    }
}
