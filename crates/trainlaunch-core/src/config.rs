//! Launch configuration.
//!
//! `LaunchConfig` is what users write (TOML file plus CLI overrides). It is
//! validated exactly once by [`LaunchConfig::resolve`], which produces an
//! immutable [`LaunchPlan`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::plan::{EnvAdjustment, LaunchPlan};
use crate::{CoreError, ExperimentIdentity, Flag, JobSpec, PathSet, SchedulerEnv};

/// Full launch configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub job: JobSpec,
    pub container: ContainerConfig,
    pub storage: StorageConfig,
    pub experiment: ExperimentConfig,
    pub training: TrainingConfig,
    pub tracking: TrackingConfig,
}

/// Container image and launcher program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Image reference passed to `--container-image`.
    pub image: String,

    /// Launcher program (normally `srun`).
    pub launcher: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: "nvcr.io#nvidian/clara-lifesciences/megamolbart_training_nemo:latest"
                .to_string(),
            launcher: "srun".to_string(),
        }
    }
}

/// Host storage layout and container mount points.
///
/// `data_dir`, `code_dir`, and `output_dir` are joined onto `root`; absolute
/// values are used as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub code_dir: PathBuf,
    pub output_dir: PathBuf,
    pub data_mount: PathBuf,
    pub code_mount: PathBuf,
    pub output_mount: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            data_dir: "data/zinc_csv_split".into(),
            code_dir: "code/NeMo".into(),
            output_dir: "nemo".into(),
            data_mount: "/data".into(),
            code_mount: "/code".into(),
            output_mount: "/result".into(),
        }
    }
}

/// Experiment label and logger project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Label that prefixes the experiment identity.
    pub label: String,

    /// Tracking-service project. Constant across node/GPU shapes.
    pub project: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            label: "Draco-RNO".to_string(),
            project: "MegaMolBART".to_string(),
        }
    }
}

/// Training entry point and dataset selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub interpreter: String,

    /// Directory under the code mount to run from.
    pub example_dir: PathBuf,

    pub entry_point: String,
    pub config_path: String,
    pub config_name: String,

    /// Vocabulary file, relative to the code mount.
    pub vocab_path: PathBuf,

    /// Data file selector, e.g. `x_OP_000..146_CL_.csv`.
    pub data_files: String,

    pub train_split: String,
    pub validation_split: String,
    pub metadata_file: String,
    pub train_workers: u32,
    pub validation_workers: u32,

    /// Run the tracking logger offline.
    pub offline: bool,

    /// Extra `key=value` overrides appended after the built-in flags.
    pub overrides: Vec<String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            interpreter: "python".to_string(),
            example_dir: "examples/chem".into(),
            entry_point: "megamolbart_pretrain.py".to_string(),
            config_path: "conf".to_string(),
            config_name: "megamolbart_pretrain_xsmall_span_aug".to_string(),
            vocab_path: "nemo/collections/chem/vocab/megamolbart_pretrain_vocab.txt".into(),
            data_files: "x_OP_000..146_CL_.csv".to_string(),
            train_split: "train".to_string(),
            validation_split: "val".to_string(),
            metadata_file: "metadata.txt".to_string(),
            train_workers: 10,
            validation_workers: 4,
            offline: false,
            overrides: Vec::new(),
        }
    }
}

/// Tracking-service credentials.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// API token. Exported to the job, never written to disk.
    pub token: Option<String>,

    /// Variable the token is exported as.
    pub token_var: String,

    /// Login command; the token is appended as its last argument.
    pub login_command: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            token: None,
            token_var: "WANDB".to_string(),
            login_command: "wandb login".to_string(),
        }
    }
}

impl fmt::Debug for TrackingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("token_var", &self.token_var)
            .field("login_command", &self.login_command)
            .finish()
    }
}

impl LaunchConfig {
    /// Validate the configuration against the scheduler environment.
    ///
    /// Allocation shape reported by the scheduler takes precedence over the
    /// configured one; each difference is recorded on the plan.
    pub fn resolve(self, scheduler: SchedulerEnv) -> Result<LaunchPlan, CoreError> {
        let LaunchConfig {
            mut job,
            container,
            storage,
            experiment,
            training,
            tracking,
        } = self;

        let mut adjustments = Vec::new();
        if let Some(nodes) = scheduler.node_count {
            if nodes != job.nodes {
                adjustments.push(EnvAdjustment::new("job.nodes", job.nodes, nodes));
                job.nodes = nodes;
            }
        }
        if let Some(gpus) = scheduler.gpus_per_node {
            if gpus != job.gpus_per_node {
                adjustments.push(EnvAdjustment::new("job.gpus_per_node", job.gpus_per_node, gpus));
                job.gpus_per_node = gpus;
            }
        }

        job.validate()?;
        let devices = job.device_list()?;

        let root = storage
            .root
            .filter(|root| !root.as_os_str().is_empty())
            .ok_or(CoreError::MissingField("storage.root"))?;
        let paths = PathSet {
            data_dir: root.join(&storage.data_dir),
            code_dir: root.join(&storage.code_dir),
            output_dir: root.join(&storage.output_dir),
            storage_root: root,
            data_mount: storage.data_mount,
            code_mount: storage.code_mount,
            output_mount: storage.output_mount,
        };
        paths.validate()?;

        require("container.image", &container.image)?;
        require("container.launcher", &container.launcher)?;
        require("experiment.label", &experiment.label)?;
        check_label(&experiment.label)?;
        require("experiment.project", &experiment.project)?;
        require("training.interpreter", &training.interpreter)?;
        require("training.entry_point", &training.entry_point)?;
        require("training.data_files", &training.data_files)?;
        require("tracking.login_command", &tracking.login_command)?;

        let token = tracking
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(CoreError::MissingField("tracking.token"))?
            .to_string();
        if !crate::script::is_env_name(&tracking.token_var) {
            return Err(CoreError::InvalidEnvName(tracking.token_var));
        }

        let overrides = training
            .overrides
            .iter()
            .map(|raw| Flag::parse_override(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let identity = ExperimentIdentity::new(&experiment.label, job.nodes, job.gpus_per_node);

        Ok(LaunchPlan {
            job,
            paths,
            identity,
            devices,
            project: experiment.project,
            image: container.image,
            launcher: container.launcher,
            training,
            token,
            token_var: tracking.token_var,
            login_command: tracking.login_command,
            overrides,
            scheduler,
            adjustments,
        })
    }
}

fn require(field: &'static str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        Err(CoreError::MissingField(field))
    } else {
        Ok(())
    }
}

/// The label becomes a directory name under the output root, so it must be
/// exactly one plain path component.
fn check_label(label: &str) -> Result<(), CoreError> {
    let mut components = Path::new(label).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !label.contains(std::path::is_separator) => Ok(()),
        _ => Err(CoreError::InvalidLabel(label.to_string())),
    }
}
