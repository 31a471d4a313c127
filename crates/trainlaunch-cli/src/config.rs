//! Configuration loading.
//!
//! Uses `figment` for layered configuration, lowest to highest priority:
//! built-in defaults, config file, `TRAINLAUNCH_*` environment, command-line
//! flags. Array values (training overrides) from later layers are appended.

use std::fmt;
use std::path::{Path, PathBuf};

use clap::Args;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::Serialize;
use trainlaunch_core::LaunchConfig;

use crate::error::CliError;

/// Environment variable the tracking token is read from.
pub const TOKEN_ENV: &str = "WANDB_API_KEY";

/// Prefix for configuration values taken from the environment
/// (`TRAINLAUNCH_JOB__NODES=4`).
pub const ENV_PREFIX: &str = "TRAINLAUNCH_";

/// Command-line overrides, grouped like the config file sections.
#[derive(Args, Debug, Default, Clone, Serialize)]
pub struct Overrides {
    #[command(flatten)]
    pub job: JobOverrides,

    #[command(flatten)]
    pub container: ContainerOverrides,

    #[command(flatten)]
    pub storage: StorageOverrides,

    #[command(flatten)]
    pub experiment: ExperimentOverrides,

    #[command(flatten)]
    pub training: TrainingOverrides,

    #[command(flatten)]
    pub tracking: TrackingOverrides,
}

#[derive(Args, Debug, Default, Clone, Serialize)]
#[command(next_help_heading = "Job")]
pub struct JobOverrides {
    /// Number of nodes
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u32>,

    /// GPUs per node
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpus_per_node: Option<u32>,

    /// Scheduler partition
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,

    /// Scheduler account
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    /// Wall-clock limit (e.g. 8:00:00)
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<String>,
}

#[derive(Args, Debug, Default, Clone, Serialize)]
#[command(next_help_heading = "Container")]
pub struct ContainerOverrides {
    /// Container image reference
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Launcher program
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launcher: Option<String>,
}

#[derive(Args, Debug, Default, Clone, Serialize)]
#[command(next_help_heading = "Storage")]
pub struct StorageOverrides {
    /// Storage root holding data, code, and outputs
    #[arg(long = "storage-root", global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Args, Debug, Default, Clone, Serialize)]
#[command(next_help_heading = "Experiment")]
pub struct ExperimentOverrides {
    /// Experiment label
    #[arg(long = "experiment", global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Tracking-service project
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

#[derive(Args, Debug, Default, Clone, Serialize)]
#[command(next_help_heading = "Training")]
pub struct TrainingOverrides {
    /// Data file selector pattern
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_files: Option<String>,

    /// Extra training override (KEY=VALUE), repeatable
    #[arg(long = "override", global = true, value_name = "KEY=VALUE")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<String>,
}

#[derive(Args, Default, Clone, Serialize)]
#[command(next_help_heading = "Tracking")]
pub struct TrackingOverrides {
    /// Tracking-service API token
    #[arg(long = "tracking-token", global = true, env = TOKEN_ENV, hide_env_values = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl fmt::Debug for TrackingOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingOverrides")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Load the layered configuration.
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<LaunchConfig, CliError> {
    let mut figment = Figment::from(Serialized::defaults(LaunchConfig::default()));

    if let Some(path) = path {
        let content = std::fs::read_to_string(path).map_err(|source| CliError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        figment = figment.merge(Toml::string(&content));
    }

    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .admerge(Serialized::defaults(overrides))
        .extract()
        .map_err(|e| CliError::ParseConfig {
            path: path.map(Path::to_path_buf),
            source: Box::new(e),
        })
}

/// Serialize a config for the batch wrapper. The token is left out; the
/// wrapped `submit` reads it from the environment instead.
pub fn to_toml_without_secrets(config: &LaunchConfig) -> Result<String, CliError> {
    let mut config = config.clone();
    config.tracking.token = None;
    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = load(None, &Overrides::default()).unwrap();
        assert_eq!(config.job, LaunchConfig::default().job);
        assert_eq!(config.storage, LaunchConfig::default().storage);
    }

    #[test]
    fn test_flag_beats_file_beats_default() {
        let file = write_config(
            r#"
[job]
nodes = 4
partition = "interactive"

[storage]
root = "/lustre/chem"

[training]
overrides = ["trainer.val_check_interval=100"]
"#,
        );

        let mut overrides = Overrides::default();
        overrides.job.nodes = Some(8);
        overrides.training.overrides = vec!["trainer.max_steps=10".to_string()];
        let config = load(Some(file.path()), &overrides).unwrap();

        assert_eq!(config.job.nodes, 8);
        assert_eq!(config.job.partition, "interactive");
        assert_eq!(config.job.gpus_per_node, 16);
        assert_eq!(config.storage.root, Some(PathBuf::from("/lustre/chem")));
        assert_eq!(
            config.training.overrides,
            vec!["trainer.val_check_interval=100", "trainer.max_steps=10"]
        );
    }

    #[test]
    fn test_unset_flags_keep_file_values() {
        let file = write_config("[container]\nimage = \"registry#team/image:v2\"\n");
        let config = load(Some(file.path()), &Overrides::default()).unwrap();
        assert_eq!(config.container.image, "registry#team/image:v2");
        assert_eq!(config.container.launcher, "srun");
    }

    #[test]
    fn test_overrides_serialize_only_given_values() {
        let mut overrides = Overrides::default();
        overrides.storage.root = Some("/gpfs/megatron".into());
        overrides.tracking.token = Some("secret-token".to_string());

        let value = serde_json::to_value(&overrides).unwrap();
        assert_eq!(value["storage"]["root"], "/gpfs/megatron");
        assert_eq!(value["tracking"]["token"], "secret-token");
        assert!(value["job"].as_object().unwrap().is_empty());
        assert!(value["training"].get("overrides").is_none());
    }

    #[test]
    fn test_debug_redacts_token() {
        let mut overrides = Overrides::default();
        overrides.tracking.token = Some("secret-token".to_string());
        assert!(!format!("{overrides:?}").contains("secret-token"));
    }

    #[test]
    fn test_missing_file() {
        let err = load(
            Some(Path::new("/nonexistent/trainlaunch.toml")),
            &Overrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CliError::ReadConfig { .. }));
    }

    #[test]
    fn test_invalid_file() {
        let file = write_config("[job]\nnodes = \"many\"\n");
        let err = load(Some(file.path()), &Overrides::default()).unwrap_err();
        assert!(matches!(err, CliError::ParseConfig { path: Some(_), .. }));
    }

    #[test]
    fn test_serialized_config_round_trips_without_token() {
        let mut config = LaunchConfig::default();
        config.storage.root = Some("/lustre/chem".into());
        config.tracking.token = Some("secret-token".to_string());

        let text = to_toml_without_secrets(&config).unwrap();
        assert!(!text.contains("secret-token"));

        let file = write_config(&text);
        let parsed = load(Some(file.path()), &Overrides::default()).unwrap();
        assert_eq!(parsed.storage.root, config.storage.root);
        assert!(parsed.tracking.token.is_none());
    }
}
