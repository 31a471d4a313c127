//! CLI errors.

use std::path::PathBuf;

use thiserror::Error;
use trainlaunch_core::CoreError;
use trainlaunch_launcher::{LaunchError, EXIT_CONFIG};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {source}")]
    ParseConfig {
        /// Config file given on the command line, if any.
        path: Option<PathBuf>,
        #[source]
        source: Box<figment::Error>,
    },

    #[error("Failed to serialize config: {0}")]
    SerializeConfig(#[from] toml::ser::Error),

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot locate the trainlaunch executable: {0}")]
    CurrentExe(#[source] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl From<CoreError> for CliError {
    fn from(e: CoreError) -> Self {
        Self::Launch(LaunchError::Config(e))
    }
}

impl CliError {
    /// Process exit code; launcher failures pass their own code through.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Launch(e) => e.exit_code(),
            _ => EXIT_CONFIG,
        }
    }
}
