//! Error types for job submission.

use std::path::PathBuf;

use thiserror::Error;
use trainlaunch_core::CoreError;

/// Exit code for configuration and local I/O failures.
pub const EXIT_CONFIG: i32 = 2;

/// Exit code when the launcher program cannot be found.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Errors that can occur while preparing or submitting a job.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Invalid configuration; nothing was created or submitted.
    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),

    /// Local filesystem failure (results directory, job script).
    #[error("Failed to {action} '{path}': {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The launcher process could not be started or awaited.
    #[error("Failed to run launcher '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The launcher exited unsuccessfully.
    #[error("Launcher '{program}' failed ({})", describe_exit(.code, .signal))]
    LauncherFailed {
        program: String,
        code: Option<i32>,
        signal: Option<i32>,
    },

    /// The launcher succeeded but its output was not understood.
    #[error("Unexpected launcher output: {0}")]
    Protocol(String),
}

impl LaunchError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Process exit code to report for this error.
    ///
    /// A failed launcher's own exit code is passed through unchanged.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::LauncherFailed {
                code: Some(code), ..
            } => *code,
            Self::LauncherFailed {
                signal: Some(signal),
                ..
            } => 128 + signal,
            Self::LauncherFailed { .. } => 1,
            Self::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                EXIT_NOT_FOUND
            }
            Self::Config(_) | Self::Io { .. } | Self::Spawn { .. } | Self::Protocol(_) => {
                EXIT_CONFIG
            }
        }
    }
}

fn describe_exit(code: &Option<i32>, signal: &Option<i32>) -> String {
    match (code, signal) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(signal)) => format!("killed by signal {signal}"),
        (None, None) => "unknown exit status".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let failed = LaunchError::LauncherFailed {
            program: "srun".to_string(),
            code: Some(3),
            signal: None,
        };
        assert_eq!(failed.exit_code(), 3);
        assert_eq!(failed.to_string(), "Launcher 'srun' failed (exit code 3)");

        let killed = LaunchError::LauncherFailed {
            program: "srun".to_string(),
            code: None,
            signal: Some(9),
        };
        assert_eq!(killed.exit_code(), 137);

        let config = LaunchError::from(CoreError::InvalidGpuCount(0));
        assert_eq!(config.exit_code(), EXIT_CONFIG);

        let missing = LaunchError::Spawn {
            program: "srun".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(missing.exit_code(), EXIT_NOT_FOUND);
    }
}
