//! Configuration errors.

use thiserror::Error;

/// Errors raised while validating a launch configuration.
///
/// Every variant is terminal: the launch is aborted before any directory is
/// created or any job is submitted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// GPUs per node must be at least one.
    #[error("Invalid GPU count: {0} (at least one GPU per node is required)")]
    InvalidGpuCount(u32),

    /// Node count must be at least one.
    #[error("Invalid node count: {0} (at least one node is required)")]
    InvalidNodeCount(u32),

    /// A required configuration value is absent or empty.
    #[error("Missing required configuration value: {0}")]
    MissingField(&'static str),

    /// A path that must be absolute is relative.
    #[error("Path for '{field}' must be absolute: {path}")]
    RelativePath { field: &'static str, path: String },

    /// A mount path contains a character that splits the mount list.
    #[error("Path for '{field}' must not contain ',' or ':': {path}")]
    InvalidMountPath { field: &'static str, path: String },

    /// Experiment label is not a single plain path component.
    #[error("Invalid experiment label '{0}': must be a single directory name")]
    InvalidLabel(String),

    /// Two mounts map to the same container path.
    #[error("Duplicate container mount target: {0}")]
    DuplicateMountTarget(String),

    /// A scheduler-provided environment variable could not be parsed.
    #[error("Invalid scheduler variable {name}={value}")]
    InvalidSchedulerVar { name: String, value: String },

    /// An exported variable name is not a valid shell identifier.
    #[error("Invalid environment variable name: '{0}'")]
    InvalidEnvName(String),

    /// A user-supplied training override is not of the form `key=value`.
    #[error("Invalid override '{0}': expected KEY=VALUE")]
    InvalidOverride(String),
}
