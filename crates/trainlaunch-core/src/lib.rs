//! TrainLaunch Core Types
//!
//! This crate contains the pure launch model with no dependencies on:
//! - Subprocesses
//! - Async runtimes
//! - The filesystem
//!
//! Everything needed to turn a configuration into a job script and a mount
//! list lives here; actually running the launcher is `trainlaunch-launcher`'s job.

pub mod config;
pub mod error;
pub mod identity;
pub mod ids;
pub mod job;
pub mod paths;
pub mod plan;
pub mod scheduler;
pub mod script;

// Re-export commonly used types
pub use config::{
    ContainerConfig, ExperimentConfig, LaunchConfig, StorageConfig, TrackingConfig, TrainingConfig,
};
pub use error::CoreError;
pub use identity::ExperimentIdentity;
pub use ids::JobId;
pub use job::{DeviceList, JobSpec, SchedulerDirectives};
pub use paths::{Mount, PathSet, JOB_SCRIPT_FILE_NAME};
pub use plan::{EnvAdjustment, ExportVar, LaunchPlan};
pub use scheduler::SchedulerEnv;
pub use script::{shell_escape, Flag, Script, Step};
