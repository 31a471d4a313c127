//! Job submission for TrainLaunch
//!
//! This crate turns a validated [`LaunchPlan`](trainlaunch_core::LaunchPlan)
//! into a running job: it creates the results directory, writes the job
//! script, and hands off to the cluster launcher through a
//! [`SubmissionBackend`].
//!
//! # Example
//!
//! ```rust,no_run
//! use trainlaunch_core::{LaunchConfig, SchedulerEnv};
//! use trainlaunch_launcher::{JobLauncher, SrunBackend};
//!
//! async fn run(config: LaunchConfig) -> Result<(), Box<dyn std::error::Error>> {
//!     let launcher = JobLauncher::from_config(config, SchedulerEnv::from_env()?, SrunBackend::new())?;
//!     let handle = launcher.launch().await?;
//!     println!("launcher exited with {}", handle.exit_code);
//!     Ok(())
//! }
//! ```

mod backend;
mod error;
mod launcher;
mod sbatch;
mod srun;

// Re-export main types
pub use backend::{JobHandle, SubmissionBackend, SubmissionRequest};
pub use error::{LaunchError, EXIT_CONFIG, EXIT_NOT_FOUND};
pub use launcher::JobLauncher;
pub use sbatch::{BatchWrapper, SbatchBackend};
pub use srun::SrunBackend;
