//! TrainLaunch CLI - launch containerized distributed training jobs on Slurm.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trainlaunch_core::{ExportVar, LaunchConfig, LaunchPlan, SchedulerEnv, Script};
use trainlaunch_launcher::{
    BatchWrapper, JobLauncher, SbatchBackend, SrunBackend, SubmissionBackend, SubmissionRequest,
};

mod config;
mod error;

use config::{Overrides, TOKEN_ENV};
use error::CliError;

/// TrainLaunch - containerized training job launcher
#[derive(Parser)]
#[command(name = "trainlaunch")]
#[command(about = "Launch containerized distributed training jobs on Slurm", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "TRAINLAUNCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the job script and run it through the launcher
    Submit,

    /// Print the job script and launcher command without side effects
    Render {
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Write an sbatch wrapper that calls `submit` and queue it
    Batch {
        /// Print the wrapper instead of writing and submitting it
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trainlaunch=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    match run(cli).await {
        Ok(code) => exit_code(code),
        Err(e) => {
            error!(error = %e, "trainlaunch failed");
            eprintln!("error: {e}");
            exit_code(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<i32, CliError> {
    let config = config::load(cli.config.as_deref(), &cli.overrides)?;

    match cli.command {
        Commands::Submit => submit(config).await,
        Commands::Render { format } => render(config, format),
        Commands::Batch { dry_run } => batch(config, dry_run).await,
    }
}

async fn submit(config: LaunchConfig) -> Result<i32, CliError> {
    let scheduler = SchedulerEnv::from_env()?;
    if !scheduler.in_allocation() {
        warn!("SLURM_JOB_ID is not set; srun will request a new allocation with the configured job shape");
    }

    let launcher = JobLauncher::from_config(config, scheduler, SrunBackend::new())?;
    let handle = launcher.launch().await?;
    Ok(handle.exit_code)
}

fn render(config: LaunchConfig, format: Format) -> Result<i32, CliError> {
    let launcher = JobLauncher::from_config(config, SchedulerEnv::from_env()?, SrunBackend::new())?;
    let plan = launcher.plan();
    let script = launcher.render();
    let request = launcher.submission(&plan.script_mount());

    match format {
        Format::Text => {
            println!("# identity:    {}", plan.identity);
            println!(
                "# tasks:       {} ({} nodes x {} GPUs)",
                plan.task_count(),
                plan.job.nodes,
                plan.job.gpus_per_node
            );
            println!("# results:     {}", plan.results_dir().display());
            println!("# job script:  {}", plan.script_path().display());
            println!();
            print!("{}", script.render());
            println!();
            println!("# launcher:");
            println!("{}", request.command_line());
            println!("# exports:     {}", format_exports(&request.env));
        }
        Format::Json => {
            let doc = render_document(plan, &script, &request);
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }
    Ok(0)
}

/// JSON view of a rendered launch. Secret exports are redacted.
fn render_document(
    plan: &LaunchPlan,
    script: &Script,
    request: &SubmissionRequest,
) -> serde_json::Value {
    let exports: serde_json::Map<String, serde_json::Value> = request
        .env
        .iter()
        .map(|var| (var.name.clone(), json!(var.display_value())))
        .collect();
    json!({
        "identity": plan.identity,
        "task_count": plan.task_count(),
        "devices": plan.devices.to_string(),
        "results_dir": plan.results_dir(),
        "script_path": plan.script_path(),
        "script": script.render(),
        "launcher": request.program,
        "args": request.args,
        "exports": exports,
    })
}

async fn batch(config: LaunchConfig, dry_run: bool) -> Result<i32, CliError> {
    // The wrapper runs on a compute node later; the allocation shape comes
    // from the configuration, not from wherever this command runs.
    let plan = config.clone().resolve(SchedulerEnv::default())?;
    let exe = std::env::current_exe().map_err(CliError::CurrentExe)?;
    let files = BatchFiles::prepare(&plan, &config, &exe)?;

    if dry_run {
        println!("# {}", files.wrapper_path.display());
        print!("{}", files.wrapper);
        println!();
        println!("# {}", files.snapshot_path.display());
        print!("{}", files.snapshot);
        return Ok(0);
    }

    files.write(&plan.paths.output_dir).await?;

    let handle = SbatchBackend::new()
        .submit(&SubmissionRequest::sbatch(&files.wrapper_path, token_env(&plan)))
        .await?;
    if let Some(job_id) = &handle.job_id {
        println!("Submitted batch job {job_id}");
    }
    Ok(handle.exit_code)
}

/// The two files `batch` writes next to each other under the output root:
/// the sbatch wrapper and the config snapshot it re-reads.
#[derive(Debug)]
struct BatchFiles {
    wrapper_path: PathBuf,
    wrapper: String,
    snapshot_path: PathBuf,
    snapshot: String,
}

impl BatchFiles {
    fn prepare(plan: &LaunchPlan, config: &LaunchConfig, exe: &Path) -> Result<Self, CliError> {
        let wrapper_path = BatchWrapper::path_for(plan);
        let snapshot_path = wrapper_path.with_extension("toml");
        let command = vec![
            exe.display().to_string(),
            "--config".to_string(),
            snapshot_path.display().to_string(),
            "submit".to_string(),
        ];
        Ok(Self {
            wrapper: BatchWrapper::new(plan, command).render(),
            snapshot: config::to_toml_without_secrets(config)?,
            wrapper_path,
            snapshot_path,
        })
    }

    /// Create `output_dir` and write both files, replacing earlier ones.
    async fn write(&self, output_dir: &Path) -> Result<(), CliError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| write_error(output_dir, source))?;
        for (path, content) in [
            (&self.snapshot_path, &self.snapshot),
            (&self.wrapper_path, &self.wrapper),
        ] {
            tokio::fs::write(path, content)
                .await
                .map_err(|source| write_error(path, source))?;
        }
        info!(wrapper = %self.wrapper_path.display(), "Batch wrapper written");
        Ok(())
    }
}

fn write_error(path: &Path, source: std::io::Error) -> CliError {
    CliError::Write {
        path: path.to_path_buf(),
        source,
    }
}

/// Token handed to `sbatch` so the wrapped `submit` can read it from its environment.
fn token_env(plan: &LaunchPlan) -> Vec<ExportVar> {
    vec![ExportVar {
        name: TOKEN_ENV.to_string(),
        value: plan.token.clone(),
        secret: true,
    }]
}

fn format_exports(env: &[ExportVar]) -> String {
    env.iter()
        .map(|var| format!("{}={}", var.name, var.display_value()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
