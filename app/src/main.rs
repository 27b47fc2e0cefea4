// ==============================================================================
// main.rs - Variant Pipeline Entry Point
// ==============================================================================
// Description: Launches the variant transform/load/stats batch job
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use variant_pipeline::engine::{ExitStatus, JobLauncher};
use variant_pipeline::jobs;
use variant_pipeline::parameters::JobParameters;
use variant_pipeline::repository::{SqliteJobRepository, DEFAULT_STALE_CLAIM_MINUTES};
use variant_pipeline::storage::local::{LocalVariantStorage, DEFAULT_STORAGE_HOME};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum JobKind {
    /// transform → load → statsCreate → statsLoad
    Variant,
    /// transform → load
    Aggregated,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Job to launch
    #[arg(short, long, value_enum, default_value = "variant")]
    job: JobKind,

    /// Job parameter as key=value (repeatable, overrides --parameters)
    #[arg(short, long = "param", value_parser = parse_key_value)]
    params: Vec<(String, String)>,

    /// JSON object file with job parameters
    #[arg(long)]
    parameters: Option<PathBuf>,

    /// Root directory of the local variant databases
    #[arg(long, env = "VARIANT_STORAGE_HOME", default_value = DEFAULT_STORAGE_HOME)]
    storage_home: PathBuf,

    /// Step-status store (default: <storage home>/job-repository.sqlite)
    #[arg(long, env = "VARIANT_JOB_REPOSITORY")]
    repository: Option<PathBuf>,

    /// Minutes after which a step left STARTED by another execution is taken over
    #[arg(long, env = "VARIANT_STALE_CLAIM_MINUTES", default_value_t = DEFAULT_STALE_CLAIM_MINUTES)]
    stale_claim_minutes: i64,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "variant_pipeline=info".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("Variant Pipeline starting...");

    let mut parameters = match &args.parameters {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read parameters file {}", path.display()))?;
            JobParameters::from_json_str(&json)?
        }
        None => JobParameters::new(),
    };
    parameters.extend(args.params.into_iter().collect());

    let job = match args.job {
        JobKind::Variant => jobs::variant_job(),
        JobKind::Aggregated => jobs::aggregated_variant_job(),
    };

    std::fs::create_dir_all(&args.storage_home)
        .with_context(|| format!("Failed to create storage home {}", args.storage_home.display()))?;
    let storage = LocalVariantStorage::new(&args.storage_home);

    let repository_path = args
        .repository
        .unwrap_or_else(|| args.storage_home.join("job-repository.sqlite"));
    let repository = SqliteJobRepository::open(&repository_path)
        .with_context(|| format!("Failed to open job repository {}", repository_path.display()))?
        .with_stale_claim_after(chrono::Duration::minutes(args.stale_claim_minutes));
    info!("Job repository: {}", repository_path.display());

    let launcher = JobLauncher::new(repository);
    let execution = launcher.run(&job, parameters, &storage)?;

    for step in &execution.steps {
        info!(
            "  {:<12} {}{}",
            step.step_name,
            step.result,
            if step.resumed { " (already completed)" } else { "" }
        );
    }

    match execution.status {
        ExitStatus::Completed => {
            info!("Job {} completed (execution {})", execution.job_name, execution.id);
            Ok(())
        }
        ExitStatus::Failed => {
            let failure = execution
                .failure
                .map(|f| f.to_string())
                .unwrap_or_else(|| "unknown failure".to_string());
            error!("Job {} failed: {}", execution.job_name, failure);
            bail!("Job {} failed: {}", execution.job_name, failure)
        }
    }
}
