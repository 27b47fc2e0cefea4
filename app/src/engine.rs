// ==============================================================================
// engine.rs - Sequential Step Runner
// ==============================================================================
// Description: Runs a job's steps in order with checkpoint/resume semantics
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Execution flow for one launch:
//   1. Job instance = hash(job name, parameters); new execution id (UUID v4)
//   2. Parameters → JobConfig (a ParameterError fails the job, no step runs)
//   3. For each step, in declaration order:
//      - claim it in the repository under (job, step, instance)
//      - COMPLETED and not restartable → SKIPPED (resumed), body not called
//      - STARTED by another live execution → the job fails as already
//        running, the other execution keeps its claim
//      - otherwise run the body; Ok(COMPLETED|SKIPPED) → COMPLETED,
//        error or Ok(FAILED) → FAILED and the job stops here
//   4. Persist the execution summary
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::JobConfig;
use crate::error::PipelineError;
use crate::parameters::{JobInstance, JobParameters};
use crate::repository::{Claim, JobRepository, StepKey};
use crate::storage::VariantStorage;

/// Outcome reported by a step body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepResult {
    Completed,
    Failed,
    /// Step did nothing (skip flag, or already completed on a previous run)
    Skipped,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepResult::Completed => "COMPLETED",
            StepResult::Failed => "FAILED",
            StepResult::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Final status of a job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitStatus {
    Completed,
    Failed,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Completed => f.write_str("COMPLETED"),
            ExitStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// What a step body sees
pub struct StepContext<'a> {
    pub parameters: &'a JobParameters,
    pub config: &'a JobConfig,
    pub storage: &'a dyn VariantStorage,
}

pub type StepBody = Box<dyn Fn(&StepContext<'_>) -> Result<StepResult, PipelineError> + Send + Sync>;

/// Named unit of work with a resume policy
pub struct Step {
    name: String,
    allow_restart_if_complete: bool,
    body: StepBody,
}

impl Step {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&StepContext<'_>) -> Result<StepResult, PipelineError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            allow_restart_if_complete: false,
            body: Box::new(body),
        }
    }

    /// Re-run the step even when a previous run of the instance completed it
    pub fn allow_restart_if_complete(mut self, allow: bool) -> Self {
        self.allow_restart_if_complete = allow;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn restartable(&self) -> bool {
        self.allow_restart_if_complete
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("allow_restart_if_complete", &self.allow_restart_if_complete)
            .finish()
    }
}

/// Ordered list of steps under a job name
#[derive(Debug)]
pub struct Job {
    name: String,
    steps: Vec<Step>,
}

impl Job {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::name).collect()
    }
}

/// Record of one step within an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_name: String,
    pub result: StepResult,
    /// Skipped because a previous run of the instance completed it
    pub resumed: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Which step failed and why; `step` is `None` when the job failed before
/// its first step (invalid parameters)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub step: Option<String>,
    pub error: String,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step {
            Some(step) => write!(f, "step '{}' failed: {}", step, self.error),
            None => write!(f, "job failed before any step: {}", self.error),
        }
    }
}

/// One physical run of a job instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_name: String,
    pub instance: JobInstance,
    pub parameters: JobParameters,
    pub status: ExitStatus,
    pub steps: Vec<StepExecution>,
    pub failure: Option<JobFailure>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobExecution {
    pub fn is_completed(&self) -> bool {
        self.status == ExitStatus::Completed
    }

    pub fn step(&self, name: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.step_name == name)
    }

    fn fail(&mut self, step: Option<&str>, error: String) {
        self.status = ExitStatus::Failed;
        self.failure = Some(JobFailure {
            step: step.map(str::to_string),
            error,
        });
    }
}

/// Leading 12 characters of an instance id, for log lines
fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Launches jobs against a step-status repository
pub struct JobLauncher<R> {
    repository: R,
}

impl<R: JobRepository> JobLauncher<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Run `job` synchronously
    ///
    /// Step failures are reported through the returned execution
    /// (`ExitStatus::Failed` plus `JobFailure`); `Err` is only returned when
    /// the repository itself fails.
    pub fn run(
        &self,
        job: &Job,
        parameters: JobParameters,
        storage: &dyn VariantStorage,
    ) -> Result<JobExecution, PipelineError> {
        let instance = JobInstance::from_parameters(job.name(), &parameters);
        let mut execution = JobExecution {
            id: Uuid::new_v4(),
            job_name: job.name().to_string(),
            instance,
            parameters,
            status: ExitStatus::Completed,
            steps: Vec::new(),
            failure: None,
            started_at: Utc::now(),
            ended_at: None,
        };

        info!(
            "Job: [{}] launched (execution {}, instance {})",
            job.name(),
            execution.id,
            short_id(&execution.instance.id)
        );

        match JobConfig::resolve(&execution.parameters) {
            Ok(config) => self.run_steps(job, &config, storage, &mut execution)?,
            Err(e) => {
                error!("Job: [{}] invalid parameters: {}", job.name(), e);
                execution.fail(None, e.to_string());
            }
        }

        execution.ended_at = Some(Utc::now());
        self.repository.save_execution(&execution)?;

        info!(
            "Job: [{}] completed with status [{}]",
            job.name(),
            execution.status
        );
        Ok(execution)
    }

    fn run_steps(
        &self,
        job: &Job,
        config: &JobConfig,
        storage: &dyn VariantStorage,
        execution: &mut JobExecution,
    ) -> Result<(), PipelineError> {
        let owner = execution.id.to_string();

        for step in job.steps() {
            let key = StepKey::new(job.name(), step.name(), &execution.instance.id);
            let started_at = Utc::now();

            match self.repository.claim_step(&key, &owner, step.restartable())? {
                Claim::AlreadyCompleted => {
                    info!("Step already complete or not restartable, so no action to execute: [{}]", step.name());
                    execution.steps.push(StepExecution {
                        step_name: step.name().to_string(),
                        result: StepResult::Skipped,
                        resumed: true,
                        error: None,
                        started_at,
                        ended_at: Utc::now(),
                    });
                    continue;
                }
                Claim::Running { owner } => {
                    let cause = PipelineError::AlreadyRunning {
                        step: step.name().to_string(),
                        owner,
                    }
                    .to_string();
                    error!("{}", cause);
                    execution.steps.push(StepExecution {
                        step_name: step.name().to_string(),
                        result: StepResult::Failed,
                        resumed: false,
                        error: Some(cause.clone()),
                        started_at,
                        ended_at: Utc::now(),
                    });
                    execution.fail(Some(step.name()), cause);
                    return Ok(());
                }
                Claim::TakenOver => {
                    warn!("Step [{}] was left STARTED by an earlier run; running it again", step.name());
                }
                Claim::Run => {}
            }

            info!("Executing step: [{}]", step.name());
            let context = StepContext {
                parameters: &execution.parameters,
                config,
                storage,
            };

            let outcome = match (step.body)(&context) {
                Ok(StepResult::Failed) => Err(PipelineError::StepFailed {
                    step: step.name().to_string(),
                }),
                other => other,
            };

            match outcome {
                Ok(result) => {
                    self.repository.complete_step(&key)?;
                    execution.steps.push(StepExecution {
                        step_name: step.name().to_string(),
                        result,
                        resumed: false,
                        error: None,
                        started_at,
                        ended_at: Utc::now(),
                    });
                }
                Err(e) => {
                    let cause = e.to_string();
                    error!("Step [{}] failed: {}", step.name(), cause);
                    self.repository.fail_step(&key, &cause)?;
                    execution.steps.push(StepExecution {
                        step_name: step.name().to_string(),
                        result: StepResult::Failed,
                        resumed: false,
                        error: Some(cause.clone()),
                        started_at,
                        ended_at: Utc::now(),
                    });
                    execution.fail(Some(step.name()), cause);
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
