// ==============================================================================
// repository.rs - Step Status Store
// ==============================================================================
// Description: Persisted step completion status keyed by (job, step, instance)
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Status transitions per key:
//   (none) ──claim──▶ STARTED ──▶ COMPLETED | FAILED
//   FAILED ──claim──▶ STARTED            (retry of a failed step)
//   COMPLETED ──claim──▶ COMPLETED        (not restartable: step skipped)
//   STARTED ──claim──▶ STARTED            (lease expired: taken over)
//   STARTED ──claim──▶ STARTED            (lease live: refused, already running)
// Every claim records its owner (the execution id) and a timestamp. A STARTED
// claim held by another execution is only taken over once it is older than
// the lease. A claim is a single read-modify-write; the SQLite store runs it
// inside an IMMEDIATE transaction so concurrent launches serialize per
// database.
// ==============================================================================

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use crate::engine::JobExecution;
use crate::error::RepositoryError;

/// Persisted status of one step of one job instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
}

impl StepStatus {
    /// Parse status from string (for SQL storage)
    pub fn from_string(s: &str) -> Result<Self, RepositoryError> {
        match s.to_uppercase().as_str() {
            "STARTED" => Ok(Self::Started),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(RepositoryError::UnknownStatus(s.to_string())),
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Started => "STARTED",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepKey {
    pub job_name: String,
    pub step_name: String,
    pub instance_id: String,
}

impl StepKey {
    pub fn new(job_name: &str, step_name: &str, instance_id: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            step_name: step_name.to_string(),
            instance_id: instance_id.to_string(),
        }
    }
}

/// Default age after which a STARTED claim is considered abandoned
pub const DEFAULT_STALE_CLAIM_MINUTES: i64 = 360;

/// Decision taken when claiming a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Step marked STARTED; run the body
    Run,
    /// Step was left STARTED by an earlier run whose lease expired; marked
    /// again and run
    TakenOver,
    /// Another execution holds a live STARTED claim; do not run
    Running { owner: String },
    /// COMPLETED earlier and not restartable; do not run
    AlreadyCompleted,
}

/// Stored state of one step key
#[derive(Debug, Clone)]
struct StepState {
    status: StepStatus,
    owner: Option<String>,
    updated_at: DateTime<Utc>,
}

fn decide(
    current: Option<&StepState>,
    owner: &str,
    stale_after: Duration,
    allow_restart_if_complete: bool,
) -> Claim {
    let Some(state) = current else {
        return Claim::Run;
    };

    match state.status {
        StepStatus::Completed if !allow_restart_if_complete => Claim::AlreadyCompleted,
        StepStatus::Started => match state.owner.as_deref() {
            Some(holder) if holder == owner => Claim::Run,
            holder if Utc::now() - state.updated_at < stale_after => Claim::Running {
                owner: holder.unwrap_or("unknown").to_string(),
            },
            _ => Claim::TakenOver,
        },
        _ => Claim::Run,
    }
}

/// Step-status store shared by job launches
pub trait JobRepository {
    /// Atomically check the step's status and mark it STARTED for `owner`
    /// unless it is skipped or held by another live execution
    fn claim_step(&self, key: &StepKey, owner: &str, allow_restart_if_complete: bool)
        -> Result<Claim, RepositoryError>;

    fn complete_step(&self, key: &StepKey) -> Result<(), RepositoryError>;

    fn fail_step(&self, key: &StepKey, cause: &str) -> Result<(), RepositoryError>;

    fn step_status(&self, key: &StepKey) -> Result<Option<StepStatus>, RepositoryError>;

    fn save_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError>;

    /// Executions of a job instance, oldest first
    fn executions(&self, instance_id: &str) -> Result<Vec<JobExecution>, RepositoryError>;
}

/// Process-local repository (tests, one-shot runs)
pub struct InMemoryJobRepository {
    steps: Mutex<HashMap<StepKey, StepState>>,
    executions: Mutex<Vec<JobExecution>>,
    stale_after: Duration,
}

impl Default for InMemoryJobRepository {
    fn default() -> Self {
        Self {
            steps: Mutex::new(HashMap::new()),
            executions: Mutex::new(Vec::new()),
            stale_after: Duration::minutes(DEFAULT_STALE_CLAIM_MINUTES),
        }
    }
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Age after which another execution's STARTED claim is taken over
    pub fn with_stale_claim_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    fn set(&self, key: &StepKey, status: StepStatus) -> Result<(), RepositoryError> {
        let mut steps = self.steps.lock().map_err(|_| RepositoryError::Poisoned)?;
        let owner = steps.get(key).and_then(|state| state.owner.clone());
        steps.insert(
            key.clone(),
            StepState {
                status,
                owner,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}

impl JobRepository for InMemoryJobRepository {
    fn claim_step(&self, key: &StepKey, owner: &str, allow_restart_if_complete: bool)
        -> Result<Claim, RepositoryError> {
        let mut steps = self.steps.lock().map_err(|_| RepositoryError::Poisoned)?;
        let claim = decide(steps.get(key), owner, self.stale_after, allow_restart_if_complete);
        if matches!(claim, Claim::Run | Claim::TakenOver) {
            steps.insert(
                key.clone(),
                StepState {
                    status: StepStatus::Started,
                    owner: Some(owner.to_string()),
                    updated_at: Utc::now(),
                },
            );
        }
        Ok(claim)
    }

    fn complete_step(&self, key: &StepKey) -> Result<(), RepositoryError> {
        self.set(key, StepStatus::Completed)
    }

    fn fail_step(&self, key: &StepKey, _cause: &str) -> Result<(), RepositoryError> {
        self.set(key, StepStatus::Failed)
    }

    fn step_status(&self, key: &StepKey) -> Result<Option<StepStatus>, RepositoryError> {
        let steps = self.steps.lock().map_err(|_| RepositoryError::Poisoned)?;
        Ok(steps.get(key).map(|state| state.status))
    }

    fn save_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        let mut executions = self.executions.lock().map_err(|_| RepositoryError::Poisoned)?;
        executions.push(execution.clone());
        Ok(())
    }

    fn executions(&self, instance_id: &str) -> Result<Vec<JobExecution>, RepositoryError> {
        let executions = self.executions.lock().map_err(|_| RepositoryError::Poisoned)?;
        Ok(executions
            .iter()
            .filter(|e| e.instance.id == instance_id)
            .cloned()
            .collect())
    }
}

/// SQLite-backed repository surviving process restarts
pub struct SqliteJobRepository {
    conn: Mutex<Connection>,
    stale_after: Duration,
}

impl SqliteJobRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        Self::with_connection(Connection::open(path.as_ref())?)
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RepositoryError> {
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS step_executions (
                job_name TEXT NOT NULL,
                step_name TEXT NOT NULL,
                instance_id TEXT NOT NULL,
                status TEXT NOT NULL,
                owner TEXT,
                cause TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (job_name, step_name, instance_id)
            );
            CREATE TABLE IF NOT EXISTS job_executions (
                execution_id TEXT PRIMARY KEY,
                job_name TEXT NOT NULL,
                instance_id TEXT NOT NULL,
                status TEXT NOT NULL,
                summary TEXT NOT NULL,
                started_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            stale_after: Duration::minutes(DEFAULT_STALE_CLAIM_MINUTES),
        })
    }

    /// Age after which another execution's STARTED claim is taken over
    pub fn with_stale_claim_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    fn write_status(&self, key: &StepKey, status: StepStatus, cause: Option<&str>) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().map_err(|_| RepositoryError::Poisoned)?;
        conn.execute(
            "INSERT INTO step_executions (job_name, step_name, instance_id, status, cause, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(job_name, step_name, instance_id)
             DO UPDATE SET status = excluded.status, cause = excluded.cause, updated_at = excluded.updated_at",
            params![
                key.job_name,
                key.step_name,
                key.instance_id,
                status.to_string(),
                cause,
                Utc::now().to_rfc3339()
            ],
        )?;
        debug!("{}/{} → {}", key.job_name, key.step_name, status);
        Ok(())
    }
}

fn read_state(conn: &Connection, key: &StepKey) -> Result<Option<StepState>, RepositoryError> {
    let row: Option<(String, Option<String>, String)> = conn
        .query_row(
            "SELECT status, owner, updated_at FROM step_executions
             WHERE job_name = ?1 AND step_name = ?2 AND instance_id = ?3",
            params![key.job_name, key.step_name, key.instance_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((status, owner, updated_at)) = row else {
        return Ok(None);
    };
    // An unreadable timestamp counts as an expired lease
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    Ok(Some(StepState {
        status: StepStatus::from_string(&status)?,
        owner,
        updated_at,
    }))
}

impl JobRepository for SqliteJobRepository {
    fn claim_step(&self, key: &StepKey, owner: &str, allow_restart_if_complete: bool)
        -> Result<Claim, RepositoryError> {
        let mut conn = self.conn.lock().map_err(|_| RepositoryError::Poisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = read_state(&tx, key)?;
        let claim = decide(current.as_ref(), owner, self.stale_after, allow_restart_if_complete);
        if matches!(claim, Claim::Run | Claim::TakenOver) {
            tx.execute(
                "INSERT INTO step_executions (job_name, step_name, instance_id, status, owner, cause, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)
                 ON CONFLICT(job_name, step_name, instance_id)
                 DO UPDATE SET status = excluded.status, owner = excluded.owner, cause = NULL,
                               updated_at = excluded.updated_at",
                params![
                    key.job_name,
                    key.step_name,
                    key.instance_id,
                    StepStatus::Started.to_string(),
                    owner,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        tx.commit()?;
        Ok(claim)
    }

    fn complete_step(&self, key: &StepKey) -> Result<(), RepositoryError> {
        self.write_status(key, StepStatus::Completed, None)
    }

    fn fail_step(&self, key: &StepKey, cause: &str) -> Result<(), RepositoryError> {
        self.write_status(key, StepStatus::Failed, Some(cause))
    }

    fn step_status(&self, key: &StepKey) -> Result<Option<StepStatus>, RepositoryError> {
        let conn = self.conn.lock().map_err(|_| RepositoryError::Poisoned)?;
        Ok(read_state(&conn, key)?.map(|state| state.status))
    }

    fn save_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().map_err(|_| RepositoryError::Poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO job_executions
             (execution_id, job_name, instance_id, status, summary, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                execution.id.to_string(),
                execution.job_name,
                execution.instance.id,
                execution.status.to_string(),
                serde_json::to_string(execution)?,
                execution.started_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn executions(&self, instance_id: &str) -> Result<Vec<JobExecution>, RepositoryError> {
        let conn = self.conn.lock().map_err(|_| RepositoryError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT summary FROM job_executions WHERE instance_id = ?1 ORDER BY started_at, rowid",
        )?;
        let rows = stmt.query_map(params![instance_id], |row| row.get::<_, String>(0))?;

        let mut executions = Vec::new();
        for row in rows {
            executions.push(serde_json::from_str(&row?)?);
        }
        Ok(executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(step: &str) -> StepKey {
        StepKey::new("variantJob", step, "abc123")
    }

    const RUN_A: &str = "execution-a";
    const RUN_B: &str = "execution-b";

    fn exercise(repo: &dyn JobRepository) {
        let load = key("load");
        assert_eq!(repo.step_status(&load).unwrap(), None);
        assert_eq!(repo.claim_step(&load, RUN_A, false).unwrap(), Claim::Run);
        assert_eq!(repo.step_status(&load).unwrap(), Some(StepStatus::Started));

        // A second execution must not run a step the first still holds
        assert_eq!(
            repo.claim_step(&load, RUN_B, false).unwrap(),
            Claim::Running {
                owner: RUN_A.to_string()
            }
        );
        assert_eq!(repo.claim_step(&load, RUN_A, false).unwrap(), Claim::Run);

        repo.complete_step(&load).unwrap();
        assert_eq!(repo.claim_step(&load, RUN_B, false).unwrap(), Claim::AlreadyCompleted);
        assert_eq!(repo.step_status(&load).unwrap(), Some(StepStatus::Completed));
        assert_eq!(repo.claim_step(&load, RUN_B, true).unwrap(), Claim::Run);

        let stats = key("statsCreate");
        repo.claim_step(&stats, RUN_A, false).unwrap();
        repo.fail_step(&stats, "disk full").unwrap();
        assert_eq!(repo.step_status(&stats).unwrap(), Some(StepStatus::Failed));
        assert_eq!(repo.claim_step(&stats, RUN_B, false).unwrap(), Claim::Run);

        let other_instance = StepKey::new("variantJob", "load", "def456");
        assert_eq!(repo.claim_step(&other_instance, RUN_A, false).unwrap(), Claim::Run);
    }

    fn exercise_expired_lease(repo: &dyn JobRepository) {
        let load = key("load");
        assert_eq!(repo.claim_step(&load, RUN_A, false).unwrap(), Claim::Run);
        assert_eq!(repo.claim_step(&load, RUN_B, false).unwrap(), Claim::TakenOver);
        // RUN_B owns the claim now
        assert_eq!(repo.claim_step(&load, RUN_B, false).unwrap(), Claim::Run);
    }

    #[test]
    fn test_in_memory_transitions() {
        exercise(&InMemoryJobRepository::new());
    }

    #[test]
    fn test_sqlite_transitions() {
        exercise(&SqliteJobRepository::open_in_memory().unwrap());
    }

    #[test]
    fn test_expired_claim_is_taken_over() {
        exercise_expired_lease(&InMemoryJobRepository::new().with_stale_claim_after(Duration::zero()));
        exercise_expired_lease(
            &SqliteJobRepository::open_in_memory()
                .unwrap()
                .with_stale_claim_after(Duration::zero()),
        );
    }

    #[test]
    fn test_sqlite_claim_seen_by_second_connection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jobs.sqlite");
        let first = SqliteJobRepository::open(&path).unwrap();
        let second = SqliteJobRepository::open(&path).unwrap();

        assert_eq!(first.claim_step(&key("load"), RUN_A, false).unwrap(), Claim::Run);
        assert!(matches!(
            second.claim_step(&key("load"), RUN_B, false).unwrap(),
            Claim::Running { owner } if owner == RUN_A
        ));
    }

    #[test]
    fn test_sqlite_status_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jobs.sqlite");
        {
            let repo = SqliteJobRepository::open(&path).unwrap();
            repo.claim_step(&key("transform"), RUN_A, false).unwrap();
            repo.complete_step(&key("transform")).unwrap();
        }
        let repo = SqliteJobRepository::open(&path).unwrap();
        assert_eq!(
            repo.claim_step(&key("transform"), RUN_B, false).unwrap(),
            Claim::AlreadyCompleted
        );
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(StepStatus::from_string("completed").unwrap(), StepStatus::Completed);
        assert_eq!(StepStatus::Failed.to_string(), "FAILED");
        assert!(matches!(
            StepStatus::from_string("PAUSED"),
            Err(RepositoryError::UnknownStatus(_))
        ));
    }
}
