//! Asynchronous build-job orchestration.
//!
//! One [`JobManager`] instance owns the whole job lifecycle: a
//! concurrency-safe registry (fast reads for polling), a durable SQLite
//! mirror (authoritative across restarts, since the registry is rebuilt
//! empty on process start), and a bounded pool of workers draining a submission
//! queue. Submission returns immediately with a pending record; the build
//! never blocks the submitter.
//!
//! The state machine is `pending → running → {completed | error}` and only
//! moves forward. Terminal states are final: no retries, no cancellation,
//! no timeouts. Every failure inside a worker is caught at the worker
//! boundary and recorded as the job's `error` state; a job can never take
//! the host process down with it.

use super::artifact::BuildResult;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default number of jobs returned by [`JobManager::list`].
pub const DEFAULT_LIST_LIMIT: usize = 20;

/// Fixed delay performed by the simulated job variant.
const SIMULATED_JOB_DELAY: Duration = Duration::from_millis(250);

/// Error messages are truncated to this length in job logs.
const ERROR_LOG_MAX: usize = 200;

/// Lifecycle state of a build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Error,
}

impl JobState {
    /// Ordering used to enforce forward-only transitions.
    fn rank(self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Running => 1,
            JobState::Completed | JobState::Error => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Error => "error",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only log line on a job record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobLogLine {
    /// Epoch milliseconds
    pub ts: i64,
    pub msg: String,
}

/// The full status record of one job. Records are replaced whole on every
/// transition and never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub state: JobState,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub updated_at: i64,
    pub logs: Vec<JobLogLine>,
    pub result: Option<BuildResult>,
    pub error: Option<String>,
}

impl JobRecord {
    fn new(job_id: String) -> Self {
        let now = now_ms();
        Self {
            job_id,
            state: JobState::Pending,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
            logs: Vec::new(),
            result: None,
            error: None,
        }
    }

    fn push_log(&mut self, msg: impl Into<String>) {
        self.logs.push(JobLogLine {
            ts: now_ms(),
            msg: msg.into(),
        });
    }
}

/// Errors surfaced to API callers. Everything else is absorbed into job
/// state or logged.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job not found: {job_id}")]
    NotFound { job_id: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The work a real (non-simulated) job performs.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn run_build(&self) -> Result<BuildResult>;
}

#[derive(Debug, Clone, Copy)]
enum JobKind {
    Build,
    Simulated,
}

struct QueuedJob {
    job_id: String,
    kind: JobKind,
}

#[derive(Default)]
struct Shutdown {
    notify: Notify,
    stopped: AtomicBool,
}

/// Owns the job registry, the durable mirror, and the worker pool.
pub struct JobManager {
    registry: Arc<RwLock<HashMap<String, JobRecord>>>,
    pool: SqlitePool,
    sender: mpsc::UnboundedSender<QueuedJob>,
    shutdown: Arc<Shutdown>,
}

impl JobManager {
    /// Create a manager and start `worker_count` workers over a shared
    /// submission queue. Workers are detached so process shutdown is never
    /// blocked by an in-flight build.
    pub async fn new(
        pool: SqlitePool,
        runner: Arc<dyn BuildRunner>,
        worker_count: usize,
    ) -> Result<Self> {
        Self::create_tables(&pool).await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let registry = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = Arc::new(Shutdown::default());

        for worker_id in 0..worker_count.max(1) {
            let receiver = Arc::clone(&receiver);
            let registry = Arc::clone(&registry);
            let runner = Arc::clone(&runner);
            let shutdown = Arc::clone(&shutdown);
            let pool = pool.clone();

            tokio::spawn(async move {
                debug!("job worker {worker_id} started");
                loop {
                    if shutdown.stopped.load(Ordering::Acquire) {
                        break;
                    }
                    let job = {
                        let mut receiver = receiver.lock().await;
                        tokio::select! {
                            job = receiver.recv() => job,
                            _ = shutdown.notify.notified() => None,
                        }
                    };
                    let Some(job) = job else { break };
                    Self::run_job(&registry, &pool, runner.as_ref(), job).await;
                }
                debug!("job worker {worker_id} stopped");
            });
        }

        Ok(Self {
            registry,
            pool,
            sender,
            shutdown,
        })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_jobs (
                job_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                finished_at INTEGER,
                updated_at INTEGER NOT NULL,
                result_json TEXT,
                error TEXT,
                logs_json TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_index_jobs_created ON index_jobs(created_at)")
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Submit a build job. Returns the pending record immediately; the build
    /// itself runs on the worker pool.
    pub async fn submit(&self, simulate: bool) -> Result<JobRecord> {
        let job_id = Uuid::new_v4().simple().to_string();
        let record = JobRecord::new(job_id.clone());

        {
            let mut registry = self.registry.write().await;
            registry.insert(job_id.clone(), record.clone());
        }
        if let Err(e) = persist_record(&self.pool, &record).await {
            warn!("could not persist job creation: {e}");
        }

        let kind = if simulate {
            JobKind::Simulated
        } else {
            JobKind::Build
        };
        self.sender
            .send(QueuedJob {
                job_id: job_id.clone(),
                kind,
            })
            .map_err(|_| anyhow::anyhow!("job queue is shut down"))?;

        info!("job {job_id} submitted (simulate={simulate})");
        Ok(record)
    }

    /// Non-blocking status read: the in-memory registry first, the durable
    /// store as fallback for jobs from before a restart.
    pub async fn status(&self, job_id: &str) -> Result<Option<JobRecord>> {
        if let Some(record) = self.registry.read().await.get(job_id) {
            return Ok(Some(record.clone()));
        }
        fetch_record(&self.pool, job_id).await
    }

    /// Recent jobs from the durable store, newest first.
    pub async fn list(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            "SELECT job_id, status, created_at, started_at, finished_at, updated_at,
                    result_json, error, logs_json
             FROM index_jobs ORDER BY created_at DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }

    /// Detailed record for one job. The durable store is authoritative; the
    /// registry covers records whose durable write failed. Unknown ids are
    /// the one client-visible error in this subsystem.
    pub async fn detail(&self, job_id: &str) -> std::result::Result<JobRecord, JobError> {
        if let Some(record) = fetch_record(&self.pool, job_id).await? {
            return Ok(record);
        }
        if let Some(record) = self.registry.read().await.get(job_id) {
            return Ok(record.clone());
        }
        Err(JobError::NotFound {
            job_id: job_id.to_string(),
        })
    }

    /// Snapshot of the in-memory registry, for the status surface.
    pub async fn jobs_snapshot(&self) -> HashMap<String, JobRecord> {
        self.registry.read().await.clone()
    }

    /// Stop accepting work. Idle workers exit; a worker mid-build finishes
    /// its job first.
    pub fn shutdown(&self) {
        self.shutdown.stopped.store(true, Ordering::Release);
        self.shutdown.notify.notify_waiters();
    }

    async fn run_job(
        registry: &RwLock<HashMap<String, JobRecord>>,
        pool: &SqlitePool,
        runner: &dyn BuildRunner,
        job: QueuedJob,
    ) {
        let job_id = job.job_id;
        apply_transition(registry, pool, &job_id, JobState::Running, |record| {
            record.started_at = Some(now_ms());
            record.push_log("job started");
        })
        .await;

        let outcome = match job.kind {
            JobKind::Simulated => {
                tokio::time::sleep(SIMULATED_JOB_DELAY).await;
                Ok(BuildResult::degraded("simulated job"))
            }
            // Worker boundary: every build failure becomes job state `error`
            JobKind::Build => runner.run_build().await,
        };

        match outcome {
            Ok(result) => {
                info!("job {job_id} completed: {} docs", result.count);
                apply_transition(registry, pool, &job_id, JobState::Completed, |record| {
                    record.finished_at = Some(now_ms());
                    record.push_log(format!("job completed: {} docs", result.count));
                    record.result = Some(result.clone());
                })
                .await;
            }
            Err(e) => {
                let message = format!("{e:#}");
                warn!("job {job_id} failed: {message}");
                apply_transition(registry, pool, &job_id, JobState::Error, |record| {
                    record.finished_at = Some(now_ms());
                    record.push_log(format!("job error: {}", truncate(&message, ERROR_LOG_MAX)));
                    record.error = Some(message.clone());
                })
                .await;
            }
        }
    }
}

/// Replace a job's record with an updated copy, refusing to move the state
/// machine backwards. The durable mirror is updated best-effort.
async fn apply_transition(
    registry: &RwLock<HashMap<String, JobRecord>>,
    pool: &SqlitePool,
    job_id: &str,
    next_state: JobState,
    mutate: impl FnOnce(&mut JobRecord),
) {
    let updated = {
        let mut registry = registry.write().await;
        let Some(current) = registry.get(job_id) else {
            warn!("transition for unknown job {job_id} ignored");
            return;
        };
        if next_state.rank() < current.state.rank() || current.state.is_terminal() {
            warn!(
                "refusing job {job_id} state regression {} -> {}",
                current.state, next_state
            );
            return;
        }
        let mut record = current.clone();
        record.state = next_state;
        record.updated_at = now_ms();
        mutate(&mut record);
        registry.insert(job_id.to_string(), record.clone());
        record
    };

    if let Err(e) = persist_record(pool, &updated).await {
        warn!("could not persist job {job_id} state {next_state}: {e}");
    }
}

async fn persist_record(pool: &SqlitePool, record: &JobRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO index_jobs
            (job_id, status, created_at, started_at, finished_at, updated_at,
             result_json, error, logs_json)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&record.job_id)
    .bind(record.state.as_str())
    .bind(record.created_at)
    .bind(record.started_at)
    .bind(record.finished_at)
    .bind(record.updated_at)
    .bind(
        record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
    )
    .bind(&record.error)
    .bind(serde_json::to_string(&record.logs)?)
    .execute(pool)
    .await?;
    Ok(())
}

async fn fetch_record(pool: &SqlitePool, job_id: &str) -> Result<Option<JobRecord>> {
    let row = sqlx::query(
        "SELECT job_id, status, created_at, started_at, finished_at, updated_at,
                result_json, error, logs_json
         FROM index_jobs WHERE job_id = ?1",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    row.map(row_to_record).transpose()
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<JobRecord> {
    let status: String = row.get("status");
    let state = match status.as_str() {
        "pending" => JobState::Pending,
        "running" => JobState::Running,
        "completed" => JobState::Completed,
        "error" => JobState::Error,
        other => anyhow::bail!("invalid job state in store: {other:?}"),
    };
    let result_json: Option<String> = row.get("result_json");
    let logs_json: String = row.get("logs_json");

    Ok(JobRecord {
        job_id: row.get("job_id"),
        state,
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        updated_at: row.get("updated_at"),
        logs: serde_json::from_str(&logs_json)?,
        result: result_json.as_deref().map(serde_json::from_str).transpose()?,
        error: row.get("error"),
    })
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
