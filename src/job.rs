use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use anyhow::Result;

use crate::constants::{FAILED_KEY, job_status_key};
use crate::gateway::RedisGateway;
use crate::hooks::Hooks;
use crate::stats;
use crate::status::{self, JobStatus};
use crate::task::TaskRegistry;

/// The wire form of one enqueued job:
/// `{"class": ..., "args": [...], "id": ..., "queue": ...}`.
/// Unknown producers may omit `id` and `queue`; the reserver fills the queue
/// of origin and a fresh id keeps status tracking working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub class: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default = "JobPayload::new_id")]
    pub id: String,
    #[serde(default)]
    pub queue: String,
}

impl JobPayload {
    pub fn new(class: impl Into<String>, args: Vec<Value>, queue: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            args,
            id: Self::new_id(),
            queue: queue.into(),
        }
    }

    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Why a job failed. Carried in the terminal status record and in the
/// `failed` list entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureCause {
    pub exception: String,
    pub error: String,
    #[serde(default)]
    pub backtrace: Vec<String>,
    pub queue: String,
    pub failed_at: DateTime<Utc>,
}

/// One entry in the append-only `failed` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRecord {
    pub failed_at: DateTime<Utc>,
    pub payload: JobPayload,
    pub exception: String,
    pub error: String,
    #[serde(default)]
    pub backtrace: Vec<String>,
    pub worker: String,
    pub queue: String,
}

/// How a job execution went wrong before reaching a result.
#[derive(Debug)]
pub enum PerformError {
    /// No task is registered under the payload's class name.
    UnknownClass(String),
    /// The task ran and returned an error.
    Failed(anyhow::Error),
    /// The task panicked; the panic was contained by the task join.
    Panicked(String),
}

impl PerformError {
    pub fn exception(&self) -> &'static str {
        match self {
            PerformError::UnknownClass(_) => "UnknownTaskError",
            PerformError::Failed(_) => "TaskError",
            PerformError::Panicked(_) => "Panic",
        }
    }

    pub fn message(&self) -> String {
        match self {
            PerformError::UnknownClass(class) => {
                format!("no task registered for class '{class}'")
            }
            PerformError::Failed(err) => err.to_string(),
            PerformError::Panicked(message) => message.clone(),
        }
    }

    pub fn backtrace(&self) -> Vec<String> {
        match self {
            PerformError::Failed(err) => err.chain().map(|cause| cause.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn cause(&self, queue: &str) -> FailureCause {
        FailureCause {
            exception: self.exception().to_string(),
            error: self.message(),
            backtrace: self.backtrace(),
            queue: queue.to_string(),
            failed_at: Utc::now(),
        }
    }
}

/// A reserved job bound to the worker processing it.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub payload: JobPayload,
    pub worker: String,
    pub result: Option<Value>,
}

impl JobRecord {
    pub fn new(payload: JobPayload, worker: impl Into<String>) -> Self {
        Self {
            payload,
            worker: worker.into(),
            result: None,
        }
    }

    /// Resolve the payload's class and execute it. The task runs on its own
    /// tokio task so a panic is contained and reported as a failure instead
    /// of tearing down the worker.
    pub async fn perform(&mut self, tasks: &TaskRegistry) -> std::result::Result<Value, PerformError> {
        let task = tasks
            .resolve(&self.payload.class)
            .ok_or_else(|| PerformError::UnknownClass(self.payload.class.clone()))?;
        let args = self.payload.args.clone();
        let handle = tokio::spawn(async move { task.perform(&args).await });
        match handle.await {
            Ok(Ok(value)) => {
                self.result = Some(value.clone());
                Ok(value)
            }
            Ok(Err(err)) => Err(PerformError::Failed(err)),
            Err(join_err) if join_err.is_panic() => {
                let panic = join_err.into_panic();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "task panicked".to_string());
                Err(PerformError::Panicked(message))
            }
            Err(join_err) => Err(PerformError::Failed(anyhow::Error::new(join_err))),
        }
    }

    pub async fn update_status(
        &self,
        gateway: &mut RedisGateway,
        new_status: JobStatus,
        ttl_seconds: i64,
    ) -> Result<()> {
        status::write(
            gateway,
            &self.payload.id,
            new_status,
            self.result.clone(),
            None,
            ttl_seconds,
        )
        .await
    }

    /// Record a terminal success: status COMPLETE plus the processed
    /// counters, global and per-worker.
    pub async fn complete(&self, gateway: &mut RedisGateway, ttl_seconds: i64) -> Result<()> {
        status::write(
            gateway,
            &self.payload.id,
            JobStatus::Complete,
            self.result.clone(),
            None,
            ttl_seconds,
        )
        .await?;
        stats::incr_processed(gateway, &self.worker).await?;
        tracing::info!(
            job_id = %self.payload.id,
            class = %self.payload.class,
            queue = %self.payload.queue,
            "job completed"
        );
        Ok(())
    }

    /// Record a terminal failure: status FAILED with the cause, a record on
    /// the `failed` list, both failed counters, and the failure hook.
    pub async fn fail(
        &self,
        gateway: &mut RedisGateway,
        cause: FailureCause,
        hooks: Option<&Hooks>,
        ttl_seconds: i64,
    ) -> Result<()> {
        status::write(
            gateway,
            &self.payload.id,
            JobStatus::Failed,
            None,
            Some(cause.clone()),
            ttl_seconds,
        )
        .await?;

        let record = FailedRecord {
            failed_at: cause.failed_at,
            payload: self.payload.clone(),
            exception: cause.exception.clone(),
            error: cause.error.clone(),
            backtrace: cause.backtrace.clone(),
            worker: self.worker.clone(),
            queue: cause.queue.clone(),
        };
        gateway
            .rpush(FAILED_KEY, &serde_json::to_string(&record)?)
            .await?;
        stats::incr_failed(gateway, &self.worker).await?;

        tracing::warn!(
            job_id = %self.payload.id,
            class = %self.payload.class,
            queue = %cause.queue,
            error = %cause.error,
            "job failed"
        );
        if let Some(hooks) = hooks {
            hooks.on_failure(&self.payload, &cause);
        }
        Ok(())
    }

    pub async fn current_status(&self, gateway: &mut RedisGateway) -> Result<Option<JobStatus>> {
        status::current(gateway, &self.payload.id).await
    }

    pub fn status_key(&self) -> String {
        job_status_key(&self.payload.id)
    }
}

/// Execute a job and record its terminal state. Shared by the in-process
/// execution path and the child-process entry point.
pub async fn execute_and_account(
    gateway: &mut RedisGateway,
    tasks: &TaskRegistry,
    hooks: Option<&Hooks>,
    job: &mut JobRecord,
    ttl_seconds: i64,
) -> Result<()> {
    match job.perform(tasks).await {
        Ok(_) => job.complete(gateway, ttl_seconds).await,
        Err(err) => {
            let cause = err.cause(&job.payload.queue);
            job.fail(gateway, cause, hooks, ttl_seconds).await
        }
    }
}
