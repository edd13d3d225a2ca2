use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::job_status_key;
use crate::gateway::RedisGateway;
use crate::job::FailureCause;

/// Job lifecycle states. The worker only moves a job forward through
/// WAITING → RUNNING → (COMPLETE | FAILED); the store itself does not
/// enforce the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Waiting,
    Running,
    Failed,
    Complete,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "WAITING",
            JobStatus::Running => "RUNNING",
            JobStatus::Failed => "FAILED",
            JobStatus::Complete => "COMPLETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "WAITING" => Some(JobStatus::Waiting),
            "RUNNING" => Some(JobStatus::Running),
            "FAILED" => Some(JobStatus::Failed),
            "COMPLETE" => Some(JobStatus::Complete),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Complete)
    }
}

/// The JSON record stored under `job:{id}:status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: JobStatus,
    pub updated: DateTime<Utc>,
    pub started: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,
}

/// Read the status record for a job. `None` means the status is unknown:
/// the key never existed or its TTL expired.
pub async fn read(gateway: &mut RedisGateway, job_id: &str) -> Result<Option<StatusRecord>> {
    let raw = gateway.get(&job_status_key(job_id)).await?;
    match raw {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                tracing::warn!(job_id, error = %err, "discarding unreadable status record");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

pub async fn current(gateway: &mut RedisGateway, job_id: &str) -> Result<Option<JobStatus>> {
    Ok(read(gateway, job_id).await?.map(|record| record.status))
}

/// Overwrite the status record. `started` is carried over from the existing
/// record when present, so terminal writes keep the original start time.
pub async fn write(
    gateway: &mut RedisGateway,
    job_id: &str,
    status: JobStatus,
    result: Option<Value>,
    cause: Option<FailureCause>,
    ttl_seconds: i64,
) -> Result<()> {
    let now = Utc::now();
    let started = read(gateway, job_id)
        .await?
        .map(|existing| existing.started)
        .unwrap_or(now);
    let record = StatusRecord {
        status,
        updated: now,
        started,
        result,
        cause,
    };
    let encoded = serde_json::to_string(&record)?;
    gateway
        .set_ex(&job_status_key(job_id), &encoded, ttl_seconds.max(1) as u64)
        .await?;
    Ok(())
}

pub async fn remove(gateway: &mut RedisGateway, job_id: &str) -> Result<()> {
    gateway.del(&job_status_key(job_id)).await
}
