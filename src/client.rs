use anyhow::Result;
use serde_json::Value;

use crate::gateway::RedisGateway;
use crate::job::{FailedRecord, JobPayload};
use crate::queue;
use crate::settings::ResqueSettings;
use crate::status::{self, JobStatus, StatusRecord};

/// Enqueue-side API: a payload push plus a WAITING status record. Producers
/// in other languages do exactly this against the same keys.
#[derive(Clone)]
pub struct ResqueClient {
    settings: ResqueSettings,
    gateway: RedisGateway,
}

impl ResqueClient {
    pub fn new(settings: ResqueSettings) -> Result<Self> {
        let gateway = RedisGateway::new(&settings.redis_dsn)?;
        Ok(Self { settings, gateway })
    }

    pub fn settings(&self) -> &ResqueSettings {
        &self.settings
    }

    pub async fn enqueue(
        &mut self,
        class: &str,
        args: Vec<Value>,
        queue: &str,
    ) -> Result<JobPayload> {
        let payload = JobPayload::new(class, args, queue);
        queue::push(&mut self.gateway, queue, &payload).await?;
        status::write(
            &mut self.gateway,
            &payload.id,
            JobStatus::Waiting,
            None,
            None,
            self.settings.status_ttl_seconds,
        )
        .await?;
        tracing::info!(job_id = %payload.id, class, queue, "job enqueued");
        Ok(payload)
    }

    pub async fn status(&mut self, job_id: &str) -> Result<Option<StatusRecord>> {
        status::read(&mut self.gateway, job_id).await
    }

    /// The most recent entries on the `failed` list, newest last.
    pub async fn failed(&mut self, limit: usize) -> Result<Vec<FailedRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = -(limit as isize);
        let raw = self
            .gateway
            .lrange(crate::constants::FAILED_KEY, start, -1)
            .await?;
        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }
}
