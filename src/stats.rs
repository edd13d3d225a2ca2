use anyhow::Result;

use crate::constants::{STAT_FAILED_KEY, STAT_PROCESSED_KEY, stat_failed_key, stat_processed_key};
use crate::gateway::RedisGateway;

/// Count one completed job, globally and for the worker.
pub async fn incr_processed(gateway: &mut RedisGateway, worker_id: &str) -> Result<()> {
    gateway.incr(STAT_PROCESSED_KEY).await?;
    gateway.incr(&stat_processed_key(worker_id)).await?;
    Ok(())
}

/// Count one failed job, globally and for the worker.
pub async fn incr_failed(gateway: &mut RedisGateway, worker_id: &str) -> Result<()> {
    gateway.incr(STAT_FAILED_KEY).await?;
    gateway.incr(&stat_failed_key(worker_id)).await?;
    Ok(())
}

pub async fn processed(gateway: &mut RedisGateway, worker_id: Option<&str>) -> Result<u64> {
    let key = match worker_id {
        Some(id) => stat_processed_key(id),
        None => STAT_PROCESSED_KEY.to_string(),
    };
    read_counter(gateway, &key).await
}

pub async fn failed(gateway: &mut RedisGateway, worker_id: Option<&str>) -> Result<u64> {
    let key = match worker_id {
        Some(id) => stat_failed_key(id),
        None => STAT_FAILED_KEY.to_string(),
    };
    read_counter(gateway, &key).await
}

/// Drop a worker's counters. Called when the worker is unregistered; the
/// global counters are never cleared.
pub async fn clear(gateway: &mut RedisGateway, worker_id: &str) -> Result<()> {
    gateway.del(&stat_processed_key(worker_id)).await?;
    gateway.del(&stat_failed_key(worker_id)).await?;
    Ok(())
}

async fn read_counter(gateway: &mut RedisGateway, key: &str) -> Result<u64> {
    let raw = gateway.get(key).await?;
    Ok(raw.and_then(|value| value.parse().ok()).unwrap_or(0))
}
