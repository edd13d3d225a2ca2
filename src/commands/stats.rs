use anyhow::Result;

use resque::ResqueClient;
use resque::gateway::RedisGateway;
use resque::load_settings;
use resque::{registry, stats};

pub(crate) async fn stats_show(config: Option<String>) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let mut gateway = RedisGateway::new(&settings.redis_dsn)?;

    let processed = stats::processed(&mut gateway, None).await?;
    let failed = stats::failed(&mut gateway, None).await?;
    println!("processed: {processed}");
    println!("failed:    {failed}");

    for worker in registry::all(&mut gateway).await? {
        let id = worker.to_string();
        let processed = stats::processed(&mut gateway, Some(&id)).await?;
        let failed = stats::failed(&mut gateway, Some(&id)).await?;
        println!("  {id}: processed {processed}, failed {failed}");
    }
    Ok(())
}

pub(crate) async fn failed_list(config: Option<String>, limit: usize) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let mut client = ResqueClient::new(settings)?;

    let records = client.failed(limit).await?;
    if records.is_empty() {
        println!("No failures recorded.");
        return Ok(());
    }
    for record in records {
        println!(
            "{} {} on {} ({}: {}) worker={}",
            record.failed_at.to_rfc3339(),
            record.payload.class,
            record.queue,
            record.exception,
            record.error,
            record.worker
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::RedisTestContext;

    #[tokio::test]
    async fn stats_and_failed_render_without_errors() -> Result<()> {
        let mut ctx = RedisTestContext::new().await?;
        let config = ctx.write_config().await?;
        let config_path = Some(config.path().to_string_lossy().to_string());

        stats_show(config_path.clone()).await?;
        failed_list(config_path.clone(), 10).await?;

        stats::incr_processed(&mut ctx.gateway, "w1").await?;
        stats::incr_failed(&mut ctx.gateway, "w1").await?;
        stats_show(config_path).await?;
        Ok(())
    }
}
