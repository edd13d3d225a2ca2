use anyhow::Result;

use resque::gateway::RedisGateway;
use resque::load_settings;
use resque::queue;

pub(crate) async fn queue_list(config: Option<String>, show_empty: bool) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let mut gateway = RedisGateway::new(&settings.redis_dsn)?;

    let queues = queue::known_queues(&mut gateway).await?;
    if queues.is_empty() {
        println!("No known queues.");
        return Ok(());
    }

    for name in queues {
        let pending = queue::length(&mut gateway, &name).await?;
        if pending == 0 && !show_empty {
            continue;
        }
        println!("{name}: {pending} pending");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::RedisTestContext;
    use resque::JobPayload;

    #[tokio::test]
    async fn lists_known_queues_with_lengths() -> Result<()> {
        let mut ctx = RedisTestContext::new().await?;
        let config = ctx.write_config().await?;
        let config_path = Some(config.path().to_string_lossy().to_string());

        queue_list(config_path.clone(), true).await?;

        let payload = JobPayload::new("Echo", vec![], "cli-q");
        queue::push(&mut ctx.gateway, "cli-q", &payload).await?;
        queue_list(config_path, false).await?;
        Ok(())
    }
}
