use anyhow::Result;

use resque::constants::worker_started_key;
use resque::gateway::RedisGateway;
use resque::load_settings;
use resque::registry;

pub(crate) async fn check_workers(config: Option<String>) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let mut gateway = RedisGateway::new(&settings.redis_dsn)?;

    let workers = registry::all(&mut gateway).await?;
    if workers.is_empty() {
        println!("No registered workers.");
        return Ok(());
    }

    println!("Found {} registered worker(s):", workers.len());
    for worker in workers {
        let id = worker.to_string();
        println!("  - {id}");
        if let Some(started) = gateway.get(&worker_started_key(&id)).await? {
            println!("    Started: {started}");
        }
        match registry::current_job(&mut gateway, &id).await? {
            Some(working) => {
                println!(
                    "    Working on: {} ({}) since {}",
                    working.payload.class,
                    working.queue,
                    working.run_at.to_rfc3339()
                );
            }
            None => println!("    Idle"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::RedisTestContext;
    use resque::WorkerId;

    #[tokio::test]
    async fn check_handles_empty_and_populated_registry() -> Result<()> {
        let mut ctx = RedisTestContext::new().await?;
        let config = ctx.write_config().await?;
        let config_path = Some(config.path().to_string_lossy().to_string());

        check_workers(config_path.clone()).await?;

        let id = WorkerId::new("host-a", 1, vec!["q".to_string()]);
        registry::register(&mut ctx.gateway, &id).await?;
        check_workers(config_path).await?;
        Ok(())
    }
}
