use anyhow::{Context, Result};
use serde_json::Value;

use resque::ResqueClient;
use resque::load_settings;

pub(crate) async fn job_submit(
    config: Option<String>,
    class: String,
    args: Option<String>,
    queue: String,
) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let args: Vec<Value> = match args {
        Some(raw) => serde_json::from_str(&raw).context("--args must be a JSON array")?,
        None => Vec::new(),
    };

    let mut client = ResqueClient::new(settings)?;
    let payload = client.enqueue(&class, args, &queue).await?;
    println!("Enqueued {} on {} (id {})", payload.class, queue, payload.id);
    Ok(())
}

pub(crate) async fn job_status(config: Option<String>, job_id: String) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let mut client = ResqueClient::new(settings)?;
    match client.status(&job_id).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("Status for {job_id}: UNKNOWN"),
    }
    Ok(())
}
