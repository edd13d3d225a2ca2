use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;

use resque::child;
use resque::constants::{PARENT_PID_ENV, WORKER_ID_ENV};
use resque::gateway::RedisGateway;
use resque::job::{self, JobPayload, JobRecord};
use resque::task::{Task, TaskFn, TaskRegistry};
use resque::worker::Worker;
use resque::{ConfigSource, load_settings};

/// Tasks the shipped binary knows how to run. Real deployments link the
/// library and register their own; these exist so an installation can be
/// smoke-tested end to end.
pub(crate) fn builtin_tasks() -> TaskRegistry {
    let mut tasks = TaskRegistry::new();
    tasks.register(
        "Echo",
        Arc::new(TaskFn(|args: &[Value]| -> Result<Value> { Ok(json!(args)) })),
    );
    tasks.register("Sleep", Arc::new(SleepTask));
    tasks.register(
        "Fail",
        Arc::new(TaskFn(|args: &[Value]| -> Result<Value> {
            let message = args
                .first()
                .and_then(Value::as_str)
                .unwrap_or("failed on request");
            Err(anyhow::anyhow!("{message}"))
        })),
    );
    tasks
}

struct SleepTask;

#[async_trait::async_trait]
impl Task for SleepTask {
    async fn perform(&self, args: &[Value]) -> Result<Value> {
        let seconds = args.first().and_then(Value::as_f64).unwrap_or(1.0);
        tokio::time::sleep(std::time::Duration::from_secs_f64(seconds.clamp(0.0, 3600.0))).await;
        Ok(Value::Null)
    }
}

pub(crate) async fn run_worker(
    config: Option<String>,
    queues: Vec<String>,
    interval: Option<f64>,
    blocking: bool,
    count: usize,
) -> Result<()> {
    if queues.is_empty() {
        return Err(anyhow::anyhow!(
            "at least one --queue is required (use '*' for all known queues)"
        ));
    }
    if count == 0 {
        return Err(anyhow::anyhow!("--count must be positive"));
    }
    if count > 1 {
        return spawn_fleet(count, config.as_deref(), &queues, interval, blocking).await;
    }

    let source = ConfigSource::locate(config.as_deref());
    if let Some(path) = source.path() {
        tracing::info!(path, origin = %source, "loading settings");
    }
    let mut settings = load_settings(config.as_deref())?;
    if let Some(interval) = interval {
        settings.interval_seconds = interval;
    }
    if blocking {
        settings.blocking = true;
    }
    if settings.child_cmd.is_none() {
        settings.child_cmd = Some(child_exec_cmd(source.path())?);
    }

    let mut worker = Worker::new(settings, queues, builtin_tasks())?;
    worker.run().await
}

/// The default isolation command: this executable re-invoked as a one-job
/// child that reads the payload from stdin.
fn child_exec_cmd(config_path: Option<&str>) -> Result<Vec<String>> {
    let exe = std::env::current_exe().context("failed to locate current executable")?;
    let mut cmd = vec![
        exe.to_string_lossy().to_string(),
        "worker".to_string(),
        "exec".to_string(),
    ];
    if let Some(path) = config_path {
        cmd.push("--config".to_string());
        cmd.push(path.to_string());
    }
    Ok(cmd)
}

/// Child entry point: execute exactly one job whose payload arrives on
/// stdin, record its terminal state, and exit. A nonzero exit here is what
/// the parent reports as a dirty exit.
pub(crate) async fn exec_job(config: Option<String>) -> Result<()> {
    let settings = load_settings(config.as_deref())?;

    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("failed to read payload from stdin")?;
    let payload = JobPayload::decode(raw.trim()).context("malformed job payload on stdin")?;
    let worker_id =
        std::env::var(WORKER_ID_ENV).unwrap_or_else(|_| format!("unknown:0:{}", payload.queue));

    let mut gateway = RedisGateway::new(&settings.redis_dsn)?;
    child::write_pid_marker(&mut gateway, &payload.id, settings.status_ttl_seconds).await?;

    let mut job = JobRecord::new(payload, worker_id);
    let tasks = builtin_tasks();
    let outcome = job::execute_and_account(
        &mut gateway,
        &tasks,
        None,
        &mut job,
        settings.status_ttl_seconds,
    )
    .await;

    child::clear_pid_marker(&mut gateway, &job.payload.id).await?;
    outcome
}

/// Launch `count` independent single workers as children of this process.
/// Each child monitors this pid and shuts down gracefully if orphaned.
async fn spawn_fleet(
    count: usize,
    config: Option<&str>,
    queues: &[String],
    interval: Option<f64>,
    blocking: bool,
) -> Result<()> {
    let exe = std::env::current_exe().context("failed to locate current executable")?;
    let mut children = Vec::with_capacity(count);
    for index in 0..count {
        let mut command = tokio::process::Command::new(&exe);
        command.arg("worker").arg("run").arg("--count").arg("1");
        if let Some(config) = config {
            command.arg("--config").arg(config);
        }
        for queue in queues {
            command.arg("--queue").arg(queue);
        }
        if let Some(interval) = interval {
            command.arg("--interval").arg(interval.to_string());
        }
        if blocking {
            command.arg("--blocking");
        }
        command.env(PARENT_PID_ENV, std::process::id().to_string());
        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn worker {index}"))?;
        tracing::info!(index, child_pid = child.id(), "spawned worker");
        children.push(child);
    }

    for mut child in children {
        let status = child.wait().await?;
        if !status.success() {
            tracing::warn!(%status, "worker exited with failure");
        }
    }
    Ok(())
}
