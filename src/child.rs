use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::Duration;

use crate::constants::{REAP_POLL_INTERVAL_MS, WORKER_ID_ENV, job_pid_key};
use crate::gateway::RedisGateway;
use crate::job::JobPayload;
use crate::process::ProcessProbe;
use crate::worker::Control;

/// How one isolated job execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Exit code 0. The child normally records the terminal status itself;
    /// the parent promotes a still-running status to COMPLETE.
    Clean,
    /// Nonzero exit code.
    Code(i32),
    /// Killed by a signal or otherwise did not exit normally.
    Signaled,
}

/// Runs each job in a child process. The child command receives the
/// serialized payload on stdin and the worker id in `RESQUE_WORKER_ID`; the
/// supervisor interprets its exit status.
#[derive(Debug, Clone)]
pub struct ChildSupervisor {
    cmd: Vec<String>,
}

impl ChildSupervisor {
    pub fn new(cmd: Vec<String>) -> Result<Self> {
        if cmd.is_empty() {
            return Err(anyhow::anyhow!("child command must not be empty"));
        }
        Ok(Self { cmd })
    }

    pub async fn spawn(&self, payload: &JobPayload, worker_id: &str) -> Result<RunningChild> {
        let encoded = payload.encode()?;
        let mut command = Command::new(&self.cmd[0]);
        if self.cmd.len() > 1 {
            command.args(&self.cmd[1..]);
        }
        command
            .env(WORKER_ID_ENV, worker_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().context("failed to spawn job child")?;
        if let Some(mut stdin) = child.stdin.take() {
            // A child that dies before reading shows up at reap time; the
            // broken pipe itself is not the interesting error.
            if let Err(err) = stdin.write_all(encoded.as_bytes()).await {
                tracing::debug!(error = %err, "failed to write payload to child stdin");
            }
        }

        let pid = child.id();
        let forked_at = Utc::now();
        tracing::info!(
            child_pid = pid,
            job_id = %payload.id,
            forked_at = %forked_at.to_rfc3339(),
            "forked child for job"
        );
        Ok(RunningChild {
            child,
            pid,
            forked_at,
        })
    }
}

pub struct RunningChild {
    child: Child,
    pid: Option<u32>,
    forked_at: DateTime<Utc>,
}

impl RunningChild {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn forked_at(&self) -> DateTime<Utc> {
        self.forked_at
    }

    /// Wait for the child without blocking signal delivery: poll `try_wait`
    /// on a short cadence and act on pending control flags between polls,
    /// so a kill request lands within one poll interval.
    pub async fn reap(&mut self, control: &Control, probe: &dyn ProcessProbe) -> Result<ChildExit> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(interpret_exit(status));
            }
            if control.take_kill_child() {
                self.kill(control, probe);
            }
            tokio::time::sleep(Duration::from_millis(REAP_POLL_INTERVAL_MS)).await;
        }
    }

    /// SIGKILL the child, but only when its pid is still observable on the
    /// host. A vanished pid means the process table no longer agrees with
    /// us; the safe reaction is a graceful shutdown.
    fn kill(&self, control: &Control, probe: &dyn ProcessProbe) {
        let Some(pid) = self.pid else {
            tracing::warn!("no child pid to kill; scheduling graceful shutdown");
            control.request_shutdown();
            return;
        };
        if !probe.pid_alive(pid) {
            tracing::warn!(
                child_pid = pid,
                "child pid not found on host; scheduling graceful shutdown"
            );
            control.request_shutdown();
            return;
        }
        tracing::warn!(child_pid = pid, "killing child");
        if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::warn!(child_pid = pid, error = %err, "failed to kill child");
        }
    }
}

fn interpret_exit(status: ExitStatus) -> ChildExit {
    match status.code() {
        Some(0) => ChildExit::Clean,
        Some(code) => ChildExit::Code(code),
        None => ChildExit::Signaled,
    }
}

/// Child-side marker: record which pid is executing a job so external
/// observers can find the executor. Written before the job runs, removed on
/// normal exit; the TTL covers crashed children.
pub async fn write_pid_marker(
    gateway: &mut RedisGateway,
    job_id: &str,
    ttl_seconds: i64,
) -> Result<()> {
    gateway
        .set_ex(
            &job_pid_key(job_id),
            &std::process::id().to_string(),
            ttl_seconds.max(1) as u64,
        )
        .await
}

pub async fn clear_pid_marker(gateway: &mut RedisGateway, job_id: &str) -> Result<()> {
    gateway.del(&job_pid_key(job_id)).await
}
