use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{WORKERS_KEY, worker_key, worker_started_key};
use crate::gateway::RedisGateway;
use crate::job::{FailureCause, JobPayload, JobRecord};
use crate::process::ProcessProbe;
use crate::stats;

/// Stable identity of one worker process: `host:pid:queue,queue,...`.
/// The queues segment keeps declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerId {
    pub hostname: String,
    pub pid: u32,
    pub queues: Vec<String>,
}

impl WorkerId {
    pub fn new(hostname: impl Into<String>, pid: u32, queues: Vec<String>) -> Self {
        Self {
            hostname: hostname.into(),
            pid,
            queues,
        }
    }

    /// Identity for this process on this host.
    pub fn local(queues: Vec<String>) -> Result<Self> {
        let hostname = nix::unistd::gethostname()
            .context("failed to read hostname")?
            .to_string_lossy()
            .to_string();
        Ok(Self::new(hostname, std::process::id(), queues))
    }

    /// Parse `host:pid:queues`, splitting only on the first two colons so
    /// queue names may themselves contain colons.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, ':');
        let hostname = parts.next()?;
        let pid = parts.next()?.parse::<u32>().ok()?;
        let queues = parts.next()?;
        if hostname.is_empty() {
            return None;
        }
        Some(Self::new(
            hostname,
            pid,
            queues.split(',').map(|queue| queue.to_string()).collect(),
        ))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.hostname, self.pid, self.queues.join(","))
    }
}

/// The ephemeral `worker:{id}` record present exactly while a job is in
/// flight on that worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingOn {
    pub queue: String,
    pub run_at: DateTime<Utc>,
    pub payload: JobPayload,
}

/// Add the worker to the registry and stamp its start time.
pub async fn register(gateway: &mut RedisGateway, id: &WorkerId) -> Result<()> {
    let id_string = id.to_string();
    gateway.sadd(WORKERS_KEY, &id_string).await?;
    gateway
        .set(&worker_started_key(&id_string), &Utc::now().to_rfc3339())
        .await?;
    tracing::info!(worker = %id_string, "worker registered");
    Ok(())
}

/// Remove the worker and every key attached to it. A job still held by the
/// worker is failed first so it does not vanish silently.
pub async fn unregister(
    gateway: &mut RedisGateway,
    id: &WorkerId,
    status_ttl_seconds: i64,
) -> Result<()> {
    let id_string = id.to_string();

    if let Some(working) = current_job(gateway, &id_string).await? {
        let job = JobRecord::new(working.payload, id_string.clone());
        let cause = FailureCause {
            exception: "DirtyExit".to_string(),
            error: "Dirty exit (no message)".to_string(),
            backtrace: Vec::new(),
            queue: working.queue,
            failed_at: Utc::now(),
        };
        job.fail(gateway, cause, None, status_ttl_seconds).await?;
    }

    gateway.srem(WORKERS_KEY, &id_string).await?;
    gateway.del(&worker_key(&id_string)).await?;
    gateway.del(&worker_started_key(&id_string)).await?;
    stats::clear(gateway, &id_string).await?;
    tracing::info!(worker = %id_string, "worker unregistered");
    Ok(())
}

/// Every registered worker whose id parses; unparseable ids are skipped.
pub async fn all(gateway: &mut RedisGateway) -> Result<Vec<WorkerId>> {
    let members = gateway.smembers(WORKERS_KEY).await?;
    Ok(members
        .iter()
        .filter_map(|member| WorkerId::parse(member))
        .collect())
}

pub async fn exists(gateway: &mut RedisGateway, id: &str) -> Result<bool> {
    gateway.sismember(WORKERS_KEY, id).await
}

/// Read the in-flight job record for a worker, if any.
pub async fn current_job(gateway: &mut RedisGateway, id: &str) -> Result<Option<WorkingOn>> {
    let raw = gateway.get(&worker_key(id)).await?;
    match raw {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(working) => Ok(Some(working)),
            Err(err) => {
                tracing::warn!(worker = %id, error = %err, "unreadable in-flight record");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Unregister workers on *this* host whose process is gone. Workers on
/// other hosts are never touched, and neither is the calling worker.
pub async fn prune_dead_workers(
    gateway: &mut RedisGateway,
    probe: &dyn ProcessProbe,
    self_id: &WorkerId,
    status_ttl_seconds: i64,
) -> Result<Vec<WorkerId>> {
    let live_pids = probe.worker_pids();
    let mut pruned = Vec::new();
    for worker in all(gateway).await? {
        if worker.hostname != self_id.hostname {
            continue;
        }
        if worker.pid == self_id.pid {
            continue;
        }
        if live_pids.contains(&worker.pid) {
            continue;
        }
        tracing::warn!(worker = %worker, "pruning dead worker");
        unregister(gateway, &worker, status_ttl_seconds).await?;
        pruned.push(worker);
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{FAILED_KEY, stat_failed_key, stat_processed_key};
    use crate::status::{self, JobStatus};
    use crate::test_support::RedisTestContext;
    use std::collections::HashSet;

    struct FakeProbe {
        alive: HashSet<u32>,
    }

    impl ProcessProbe for FakeProbe {
        fn pid_alive(&self, pid: u32) -> bool {
            self.alive.contains(&pid)
        }

        fn worker_pids(&self) -> HashSet<u32> {
            self.alive.clone()
        }
    }

    fn worker_id(host: &str, pid: u32) -> WorkerId {
        WorkerId::new(host, pid, vec!["q".to_string()])
    }

    #[test]
    fn identity_round_trips_through_display() {
        let id = WorkerId::new("host-a", 42, vec!["high".to_string(), "low".to_string()]);
        let rendered = id.to_string();
        assert_eq!(rendered, "host-a:42:high,low");
        assert_eq!(WorkerId::parse(&rendered), Some(id));
    }

    #[test]
    fn parse_splits_only_first_two_colons() {
        let id = WorkerId::parse("host:10:a:b,c").expect("parses");
        assert_eq!(id.hostname, "host");
        assert_eq!(id.pid, 10);
        assert_eq!(id.queues, vec!["a:b".to_string(), "c".to_string()]);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(WorkerId::parse("no-colons"), None);
        assert_eq!(WorkerId::parse("host:notapid:q"), None);
        assert_eq!(WorkerId::parse(":1:q"), None);
    }

    #[tokio::test]
    async fn register_and_unregister_lifecycle() {
        let mut ctx = RedisTestContext::new().await.unwrap();
        let id = worker_id("host-a", 100);
        let id_string = id.to_string();

        register(&mut ctx.gateway, &id).await.unwrap();
        assert!(exists(&mut ctx.gateway, &id_string).await.unwrap());
        assert!(
            ctx.gateway
                .get(&worker_started_key(&id_string))
                .await
                .unwrap()
                .is_some()
        );

        // Seed per-worker counters so unregistration has something to clear.
        stats::incr_processed(&mut ctx.gateway, &id_string)
            .await
            .unwrap();
        stats::incr_failed(&mut ctx.gateway, &id_string)
            .await
            .unwrap();

        unregister(&mut ctx.gateway, &id, 600).await.unwrap();
        assert!(!exists(&mut ctx.gateway, &id_string).await.unwrap());
        for key in [
            worker_key(&id_string),
            worker_started_key(&id_string),
            stat_processed_key(&id_string),
            stat_failed_key(&id_string),
        ] {
            assert!(ctx.gateway.get(&key).await.unwrap().is_none(), "{key}");
        }
    }

    #[tokio::test]
    async fn unregister_fails_in_flight_job() {
        let mut ctx = RedisTestContext::new().await.unwrap();
        let id = worker_id("host-a", 101);
        let id_string = id.to_string();
        register(&mut ctx.gateway, &id).await.unwrap();

        let payload = JobPayload::new("Echo", vec![], "q");
        let job_id = payload.id.clone();
        let working = WorkingOn {
            queue: "q".to_string(),
            run_at: Utc::now(),
            payload,
        };
        ctx.gateway
            .set(&worker_key(&id_string), &serde_json::to_string(&working).unwrap())
            .await
            .unwrap();

        unregister(&mut ctx.gateway, &id, 600).await.unwrap();

        let record = status::read(&mut ctx.gateway, &job_id)
            .await
            .unwrap()
            .expect("status recorded");
        assert_eq!(record.status, JobStatus::Failed);
        let cause = record.cause.expect("cause recorded");
        assert_eq!(cause.error, "Dirty exit (no message)");
        assert_eq!(ctx.gateway.llen(FAILED_KEY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn all_skips_unparseable_ids() {
        let mut ctx = RedisTestContext::new().await.unwrap();
        register(&mut ctx.gateway, &worker_id("host-a", 1))
            .await
            .unwrap();
        ctx.gateway
            .sadd(WORKERS_KEY, "not-a-worker-id")
            .await
            .unwrap();

        let workers = all(&mut ctx.gateway).await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].pid, 1);
    }

    #[tokio::test]
    async fn prune_removes_only_dead_local_workers() {
        let mut ctx = RedisTestContext::new().await.unwrap();
        let me = worker_id("host-a", 10);
        let dead_local = worker_id("host-a", 99999);
        let live_local = worker_id("host-a", 20);
        let remote = worker_id("host-b", 99999);
        for worker in [&me, &dead_local, &live_local, &remote] {
            register(&mut ctx.gateway, worker).await.unwrap();
        }

        let probe = FakeProbe {
            alive: HashSet::from([10, 20]),
        };
        let pruned = prune_dead_workers(&mut ctx.gateway, &probe, &me, 600)
            .await
            .unwrap();
        assert_eq!(pruned, vec![dead_local.clone()]);

        assert!(!exists(&mut ctx.gateway, &dead_local.to_string()).await.unwrap());
        assert!(exists(&mut ctx.gateway, &me.to_string()).await.unwrap());
        assert!(exists(&mut ctx.gateway, &live_local.to_string()).await.unwrap());
        assert!(exists(&mut ctx.gateway, &remote.to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn prune_never_removes_self_even_if_unlisted() {
        let mut ctx = RedisTestContext::new().await.unwrap();
        let me = worker_id("host-a", 10);
        register(&mut ctx.gateway, &me).await.unwrap();

        let probe = FakeProbe {
            alive: HashSet::new(),
        };
        let pruned = prune_dead_workers(&mut ctx.gateway, &probe, &me, 600)
            .await
            .unwrap();
        assert!(pruned.is_empty());
        assert!(exists(&mut ctx.gateway, &me.to_string()).await.unwrap());
    }
}
