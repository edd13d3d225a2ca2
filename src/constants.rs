//! Redis key literals and defaults. The key layout is wire-compatible with
//! the Ruby/PHP Resque protocol, so other Resque clients and dashboards can
//! read and write the same database.

/// Prefix for per-queue job lists. A queue named "mail" stores its pending
/// payloads under the list "queue:mail".
pub const QUEUE_KEY_PREFIX: &str = "queue:";

/// Set of all queue names that have ever been pushed to.
pub const QUEUES_KEY: &str = "queues";

/// Set of registered worker ids.
pub const WORKERS_KEY: &str = "workers";

/// Prefix for per-worker keys. "worker:{id}" holds the in-flight job record,
/// "worker:{id}:started" the registration timestamp.
pub const WORKER_KEY_PREFIX: &str = "worker:";
pub const WORKER_STARTED_SUFFIX: &str = ":started";

/// Global counters. Per-worker variants are "stat:processed:{id}" and
/// "stat:failed:{id}".
pub const STAT_PROCESSED_KEY: &str = "stat:processed";
pub const STAT_FAILED_KEY: &str = "stat:failed";

/// Prefix for per-job keys. "job:{id}:status" holds the status record,
/// "job:{id}:pid" the pid of the child currently executing the job.
pub const JOB_KEY_PREFIX: &str = "job:";
pub const JOB_STATUS_SUFFIX: &str = ":status";
pub const JOB_PID_SUFFIX: &str = ":pid";

/// Append-only list of JSON failure records.
pub const FAILED_KEY: &str = "failed";

/// Queue token that expands to every known queue, lexically sorted,
/// re-evaluated at each reservation.
pub const WILDCARD_QUEUE: &str = "*";

pub const DEFAULT_REDIS_DSN: &str = "redis://localhost:6379/0";
pub const DEFAULT_INTERVAL_SECONDS: f64 = 5.0;
pub const DEFAULT_STATUS_TTL_SECONDS: i64 = 60 * 60 * 24;

/// How often the parent polls a forked child for exit, and therefore the
/// upper bound on signal latency while a job is in flight.
pub const REAP_POLL_INTERVAL_MS: u64 = 500;

/// Environment variables consumed by the worker runtime itself.
pub const PARENT_PID_ENV: &str = "RESQUE_PARENT_PID";
pub const WORKER_ID_ENV: &str = "RESQUE_WORKER_ID";

pub fn queue_key(queue: &str) -> String {
    format!("{QUEUE_KEY_PREFIX}{queue}")
}

pub fn worker_key(worker_id: &str) -> String {
    format!("{WORKER_KEY_PREFIX}{worker_id}")
}

pub fn worker_started_key(worker_id: &str) -> String {
    format!("{WORKER_KEY_PREFIX}{worker_id}{WORKER_STARTED_SUFFIX}")
}

pub fn stat_processed_key(worker_id: &str) -> String {
    format!("{STAT_PROCESSED_KEY}:{worker_id}")
}

pub fn stat_failed_key(worker_id: &str) -> String {
    format!("{STAT_FAILED_KEY}:{worker_id}")
}

pub fn job_status_key(job_id: &str) -> String {
    format!("{JOB_KEY_PREFIX}{job_id}{JOB_STATUS_SUFFIX}")
}

pub fn job_pid_key(job_id: &str) -> String {
    format!("{JOB_KEY_PREFIX}{job_id}{JOB_PID_SUFFIX}")
}
