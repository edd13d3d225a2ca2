use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_INTERVAL_SECONDS, DEFAULT_REDIS_DSN, DEFAULT_STATUS_TTL_SECONDS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ResqueSettings {
    pub redis_dsn: String,
    /// Seconds between polls when a reservation comes back empty. Zero means
    /// a single pass: the worker exits on the first empty reservation.
    pub interval_seconds: f64,
    /// Reserve with a multi-key blocking pop instead of polling.
    pub blocking: bool,
    /// TTL applied to per-job status records.
    pub status_ttl_seconds: i64,
    /// Command that executes one job in an isolated child process. The child
    /// receives the serialized payload on stdin and the worker id in
    /// `RESQUE_WORKER_ID`; its exit code is interpreted by the supervisor.
    /// When unset, jobs run in-process.
    pub child_cmd: Option<Vec<String>>,
}

impl Default for ResqueSettings {
    fn default() -> Self {
        Self {
            redis_dsn: DEFAULT_REDIS_DSN.to_string(),
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            blocking: false,
            status_ttl_seconds: DEFAULT_STATUS_TTL_SECONDS,
            child_cmd: None,
        }
    }
}
