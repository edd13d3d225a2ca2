use std::sync::OnceLock;

use anyhow::Result;
use tokio::sync::{Mutex, MutexGuard};

use crate::gateway::RedisGateway;
use crate::settings::ResqueSettings;

static REDIS_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn redis_lock() -> &'static Mutex<()> {
    REDIS_LOCK.get_or_init(|| Mutex::new(()))
}

/// Exclusive access to a flushed test database. Tests touch global keys
/// (`workers`, `stat:processed`, ...), so they serialize on one lock and
/// start from an empty database.
pub struct RedisTestContext {
    _guard: MutexGuard<'static, ()>,
    pub settings: ResqueSettings,
    pub gateway: RedisGateway,
}

impl RedisTestContext {
    pub async fn new() -> Result<Self> {
        let guard = redis_lock().lock().await;
        let redis_dsn = std::env::var("RESQUE_TEST_REDIS_DSN")
            .unwrap_or_else(|_| "redis://localhost:6379/15".to_string());
        let settings = ResqueSettings {
            redis_dsn,
            ..ResqueSettings::default()
        };
        let mut gateway = RedisGateway::new(&settings.redis_dsn)?;
        gateway.flushdb().await?;
        Ok(Self {
            _guard: guard,
            settings,
            gateway,
        })
    }
}
