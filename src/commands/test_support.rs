use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use resque::RedisGateway;
use resque::ResqueSettings;

static REDIS_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn redis_lock() -> &'static Mutex<()> {
    REDIS_LOCK.get_or_init(|| Mutex::new(()))
}

pub struct RedisTestContext {
    _guard: MutexGuard<'static, ()>,
    pub settings: ResqueSettings,
    pub gateway: RedisGateway,
}

pub struct TempConfig {
    path: PathBuf,
}

impl TempConfig {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempConfig {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
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

    pub async fn write_config(&self) -> Result<TempConfig> {
        let path = std::env::temp_dir().join(format!("resque-test-{}.toml", Uuid::new_v4()));
        // child_cmd is pinned so a worker started under the test harness
        // never re-invokes the test binary as its job child.
        let payload = format!(
            "[resque]\nredis_dsn = \"{}\"\ninterval_seconds = 0.0\nchild_cmd = [\"true\"]\n",
            self.settings.redis_dsn
        );
        fs::write(&path, payload).await?;
        Ok(TempConfig { path })
    }
}
