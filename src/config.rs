use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::settings::ResqueSettings;

pub const DEFAULT_CONFIG_FILENAME: &str = "resque.toml";
pub const ENV_CONFIG_KEY: &str = "RESQUE_CONFIG";

/// Where the settings file was found, if anywhere. Precedence is the
/// `--config` flag, then `RESQUE_CONFIG`, then `resque.toml` in the working
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Flag(String),
    EnvVar(String),
    WorkingDir(String),
    /// No file anywhere; defaults plus environment overrides.
    Default,
}

impl ConfigSource {
    pub fn locate(config_path: Option<&str>) -> Self {
        if let Some(path) = config_path {
            return Self::Flag(path.to_string());
        }
        if let Some(path) = env_value(ENV_CONFIG_KEY) {
            return Self::EnvVar(path);
        }
        if Path::new(DEFAULT_CONFIG_FILENAME).is_file() {
            return Self::WorkingDir(DEFAULT_CONFIG_FILENAME.to_string());
        }
        Self::Default
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Flag(path) | Self::EnvVar(path) | Self::WorkingDir(path) => Some(path),
            Self::Default => None,
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flag(_) => write!(f, "--config flag"),
            Self::EnvVar(_) => write!(f, "{ENV_CONFIG_KEY} env var"),
            Self::WorkingDir(_) => write!(f, "{DEFAULT_CONFIG_FILENAME} in working directory"),
            Self::Default => write!(f, "built-in defaults"),
        }
    }
}

/// Load settings: the resolved TOML file (if any) with `RESQUE_*`
/// environment variables taking precedence over its values. A missing file
/// is not an error; defaults plus environment are a complete configuration.
pub fn load_settings(config_path: Option<&str>) -> Result<ResqueSettings> {
    dotenvy::dotenv().ok();

    let mut settings = match ConfigSource::locate(config_path).path() {
        Some(path) => {
            let payload = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config at {path}"))?;
            parse_config(&payload).with_context(|| format!("invalid resque config at {path}"))?
        }
        None => ResqueSettings::default(),
    };
    EnvOverrides::from_env()?.apply(&mut settings);
    Ok(settings)
}

/// Settings live under a `[resque]` table; a file without one is read as
/// bare top-level settings.
fn parse_config(payload: &str) -> Result<ResqueSettings> {
    let document: toml::Value = toml::from_str(payload).context("failed to parse TOML")?;
    let section = match document.get("resque") {
        Some(section) => section.clone(),
        None => document,
    };
    let settings: ResqueSettings = section.try_into().context("unrecognized settings")?;
    Ok(settings)
}

/// Environment overrides, parsed into their target types up front so a bad
/// value fails the load instead of being silently dropped.
#[derive(Debug, Default)]
struct EnvOverrides {
    redis_dsn: Option<String>,
    interval_seconds: Option<f64>,
    blocking: Option<bool>,
    status_ttl_seconds: Option<i64>,
}

impl EnvOverrides {
    fn from_env() -> Result<Self> {
        Ok(Self {
            redis_dsn: env_value("RESQUE_REDIS_DSN"),
            interval_seconds: env_parsed("RESQUE_INTERVAL_SECONDS")?,
            blocking: env_bool("RESQUE_BLOCKING")?,
            status_ttl_seconds: env_parsed("RESQUE_STATUS_TTL_SECONDS")?,
        })
    }

    fn apply(self, settings: &mut ResqueSettings) {
        if let Some(redis_dsn) = self.redis_dsn {
            settings.redis_dsn = redis_dsn;
        }
        if let Some(interval_seconds) = self.interval_seconds {
            settings.interval_seconds = interval_seconds;
        }
        if let Some(blocking) = self.blocking {
            settings.blocking = blocking;
        }
        if let Some(status_ttl_seconds) = self.status_ttl_seconds {
            settings.status_ttl_seconds = status_ttl_seconds;
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_value(name)
        .map(|raw| {
            raw.parse()
                .map_err(|err| anyhow::anyhow!("invalid {name} value '{raw}': {err}"))
        })
        .transpose()
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(raw) = env_value(name) else {
        return Ok(None);
    };
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(anyhow::anyhow!("invalid {name} value '{raw}'")),
    }
}
