use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::geo::BoundingBox;
use crate::retry::RetryPolicy;

/// Flight-data API settings. The access key is not part of the file; it comes
/// from `SKYTRACK_API_KEY`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_url")]
    pub url: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_retry")]
    pub retry: RetryPolicy,
}

fn default_api_url() -> String {
    "http://api.aviationstack.com/v1/flights".to_string()
}

fn default_limit() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_api_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay_ms: 1000,
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            limit: default_limit(),
            timeout_secs: default_timeout_secs(),
            retry: default_api_retry(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL; wins over the individual fields below
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default = "default_db_password")]
    pub password: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_db_host() -> String {
    "db".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "aviation".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_db_password() -> String {
    "postgres".to_string()
}

fn default_pool_size() -> u32 {
    4
}

fn default_connection_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_db_host(),
            port: default_db_port(),
            name: default_db_name(),
            user: default_db_user(),
            password: default_db_password(),
            pool_size: default_pool_size(),
            connection_timeout_secs: default_connection_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.name
            ),
        }
    }
}

/// How long the tracker sleeps after each kind of cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Nothing came back from the API
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
    /// Flights came back but none inside the bounding box
    #[serde(default = "default_quiet_secs")]
    pub quiet_secs: u64,
    /// Normal polling cadence after a persisted batch
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// After a failed cycle
    #[serde(default = "default_idle_secs")]
    pub recovery_secs: u64,
}

fn default_idle_secs() -> u64 {
    60
}

fn default_quiet_secs() -> u64 {
    300
}

fn default_poll_secs() -> u64 {
    3600
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            idle_secs: default_idle_secs(),
            quiet_secs: default_quiet_secs(),
            poll_secs: default_poll_secs(),
            recovery_secs: default_idle_secs(),
        }
    }
}

impl ScheduleConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn quiet(&self) -> Duration {
        Duration::from_secs(self.quiet_secs)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    pub fn recovery(&self) -> Duration {
        Duration::from_secs(self.recovery_secs)
    }
}

/// Top-level configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub bbox: BoundingBox,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Filled from `SKYTRACK_API_KEY`, never from the file
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl TrackerConfig {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: TrackerConfig =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }

    /// Load the file if it exists (defaults otherwise), apply environment
    /// overrides and validate.
    pub fn resolve(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            tracing::info!("No config file at {:?}, using defaults", path);
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("SKYTRACK_API_KEY")
            && !key.trim().is_empty()
        {
            self.api_key = Some(key.trim().to_string());
        }
        if let Ok(url) = std::env::var("DATABASE_URL")
            && !url.is_empty()
        {
            self.database.url = Some(url);
        }
    }

    /// Check everything that would otherwise only fail once the loop runs.
    pub fn validate(&self) -> Result<()> {
        self.bbox.validate().context("Invalid [bbox] section")?;
        if self.api.retry.max_attempts == 0 {
            bail!("api.retry.max_attempts must be at least 1");
        }
        if self.database.retry.max_attempts == 0 {
            bail!("database.retry.max_attempts must be at least 1");
        }
        if self.api.limit == 0 {
            bail!("api.limit must be at least 1");
        }
        if self.database.pool_size == 0 {
            bail!("database.pool_size must be at least 1");
        }
        Ok(())
    }

    /// The API key, required by anything that talks to the flight API.
    pub fn require_api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .context("SKYTRACK_API_KEY must be set in environment variables")
    }
}

/// Resolve the config file path.
///
/// Priority:
/// 1. explicit `--config` argument
/// 2. `SKYTRACK_CONFIG` env var
/// 3. `/etc/skytrack/skytrack.toml` (production/staging)
/// 4. `./skytrack.toml` (development)
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("SKYTRACK_CONFIG") {
        return PathBuf::from(path);
    }

    match std::env::var("SKYTRACK_ENV").as_deref() {
        Ok("production") | Ok("staging") => PathBuf::from("/etc/skytrack/skytrack.toml"),
        _ => PathBuf::from("./skytrack.toml"),
    }
}
