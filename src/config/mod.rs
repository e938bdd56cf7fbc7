use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::pool::PoolConfig;

/// Pool sizing and connection lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Maximum number of connections (default: 10)
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Connections dialled at startup (default: 0)
    #[serde(default)]
    pub initial: usize,

    /// Idle timeout in milliseconds, 0 disables (default: 90000)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Maximum connection life in milliseconds, 0 disables (default: 0)
    #[serde(default)]
    pub max_life_ms: u64,

    /// Acquire timeout in milliseconds, 0 waits indefinitely (default: 30000)
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_capacity() -> usize {
    10
}

fn default_idle_timeout_ms() -> u64 {
    90_000
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            initial: 0,
            idle_timeout_ms: default_idle_timeout_ms(),
            max_life_ms: 0,
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        let acquire_timeout = match settings.acquire_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        PoolConfig::new(settings.initial, settings.capacity)
            .with_idle_timeout(Duration::from_millis(settings.idle_timeout_ms))
            .with_max_life(Duration::from_millis(settings.max_life_ms))
            .with_acquire_timeout(acquire_timeout)
    }
}

/// Target the pool connects to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target address as host:port (default: 127.0.0.1:18081)
    #[serde(default = "default_address")]
    pub address: String,

    /// Connect timeout in milliseconds (default: 5000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Enable TCP keep-alive (default: true)
    #[serde(default = "default_keepalive")]
    pub keepalive: bool,
}

fn default_address() -> String {
    "127.0.0.1:18081".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_keepalive() -> bool {
    true
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            keepalive: default_keepalive(),
        }
    }
}

impl TargetConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pool settings
    #[serde(default)]
    pub pool: PoolSettings,

    /// Connection target
    #[serde(default)]
    pub target: TargetConfig,
}

impl Config {
    /// Pool configuration derived from these settings
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::from(&self.pool)
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config = serde_yaml::from_str(&content)
        .context("Failed to parse YAML configuration")?;

    Ok(config)
}

/// Load configuration from environment variables
///
/// Every variable is optional; unset ones keep their defaults:
/// - CONNPOOL_TARGET (host:port)
/// - CONNPOOL_CONNECT_TIMEOUT_MS
/// - CONNPOOL_KEEPALIVE (true/false)
/// - CONNPOOL_CAPACITY
/// - CONNPOOL_INITIAL
/// - CONNPOOL_IDLE_TIMEOUT_MS
/// - CONNPOOL_MAX_LIFE_MS
/// - CONNPOOL_ACQUIRE_TIMEOUT_MS
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let mut config = Config::default();

    if let Ok(address) = std::env::var("CONNPOOL_TARGET") {
        let address = address.trim();
        if address.is_empty() {
            anyhow::bail!("CONNPOOL_TARGET is empty");
        }
        config.target.address = address.to_string();
    }

    if let Some(val) = env_parse("CONNPOOL_CONNECT_TIMEOUT_MS")? {
        config.target.connect_timeout_ms = val;
    }
    if let Some(val) = env_parse("CONNPOOL_KEEPALIVE")? {
        config.target.keepalive = val;
    }
    if let Some(val) = env_parse("CONNPOOL_CAPACITY")? {
        config.pool.capacity = val;
    }
    if let Some(val) = env_parse("CONNPOOL_INITIAL")? {
        config.pool.initial = val;
    }
    if let Some(val) = env_parse("CONNPOOL_IDLE_TIMEOUT_MS")? {
        config.pool.idle_timeout_ms = val;
    }
    if let Some(val) = env_parse("CONNPOOL_MAX_LIFE_MS")? {
        config.pool.max_life_ms = val;
    }
    if let Some(val) = env_parse("CONNPOOL_ACQUIRE_TIMEOUT_MS")? {
        config.pool.acquire_timeout_ms = val;
    }

    Ok(config)
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .context(format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(None),
    }
}

/// Load configuration from file or environment
///
/// Reads the YAML file when a path is given, otherwise falls back to
/// environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    match config_path {
        Some(path) => load_from_yaml(path),
        None => load_from_env(),
    }
}
