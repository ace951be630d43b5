use crate::error::{CacheError, CacheResult};
use serde::Deserialize;
use sqlx::MySqlPool;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub db: DbConfig,

    /// Scheduler tick period, seconds.
    pub update_gap_sec: u64,
    /// Max records drained per container per tick.
    pub update_size: usize,
    /// Delay between `set_gc` and eviction, seconds.
    pub gc_seconds: i64,
    /// Maintain atomic cell read/write counters (costs a fetch-add per access).
    #[serde(default)]
    pub rw_analyse: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub name: String,
    #[serde(default = "default_encode")]
    pub encode: String,

    // Connection pool
    pub pool_size: u32,
    pub connect_timeout_sec: u64,
}

fn default_encode() -> String {
    "utf8mb4".to_string()
}

impl CacheConfig {
    pub fn load(path: impl AsRef<Path>) -> CacheResult<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> CacheResult<()> {
        self.db.validate()?;

        if self.update_gap_sec == 0 {
            return Err(CacheError::InvalidConfig(
                "update_gap_sec must be > 0".into(),
            ));
        }
        if self.update_size == 0 {
            return Err(CacheError::InvalidConfig("update_size must be > 0".into()));
        }
        if self.gc_seconds < 0 {
            return Err(CacheError::InvalidConfig(
                "gc_seconds must be >= 0".into(),
            ));
        }

        Ok(())
    }
}

impl DbConfig {
    pub fn validate(&self) -> CacheResult<()> {
        if self.host.trim().is_empty() {
            return Err(CacheError::MissingConfig("db.host"));
        }
        if self.port == 0 {
            return Err(CacheError::InvalidConfig("db.port must be > 0".into()));
        }
        if self.user.trim().is_empty() {
            return Err(CacheError::MissingConfig("db.user"));
        }
        if self.name.trim().is_empty() {
            return Err(CacheError::MissingConfig("db.name"));
        }
        if self.pool_size == 0 {
            return Err(CacheError::InvalidConfig("db.pool_size must be >= 1".into()));
        }
        if self.connect_timeout_sec == 0 {
            return Err(CacheError::InvalidConfig(
                "db.connect_timeout_sec must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.pass)
            .database(&self.name)
            .charset(&self.encode)
    }

    pub(crate) fn pool_options(&self) -> MySqlPoolOptions {
        MySqlPoolOptions::new()
            .max_connections(self.pool_size)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_sec))
    }

    pub(crate) async fn connect(&self) -> CacheResult<MySqlPool> {
        let pool = self
            .pool_options()
            .connect_with(self.connect_options())
            .await?;
        Ok(pool)
    }
}
