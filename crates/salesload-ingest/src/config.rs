//! Loader configuration
//!
//! Values come from the environment (a `.env` file is honoured), fall back
//! to the defaults below and can be overridden by CLI flags before
//! [`LoaderConfig::validate`] runs.

use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/salesload";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default bound on waiting for a pooled connection, in seconds.
pub const DEFAULT_DATABASE_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default rows per load task.
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

/// Database engine behind the URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Mysql,
}

impl BackendKind {
    pub fn as_str(&self) -> &str {
        match self {
            BackendKind::Postgres => "postgres",
            BackendKind::Mysql => "mysql",
        }
    }

    /// Engine implied by a connection URL scheme
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("mysql://") || url.starts_with("mariadb://") {
            BackendKind::Mysql
        } else {
            BackendKind::Postgres
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(BackendKind::Postgres),
            "mysql" | "mariadb" => Ok(BackendKind::Mysql),
            _ => Err(format!("Invalid backend: {} (expected postgres or mysql)", s)),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub database: DatabaseConfig,
    pub load: LoadSettings,
}

/// Connection pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSettings {
    pub backend: BackendKind,
    pub chunk_size: usize,
    /// Tasks in flight at once; `None` means one per pooled connection
    pub max_concurrency: Option<usize>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl LoaderConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Read the environment without validating
    pub fn from_env() -> anyhow::Result<Self> {
        let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let backend = match std::env::var("LOAD_BACKEND") {
            Ok(value) => value.parse().map_err(anyhow::Error::msg)?,
            Err(_) => BackendKind::from_url(&url),
        };

        Ok(Self {
            database: DatabaseConfig {
                url,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
                acquire_timeout_secs: env_or(
                    "DATABASE_ACQUIRE_TIMEOUT",
                    DEFAULT_DATABASE_ACQUIRE_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            load: LoadSettings {
                backend,
                chunk_size: env_or("LOAD_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
                max_concurrency: std::env::var("LOAD_MAX_CONCURRENCY")
                    .ok()
                    .and_then(|s| s.parse().ok()),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        self.chunk_size()?;
        let concurrency = self.max_concurrency()?;

        if concurrency.get() > self.database.max_connections as usize {
            tracing::warn!(
                max_concurrency = concurrency.get(),
                max_connections = self.database.max_connections,
                "Concurrency exceeds pool size; tasks will queue for connections"
            );
        }

        Ok(())
    }

    pub fn chunk_size(&self) -> Result<NonZeroUsize, LoadError> {
        NonZeroUsize::new(self.load.chunk_size)
            .ok_or_else(|| LoadError::config("chunk size must be greater than 0"))
    }

    pub fn max_concurrency(&self) -> Result<NonZeroUsize, LoadError> {
        let value = self
            .load
            .max_concurrency
            .unwrap_or(self.database.max_connections as usize);
        NonZeroUsize::new(value).ok_or_else(|| LoadError::config("max concurrency must be greater than 0"))
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                acquire_timeout_secs: DEFAULT_DATABASE_ACQUIRE_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            load: LoadSettings {
                backend: BackendKind::Postgres,
                chunk_size: DEFAULT_CHUNK_SIZE,
                max_concurrency: None,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "DATABASE_MAX_CONNECTIONS",
        "DATABASE_MIN_CONNECTIONS",
        "DATABASE_ACQUIRE_TIMEOUT",
        "DATABASE_IDLE_TIMEOUT",
        "LOAD_BACKEND",
        "LOAD_CHUNK_SIZE",
        "LOAD_MAX_CONCURRENCY",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = LoaderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size().unwrap().get(), 50_000);
        assert_eq!(config.max_concurrency().unwrap().get(), 10);
    }

    #[test]
    fn test_zero_chunk_size_is_configuration_error() {
        let mut config = LoaderConfig::default();
        config.load.chunk_size = 0;
        assert_eq!(config.chunk_size().unwrap_err().kind(), FailureKind::ConfigurationError);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let mut config = LoaderConfig::default();
        config.database.min_connections = 20;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_connections"));
    }

    #[test]
    fn test_backend_from_url_and_str() {
        assert_eq!(BackendKind::from_url("mysql://root@localhost/sales"), BackendKind::Mysql);
        assert_eq!(BackendKind::from_url("postgres://localhost/sales"), BackendKind::Postgres);
        assert_eq!("PostgreSQL".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert!("oracle".parse::<BackendKind>().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_reads_overrides() {
        clear_env();
        std::env::set_var("DATABASE_URL", "mysql://root@localhost/sales");
        std::env::set_var("LOAD_CHUNK_SIZE", "1000");
        std::env::set_var("LOAD_MAX_CONCURRENCY", "4");

        let config = LoaderConfig::from_env().unwrap();
        assert_eq!(config.load.backend, BackendKind::Mysql);
        assert_eq!(config.load.chunk_size, 1000);
        assert_eq!(config.max_concurrency().unwrap().get(), 4);
        assert_eq!(config.database.max_connections, DEFAULT_DATABASE_MAX_CONNECTIONS);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unknown_backend() {
        clear_env();
        std::env::set_var("LOAD_BACKEND", "sqlite");
        assert!(LoaderConfig::from_env().is_err());
        clear_env();
    }
}
