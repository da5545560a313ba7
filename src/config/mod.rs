/// Configuration management for the Flowgrid engine
///
/// Handles server binding, the database location, engine timing defaults and
/// the base URLs of the energy services invoked by tasks.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub services: ServicesConfig,
}

/// HTTP server configuration (health endpoint only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. "sqlite://data/flowgrid.db"
    pub url: String,
}

/// Execution timing defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fixed wait between a failed attempt and its retry
    pub retry_backoff_secs: u64,
    /// Timeout for tasks that do not set their own
    pub default_task_timeout_secs: u64,
}

impl EngineConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_secs(self.default_task_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_backoff_secs: env_or("FLOWGRID_RETRY_BACKOFF_SECS", 30),
            default_task_timeout_secs: env_or("FLOWGRID_TASK_TIMEOUT_SECS", 300),
        }
    }
}

/// Base URLs of the forecast and optimization services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub forecast_url: String,
    pub optimization_url: String,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            forecast_url: std::env::var("FLOWGRID_FORECAST_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            optimization_url: std::env::var("FLOWGRID_OPTIMIZATION_URL")
                .unwrap_or_else(|_| "http://localhost:8002".to_string()),
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("FLOWGRID_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("FLOWGRID_PORT", 3004),
            },
            database: DatabaseConfig {
                url: std::env::var("FLOWGRID_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/flowgrid.db".to_string()),
            },
            engine: EngineConfig::default(),
            services: ServicesConfig::default(),
        }
    }
}

/// Parse an environment variable, falling back on absence or garbage
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
