//! Coordinator configuration
//!
//! Settings are read from the environment; every value has a default so a
//! bare `conveyor-coordinator` starts an in-memory, single-node instance.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP and WebSocket server binds to
    pub bind_addr: String,

    /// Postgres connection string; the in-memory store is used when unset
    pub database_url: Option<String>,

    /// YAML file with projects, commits and tasks to load at startup
    pub catalog_path: Option<PathBuf>,

    /// How often pending builds are matched with ready builders
    pub dispatch_interval: Duration,

    /// Capacity of the event fan-out channel
    pub event_buffer: usize,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - COORDINATOR_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - DATABASE_URL (optional)
    /// - CATALOG_PATH (optional)
    /// - DISPATCH_INTERVAL (optional, seconds, default: 5)
    /// - EVENT_BUFFER (optional, default: 1024)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind_addr = std::env::var("COORDINATOR_BIND_ADDR").unwrap_or(defaults.bind_addr);

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let catalog_path = std::env::var("CATALOG_PATH").ok().map(PathBuf::from);

        let dispatch_interval = match std::env::var("DISPATCH_INTERVAL") {
            Ok(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .map_err(|e| anyhow::anyhow!("invalid DISPATCH_INTERVAL {raw:?}: {e}"))?,
            ),
            Err(_) => defaults.dispatch_interval,
        };

        let event_buffer = std::env::var("EVENT_BUFFER")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.event_buffer);

        Ok(Self {
            bind_addr,
            database_url,
            catalog_path,
            dispatch_interval,
            event_buffer,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.trim().is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if let Some(url) = &self.database_url
            && !url.starts_with("postgres://")
            && !url.starts_with("postgresql://")
        {
            anyhow::bail!("database_url must start with postgres:// or postgresql://");
        }

        if self.dispatch_interval.is_zero() {
            anyhow::bail!("dispatch_interval must be greater than 0");
        }

        if self.event_buffer == 0 {
            anyhow::bail!("event_buffer must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            catalog_path: None,
            dispatch_interval: Duration::from_secs(5),
            event_buffer: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.dispatch_interval, Duration::from_secs(5));
        assert!(config.database_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.database_url = Some("mysql://localhost/db".to_string());
        assert!(config.validate().is_err());

        config.database_url = Some("postgres://conveyor@localhost/conveyor".to_string());
        assert!(config.validate().is_ok());

        config.dispatch_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
