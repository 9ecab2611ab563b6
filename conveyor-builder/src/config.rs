//! Builder configuration
//!
//! Defines the builder's identity, where to reach the coordinator and the
//! limits applied while running steps.

use std::path::PathBuf;
use std::time::Duration;

/// Builder configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Durable identity; a reconnect with the same id resumes the same builder
    pub builder_id: String,

    /// Coordinator base URL (e.g., "ws://localhost:8080")
    pub coordinator_url: String,

    /// Directory holding one working tree per project
    pub workspace_dir: PathBuf,

    /// Time a container gets to stop before it is killed
    pub stop_grace_period: Duration,

    /// Maximum run time of a derived parameter command
    pub derived_parameter_timeout: Duration,

    /// Upper bound of the reconnect backoff
    pub reconnect_max_delay: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(builder_id: String, coordinator_url: String) -> Self {
        Self {
            builder_id,
            coordinator_url,
            workspace_dir: std::env::temp_dir().join("conveyor"),
            stop_grace_period: Duration::from_secs(10),
            derived_parameter_timeout: Duration::from_secs(60),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - BUILDER_ID (required)
    /// - COORDINATOR_URL (required)
    /// - WORKSPACE_DIR (optional, default: $TMPDIR/conveyor)
    /// - STOP_GRACE_PERIOD (optional, seconds, default: 10)
    /// - DERIVED_PARAMETER_TIMEOUT (optional, seconds, default: 60)
    /// - RECONNECT_MAX_DELAY (optional, seconds, default: 30)
    pub fn from_env() -> anyhow::Result<Self> {
        let builder_id = std::env::var("BUILDER_ID")
            .map_err(|_| anyhow::anyhow!("BUILDER_ID environment variable not set"))?;

        let coordinator_url = std::env::var("COORDINATOR_URL")
            .map_err(|_| anyhow::anyhow!("COORDINATOR_URL environment variable not set"))?;

        let mut config = Self::new(builder_id, coordinator_url);

        if let Ok(dir) = std::env::var("WORKSPACE_DIR") {
            config.workspace_dir = PathBuf::from(dir);
        }
        if let Some(grace) = seconds("STOP_GRACE_PERIOD") {
            config.stop_grace_period = grace;
        }
        if let Some(timeout) = seconds("DERIVED_PARAMETER_TIMEOUT") {
            config.derived_parameter_timeout = timeout;
        }
        if let Some(delay) = seconds("RECONNECT_MAX_DELAY") {
            config.reconnect_max_delay = delay;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.builder_id.trim().is_empty() {
            anyhow::bail!("builder_id cannot be empty");
        }

        if !self.coordinator_url.starts_with("ws://") && !self.coordinator_url.starts_with("wss://")
        {
            anyhow::bail!("coordinator_url must start with ws:// or wss://");
        }

        if self.derived_parameter_timeout.is_zero() {
            anyhow::bail!("derived_parameter_timeout must be greater than 0");
        }

        if self.reconnect_max_delay.is_zero() {
            anyhow::bail!("reconnect_max_delay must be greater than 0");
        }

        Ok(())
    }

    /// URL of the builder socket on the coordinator
    pub fn socket_url(&self) -> String {
        format!(
            "{}/builders/ws?builderId={}",
            self.coordinator_url.trim_end_matches('/'),
            self.builder_id
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "ws://localhost:8080".to_string(),
        )
    }
}

fn seconds(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}
