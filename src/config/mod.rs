use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::lb::{Host, HostIdentity, LoadBalancer, PollingConfig};

/// Houses configuration for the smart pool client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartConfig {
    /// Initial cluster nodes, as `"name"` or `"name:port"` entries
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Interval in seconds between polling cycles (default: 120)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Whether the polling daemon refreshes cluster membership
    #[serde(default = "default_enabled")]
    pub host_update_enabled: bool,

    /// Whether the polling daemon probes each host's health
    #[serde(default = "default_enabled")]
    pub health_check_enabled: bool,

    /// Per-host cool-down base override in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_wait_time_ms: Option<u64>,
}

fn default_poll_interval() -> u64 {
    120
}

fn default_enabled() -> bool {
    true
}

impl SmartConfig {
    /// Create a configuration seeded with the given host entries.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the interval in seconds to wait between polling cycles.
    pub fn with_poll_interval(mut self, seconds: u64) -> Self {
        self.poll_interval = seconds;
        self
    }

    pub fn with_host_update_enabled(mut self, enabled: bool) -> Self {
        self.host_update_enabled = enabled;
        self
    }

    pub fn with_health_check_enabled(mut self, enabled: bool) -> Self {
        self.health_check_enabled = enabled;
        self
    }

    /// Override the cool-down base applied to every configured host.
    pub fn with_error_wait_time(mut self, wait: Duration) -> Self {
        self.error_wait_time_ms = Some(wait.as_millis() as u64);
        self
    }

    /// Build a [`LoadBalancer`] seeded with the configured hosts.
    pub fn build_balancer(&self) -> Result<LoadBalancer> {
        let mut hosts = Vec::with_capacity(self.hosts.len());
        for entry in &self.hosts {
            let identity = HostIdentity::parse(entry)
                .with_context(|| format!("invalid host entry {entry:?} in configuration"))?;
            let host = Host::from(identity);
            if let Some(wait) = self.error_wait_time_ms {
                host.set_error_wait_time(Duration::from_millis(wait));
            }
            hosts.push(host);
        }
        Ok(LoadBalancer::new(hosts))
    }

    /// Project the polling settings for a [`crate::lb::PollingDaemon`].
    pub fn polling(&self) -> PollingConfig {
        PollingConfig {
            poll_interval: Duration::from_secs(self.poll_interval),
            host_update_enabled: self.host_update_enabled,
            health_check_enabled: self.health_check_enabled,
        }
    }
}

impl Default for SmartConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            poll_interval: default_poll_interval(),
            host_update_enabled: default_enabled(),
            health_check_enabled: default_enabled(),
            error_wait_time_ms: None,
        }
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<SmartConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: SmartConfig =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

/// Load configuration from environment variables
///
/// Supported variables:
/// - SMARTPOOL_HOSTS (comma-separated list of `name` or `name:port` entries)
/// - SMARTPOOL_POLL_INTERVAL (seconds, defaults to 120)
/// - SMARTPOOL_HOST_UPDATE / SMARTPOOL_HEALTH_CHECK (true/false)
/// - SMARTPOOL_ERROR_WAIT_MS (optional cool-down base override)
pub fn load_from_env() -> Result<SmartConfig> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let hosts_str =
        std::env::var("SMARTPOOL_HOSTS").context("SMARTPOOL_HOSTS environment variable not set")?;

    let hosts: Vec<String> = hosts_str
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if hosts.is_empty() {
        anyhow::bail!("SMARTPOOL_HOSTS contains no valid host entries");
    }

    let mut config = SmartConfig::new(hosts);

    if let Ok(interval) = std::env::var("SMARTPOOL_POLL_INTERVAL") {
        if let Ok(val) = interval.parse() {
            config.poll_interval = val;
        }
    }

    if let Ok(update) = std::env::var("SMARTPOOL_HOST_UPDATE") {
        if let Ok(val) = update.parse() {
            config.host_update_enabled = val;
        }
    }

    if let Ok(check) = std::env::var("SMARTPOOL_HEALTH_CHECK") {
        if let Ok(val) = check.parse() {
            config.health_check_enabled = val;
        }
    }

    if let Ok(wait) = std::env::var("SMARTPOOL_ERROR_WAIT_MS") {
        if let Ok(val) = wait.parse() {
            config.error_wait_time_ms = Some(val);
        }
    }

    Ok(config)
}

/// Load configuration from file or environment
///
/// This is a convenience function that loads from a YAML file when a path is
/// given and falls back to environment variables otherwise.
pub fn load_config(config_path: Option<&str>) -> Result<SmartConfig> {
    match config_path {
        Some(path) => load_from_yaml(path),
        None => load_from_env(),
    }
}
