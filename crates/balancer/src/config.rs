//! Balancer configuration

use anyhow::{ensure, Context, Result};
use balancer_lib::plan::PlanConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file
const CONFIG_PATH_ENV: &str = "BALANCER_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "balancer.toml";

/// Balancer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BalancerConfig {
    /// Name reported in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Time between balancing cycles in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// JSON fleet snapshot served by the in-memory cluster client
    #[serde(default)]
    pub fleet_snapshot: Option<PathBuf>,

    /// Start the balancing timer on boot
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub plans: Vec<PlanConfig>,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "load-balancer".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_interval() -> u64 {
    60
}

fn default_enabled() -> bool {
    true
}

impl BalancerConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load configuration from `path` (if present) overlaid by `BALANCER_*`
    /// environment variables
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("BALANCER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration {}", path.display()))?
            .try_deserialize()
            .context("Invalid balancer configuration")?;

        ensure!(config.interval_secs > 0, "interval_secs must be greater than zero");
        Ok(config)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
