//! scaleswap.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::InstanceBounds;

/// Revisions retained per owner, counting the active one.
pub const DEFAULT_KEEP_COUNT: usize = 3;

/// Fallback bounds when an active revision carries no autoscale profile.
pub const DEFAULT_MIN_INSTANCES: u32 = 0;
pub const DEFAULT_MAX_INSTANCES: u32 = 2;
pub const DEFAULT_DESIRED_INSTANCES: u32 = 1;

pub const DEFAULT_STEADY_STATE_TIMEOUT_MINUTES: u32 = 10;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployerConfig {
    #[serde(default)]
    pub steady_state: SteadyStateConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub defaults: DefaultBoundsConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteadyStateConfig {
    pub poll_interval_secs: Option<u64>,
    pub default_timeout_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub keep_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultBoundsConfig {
    pub min_instances: Option<u32>,
    pub max_instances: Option<u32>,
    pub desired_instances: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    pub resize_new_first: Option<bool>,
}

impl Default for SteadyStateConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: Some(DEFAULT_POLL_INTERVAL_SECS),
            default_timeout_minutes: Some(DEFAULT_STEADY_STATE_TIMEOUT_MINUTES),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_count: Some(DEFAULT_KEEP_COUNT),
        }
    }
}

impl Default for DefaultBoundsConfig {
    fn default() -> Self {
        Self {
            min_instances: Some(DEFAULT_MIN_INSTANCES),
            max_instances: Some(DEFAULT_MAX_INSTANCES),
            desired_instances: Some(DEFAULT_DESIRED_INSTANCES),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            resize_new_first: Some(true),
        }
    }
}

impl DeployerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DeployerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(
            self.steady_state
                .poll_interval_secs
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        )
    }

    /// Steady-state wait budget for a task-supplied timeout.
    ///
    /// Non-positive task values fall back to the configured default.
    pub fn steady_state_timeout(&self, task_minutes: i32) -> Duration {
        let minutes = if task_minutes > 0 {
            task_minutes as u64
        } else {
            self.steady_state
                .default_timeout_minutes
                .unwrap_or(DEFAULT_STEADY_STATE_TIMEOUT_MINUTES) as u64
        };
        Duration::from_secs(minutes * 60)
    }

    pub fn keep_count(&self) -> usize {
        self.retention.keep_count.unwrap_or(DEFAULT_KEEP_COUNT)
    }

    pub fn default_bounds(&self) -> InstanceBounds {
        InstanceBounds::new(
            self.defaults.min_instances.unwrap_or(DEFAULT_MIN_INSTANCES),
            self.defaults.max_instances.unwrap_or(DEFAULT_MAX_INSTANCES),
            self.defaults
                .desired_instances
                .unwrap_or(DEFAULT_DESIRED_INSTANCES),
        )
    }

    pub fn resize_new_first(&self) -> bool {
        self.deploy.resize_new_first.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: DeployerConfig = toml::from_str("").unwrap();
        assert_eq!(config.keep_count(), DEFAULT_KEEP_COUNT);
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
        assert_eq!(config.default_bounds(), InstanceBounds::new(0, 2, 1));
        assert!(config.resize_new_first());
    }

    #[test]
    fn parses_partial_sections() {
        let toml_str = r#"
[retention]
keep_count = 5

[steady_state]
poll_interval_secs = 2

[deploy]
resize_new_first = false
"#;
        let config: DeployerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.keep_count(), 5);
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(
            config.steady_state_timeout(0),
            Duration::from_secs(DEFAULT_STEADY_STATE_TIMEOUT_MINUTES as u64 * 60)
        );
        assert!(!config.resize_new_first());
    }

    #[test]
    fn task_timeout_overrides_default() {
        let config = DeployerConfig::default();
        assert_eq!(config.steady_state_timeout(3), Duration::from_secs(180));
        assert_eq!(config.steady_state_timeout(-1), Duration::from_secs(600));
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaleswap.toml");
        std::fs::write(&path, DeployerConfig::default().to_toml_string().unwrap()).unwrap();
        let loaded = DeployerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.keep_count(), DEFAULT_KEEP_COUNT);
    }
}
