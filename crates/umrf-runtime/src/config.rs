//! Engine configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Timing knobs of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a cooperative stop waits for a worker before detaching it
    pub stop_timeout_secs: u64,
    /// Cadence of the cleanup reaper
    pub reaper_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 4,
            reaper_interval_ms: 2_000,
        }
    }
}

impl EngineConfig {
    /// Load the configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stop_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "stop_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.reaper_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "reaper_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_stop_timeout_secs(mut self, secs: u64) -> Self {
        self.stop_timeout_secs = secs;
        self
    }

    pub fn with_reaper_interval_ms(mut self, millis: u64) -> Self {
        self.reaper_interval_ms = millis;
        self
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.stop_timeout(), Duration::from_secs(4));
        assert_eq!(config.reaper_interval(), Duration::from_millis(2_000));
        config.validate().unwrap();
    }

    #[test]
    fn test_parses_partial_yaml() {
        let config: EngineConfig = serde_yaml::from_str("reaper_interval_ms: 250\n").unwrap();
        assert_eq!(config.reaper_interval(), Duration::from_millis(250));
        assert_eq!(config.stop_timeout_secs, 4);
    }

    #[test]
    fn test_rejects_zero_cadence() {
        let config = EngineConfig::default().with_reaper_interval_ms(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
