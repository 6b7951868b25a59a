// Session configuration
//
// Every field has a default so a partial JSON file is enough to override a
// single setting.

use crate::error::{EmgError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of input channels (fixed for the lifetime of a session)
    pub num_channels: usize,

    /// Capacity of each channel's display ring
    pub display_capacity: usize,

    /// Capacity of each channel's prediction window
    pub prediction_capacity: usize,

    /// Inference tick period
    pub inference_period_ms: u64,

    /// Worker pool size (None = one thread per core)
    pub worker_threads: Option<usize>,

    /// How long teardown waits for in-flight jobs
    pub shutdown_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            num_channels: 3,
            display_capacity: 2000,
            prediction_capacity: 700,
            inference_period_ms: 333,
            worker_threads: None,
            shutdown_timeout_ms: 5000,
        }
    }
}

impl SessionConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&content)?;
        config.validate()?;
        log::info!("Loaded session config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_channels == 0 {
            return Err(EmgError::InvalidConfig(
                "num_channels must be at least 1".to_string(),
            ));
        }
        if self.display_capacity == 0 {
            return Err(EmgError::InvalidConfig(
                "display_capacity must be at least 1".to_string(),
            ));
        }
        // Features need two samples
        if self.prediction_capacity < 2 {
            return Err(EmgError::InvalidConfig(format!(
                "prediction_capacity must be at least 2, got {}",
                self.prediction_capacity
            )));
        }
        if self.inference_period_ms == 0 {
            return Err(EmgError::InvalidConfig(
                "inference_period_ms must be positive".to_string(),
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(EmgError::InvalidConfig(
                "worker_threads must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.worker_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn inference_period(&self) -> Duration {
        Duration::from_millis(self.inference_period_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.inference_period(), Duration::from_millis(333));
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"num_channels": 2, "worker_threads": 4}}"#).unwrap();

        let config = SessionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.num_channels, 2);
        assert_eq!(config.worker_count(), 4);
        assert_eq!(config.prediction_capacity, 700);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let config = SessionConfig {
            num_channels: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EmgError::InvalidConfig(_))));

        let config = SessionConfig {
            prediction_capacity: 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EmgError::InvalidConfig(_))));

        let config = SessionConfig {
            worker_threads: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
