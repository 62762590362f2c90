use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::QueueError;

/// Longest retry delay a config may ask for (24h)
pub const MAX_RETRY_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
    pub hub: HubConfig,
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Stored tasks (any state) before submissions are rejected
    pub capacity: usize,
    /// Processing slots
    pub max_concurrent: usize,
    /// Longest accepted input, in characters
    pub max_input_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_concurrent: 5,
            max_input_len: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
    pub max_retries: u32,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 2000,
            cap_delay_ms: 60000,
            max_retries: 5,
            jitter: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub dispatch_interval_ms: u64,
    pub retry_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: 500,
            retry_interval_ms: 5000,
        }
    }
}

impl SchedulerConfig {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Events buffered per observer before it is disconnected
    pub subscriber_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { subscriber_buffer: 256 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { timeout_ms: 120_000 }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject settings the queue cannot run with
    pub fn validate(&self) -> std::result::Result<(), QueueError> {
        let invalid = |msg: &str| Err(QueueError::Config(msg.to_string()));

        if self.queue.capacity == 0 {
            return invalid("queue.capacity must be at least 1");
        }
        if self.queue.max_concurrent == 0 {
            return invalid("queue.max_concurrent must be at least 1");
        }
        if self.queue.max_input_len == 0 {
            return invalid("queue.max_input_len must be at least 1");
        }
        if self.retry.base_delay_ms == 0 {
            return invalid("retry.base_delay_ms must be at least 1");
        }
        if self.retry.cap_delay_ms < self.retry.base_delay_ms {
            return invalid("retry.cap_delay_ms must not be below retry.base_delay_ms");
        }
        if self.retry.cap_delay_ms > MAX_RETRY_DELAY_MS {
            return invalid("retry.cap_delay_ms must not exceed 24h");
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return invalid("retry.jitter must be in [0, 1)");
        }
        if self.scheduler.dispatch_interval_ms == 0 || self.scheduler.retry_interval_ms == 0 {
            return invalid("scheduler intervals must be at least 1ms");
        }
        if self.hub.subscriber_buffer < 2 {
            return invalid("hub.subscriber_buffer must be at least 2");
        }
        if self.executor.timeout_ms == 0 {
            return invalid("executor.timeout_ms must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.queue.capacity, 100);
        assert_eq!(config.queue.max_concurrent, 5);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.retry.cap_delay_ms, 60000);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.scheduler.dispatch_interval(), Duration::from_millis(500));
        assert_eq!(config.scheduler.retry_interval(), Duration::from_secs(5));
        assert_eq!(config.executor.timeout(), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_partial_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "queue:\n  max_concurrent: 2\nretry:\n  max_retries: 1").unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.queue.max_concurrent, 2);
        assert_eq!(config.queue.capacity, 100);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.base_delay_ms, 2000);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "queue:\n  max_concurrent: 0").unwrap();

        let result = Config::load(Some(&file.path().to_path_buf()));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_explicit_path_errors() {
        let path = PathBuf::from("/nonexistent/genqueue.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = Config::default();
        config.queue.max_concurrent = 0;
        assert!(matches!(config.validate(), Err(QueueError::Config(_))));
    }

    #[test]
    fn test_validate_zero_capacity() {
        let mut config = Config::default();
        config.queue.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_cap_below_base() {
        let mut config = Config::default();
        config.retry.cap_delay_ms = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_cap_delay_upper_bound() {
        let mut config = Config::default();
        config.retry.cap_delay_ms = MAX_RETRY_DELAY_MS;
        assert!(config.validate().is_ok());

        config.retry.base_delay_ms = 100_000_000_000_000_000;
        config.retry.cap_delay_ms = 100_000_000_000_000_000;
        assert!(matches!(config.validate(), Err(QueueError::Config(_))));
    }

    #[test]
    fn test_validate_jitter_range() {
        let mut config = Config::default();
        config.retry.jitter = 1.0;
        assert!(config.validate().is_err());
        config.retry.jitter = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_tiny_subscriber_buffer() {
        let mut config = Config::default();
        config.hub.subscriber_buffer = 1;
        assert!(config.validate().is_err());
    }
}
