//! Engine configuration
//!
//! Every field has a default so partial JSON files are accepted.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::Result;
use crate::runtime::LogLevel;
use crate::workflow::ErrorPolicy;

pub mod defaults {
    pub const ACTION_TIMEOUT_MS: u64 = 30_000;
    /// Retries for `retry` policies that omit `maxAttempts`
    pub const RETRY_COUNT: u32 = 3;
    pub const MIN_SELECTOR_CONFIDENCE: f64 = 0.5;
    pub const MAX_LOOP_ITERATIONS: u32 = 100;
    /// Dispatch budget per execution (infinite loop protection)
    pub const MAX_STEPS: u32 = 1000;
    pub const WAIT_POLL_INTERVAL_MS: u64 = 100;
    pub const WAIT_TIMEOUT_MS: u64 = 30_000;
}

/// Runtime behaviour for one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Timeout for an action when the node does not set its own
    pub action_timeout_ms: u64,
    /// Retries for a `retry` policy without `maxAttempts`
    pub retry_count: u32,
    /// Delay between retry attempts
    pub retry_delay_ms: u64,
    /// Record action steps as skipped instead of performing them
    pub dry_run: bool,
    /// Minimum level appended to the record's log stream
    pub log_level: LogLevel,
    /// Ask the action collaborator for a screenshot after each action
    pub capture_screenshots: bool,
    /// Validated selectors below this confidence fail the action
    pub min_selector_confidence: f64,
    /// Cap for loop nodes that omit `maxIterations`
    pub max_loop_iterations: u32,
    pub max_steps: u32,
    pub wait_poll_interval_ms: u64,
    pub wait_timeout_ms: u64,
    /// Policy for nodes that omit `onError`
    pub default_error_policy: ErrorPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: defaults::ACTION_TIMEOUT_MS,
            retry_count: defaults::RETRY_COUNT,
            retry_delay_ms: 0,
            dry_run: false,
            log_level: LogLevel::Info,
            capture_screenshots: false,
            min_selector_confidence: defaults::MIN_SELECTOR_CONFIDENCE,
            max_loop_iterations: defaults::MAX_LOOP_ITERATIONS,
            max_steps: defaults::MAX_STEPS,
            wait_poll_interval_ms: defaults::WAIT_POLL_INTERVAL_MS,
            wait_timeout_ms: defaults::WAIT_TIMEOUT_MS,
            default_error_policy: ErrorPolicy::Stop,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file
    ///
    /// A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await? {
            log::debug!("No engine config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await?;
        let config = serde_json::from_str(&contents)?;
        log::info!("Engine configuration loaded from {:?}", path);
        Ok(config)
    }

    /// Save configuration as pretty-printed JSON, creating parent directories
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).await?;

        log::info!("Engine configuration saved to {:?}", path);
        Ok(())
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms.max(1))
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"dryRun": true, "logLevel": "debug"}"#).unwrap();
        assert!(config.dry_run);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.action_timeout_ms, 30_000);
        assert_eq!(config.max_steps, 1000);
        assert_eq!(config.default_error_policy, ErrorPolicy::Stop);
        assert_eq!(config.retry_count, 3);
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path().join("engine.json")).await.unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.json");

        let config = EngineConfig {
            retry_delay_ms: 250,
            capture_screenshots: true,
            default_error_policy: ErrorPolicy::retry(2),
            ..Default::default()
        };
        config.save(&path).await.unwrap();

        let loaded = EngineConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(EngineConfig::load(&path).await.is_err());
    }
}
