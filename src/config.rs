//! Deployment Configuration
//!
//! Stored in `~/.config/foundry-deploy/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. CLI flags
//! 2. Environment variables (`FOUNDRY_ENVIRONMENT`, `SK_AGENT_REQUEST_QUEUE_NAME`, ...)
//! 3. Config file
//! 4. The plan's own `params`
//! 5. Defaults
//!
//! ```toml
//! [defaults]
//! environment = "prod"
//! region = "swedencentral"
//! state_file = ".foundry/state.json"
//!
//! [retry]
//! max_attempts = 4
//!
//! [queue]
//! request_queue = "sk-agent-request-queue"
//! response_timeout_secs = 30
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ast::{EnvironmentType, GlobalParams, Region};
use crate::error::{DeployError, Result};
use crate::queue::{RequesterConfig, WorkerConfig};
use crate::resilience::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub queue: QueueSettings,
}

/// Default deployment settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Defaults {
    pub environment: Option<EnvironmentType>,
    pub region: Option<Region>,
    /// State file for idempotent re-runs
    pub state_file: Option<PathBuf>,
}

/// Backoff for transport failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 200,
            max_delay_ms: 5000,
            jitter: 0.1,
        }
    }
}

/// Request/response queue settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueSettings {
    pub request_queue: String,
    pub response_queue: String,
    pub poison_queue: Option<String>,
    pub poll_interval_ms: u64,
    pub request_visibility_secs: u64,
    pub response_visibility_secs: u64,
    pub response_timeout_secs: u64,
    pub orphan_grace_secs: u64,
    pub batch_size: usize,
    pub max_dequeue_count: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            request_queue: "sk-agent-request-queue".to_string(),
            response_queue: "sk-agent-response-queue".to_string(),
            poison_queue: None,
            poll_interval_ms: 500,
            request_visibility_secs: 30,
            response_visibility_secs: 5,
            response_timeout_secs: 30,
            orphan_grace_secs: 60,
            batch_size: 32,
            max_dequeue_count: 5,
        }
    }
}

impl DeployConfig {
    /// Returns `~/.config/foundry-deploy/` on Unix, `%APPDATA%/foundry-deploy/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("foundry-deploy")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load from the default location
    ///
    /// Returns default config if file doesn't exist.
    /// Returns error if file exists but is malformed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| DeployError::Config {
            reason: format!("Failed to read config file: {}", e),
        })?;

        toml::from_str(&content).map_err(|e| DeployError::Config {
            reason: format!("Failed to parse config file: {}", e),
        })
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    pub fn with_env(mut self) -> Result<Self> {
        if let Some(value) = non_empty_env("FOUNDRY_ENVIRONMENT") {
            self.defaults.environment = Some(value.parse().map_err(config_error)?);
        }
        if let Some(value) = non_empty_env("FOUNDRY_REGION") {
            self.defaults.region = Some(value.parse().map_err(config_error)?);
        }
        if let Some(value) = non_empty_env("FOUNDRY_STATE_FILE") {
            self.defaults.state_file = Some(PathBuf::from(value));
        }
        if let Some(value) = non_empty_env("SK_AGENT_REQUEST_QUEUE_NAME") {
            self.queue.request_queue = value;
        }
        if let Some(value) = non_empty_env("SK_AGENT_RESPONSE_QUEUE_NAME") {
            self.queue.response_queue = value;
        }
        Ok(self)
    }

    /// Effective global params: CLI flags, then config, then the plan's own
    pub fn resolve_params(
        &self,
        plan_params: GlobalParams,
        environment: Option<EnvironmentType>,
        region: Option<Region>,
    ) -> GlobalParams {
        GlobalParams {
            environment: environment
                .or(self.defaults.environment)
                .unwrap_or(plan_params.environment),
            region: region.or(self.defaults.region).unwrap_or(plan_params.region),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::default()
            .with_max_attempts(self.retry.max_attempts)
            .with_initial_delay(Duration::from_millis(self.retry.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
            .with_jitter(self.retry.jitter)
    }

    pub fn requester_config(&self) -> RequesterConfig {
        RequesterConfig {
            poll_interval: Duration::from_millis(self.queue.poll_interval_ms),
            response_visibility: Duration::from_secs(self.queue.response_visibility_secs),
            batch_size: self.queue.batch_size,
            orphan_grace: Duration::from_secs(self.queue.orphan_grace_secs),
            retry: self.retry_config(),
            ..RequesterConfig::default()
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            batch_size: self.queue.batch_size,
            visibility: Duration::from_secs(self.queue.request_visibility_secs),
            poll_interval: Duration::from_millis(self.queue.poll_interval_ms),
            max_dequeue_count: self.queue.max_dequeue_count,
            retry: self.retry_config(),
        }
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.response_timeout_secs)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn config_error(err: DeployError) -> DeployError {
    DeployError::Config {
        reason: err.to_string(),
    }
}
