//! Configuration for the workflow engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Checkpoint storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Retention of finished executions
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum simultaneously running steps within one execution
    #[serde(default = "default_per_execution")]
    pub max_concurrent_steps_per_execution: usize,

    /// Maximum simultaneously running steps across the engine
    #[serde(default = "default_engine_wide")]
    pub max_concurrent_steps: usize,

    /// Per-attempt timeout for steps that declare none (milliseconds, 0 disables)
    #[serde(default = "default_step_timeout")]
    pub default_step_timeout_ms: u64,

    /// Execution budget for definitions that declare none (seconds, 0 disables)
    #[serde(default)]
    pub default_execution_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps_per_execution: default_per_execution(),
            max_concurrent_steps: default_engine_wide(),
            default_step_timeout_ms: default_step_timeout(),
            default_execution_timeout_secs: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn default_step_timeout(&self) -> Option<Duration> {
        (self.default_step_timeout_ms > 0).then(|| Duration::from_millis(self.default_step_timeout_ms))
    }

    pub fn default_execution_timeout(&self) -> Option<Duration> {
        (self.default_execution_timeout_secs > 0)
            .then(|| Duration::from_secs(self.default_execution_timeout_secs))
    }
}

/// Checkpoint storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    #[default]
    Memory,

    /// One JSON file per checkpoint under `path`
    File { path: PathBuf },
}

/// Retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// How long finished executions stay queryable (seconds)
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Checkpoints kept per execution once it is terminal
    #[serde(default = "default_keep")]
    pub checkpoint_keep: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention(),
            checkpoint_keep: default_keep(),
        }
    }
}

impl RetentionConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_per_execution() -> usize {
    16
}

fn default_engine_wide() -> usize {
    256
}

fn default_step_timeout() -> u64 {
    300_000
}

fn default_retention() -> u64 {
    24 * 60 * 60
}

fn default_keep() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    /// Load configuration: defaults, then an optional file, then `WORKFLOW__*` variables
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&EngineConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Nested keys use a double underscore: WORKFLOW__SCHEDULER__MAX_CONCURRENT_STEPS
        builder = builder.add_source(
            config::Environment::with_prefix("WORKFLOW")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Configuration suited to tests: small limits, short timeouts
    pub fn testing() -> Self {
        Self {
            scheduler: SchedulerConfig {
                max_concurrent_steps_per_execution: 8,
                max_concurrent_steps: 32,
                default_step_timeout_ms: 5_000,
                default_execution_timeout_secs: 0,
            },
            ..Default::default()
        }
    }
}
