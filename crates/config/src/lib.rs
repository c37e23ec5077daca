//! Configuration management for the experiment engine

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// HTTP service configuration
    pub service: ServiceConfig,

    /// Statistical evaluation settings
    pub statistics: StatisticsConfig,

    /// Assignment store backend
    pub storage: StorageConfig,

    /// Periodic re-evaluation job
    pub evaluation: EvaluationConfig,

    /// Observability settings
    pub observability: ObservabilityConfig,
}

impl EngineConfig {
    /// Load configuration from defaults, an optional YAML file and the environment
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }

        // Override with environment variables (prefixed with ABTEST_)
        figment = figment.merge(Env::prefixed("ABTEST_").split("__"));

        let config: EngineConfig = figment
            .extract()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.service.port == 0 {
            return Err(ConfigError::ValidationError("Invalid service port".to_string()));
        }

        if self.service.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        self.statistics.validate()?;

        if let StorageConfig::Sled { path } = &self.storage {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Sled storage requires a path".to_string(),
                ));
            }
        }

        if self.evaluation.enabled && self.evaluation.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "Re-evaluation interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Service host
    pub host: String,

    /// Service port
    pub port: u16,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "abtest-engine".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

/// Statistical evaluation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Confidence level for intervals and significance (e.g. 0.95)
    pub confidence_level: f64,

    /// Exposures required in each arm before significance may be claimed
    pub min_sample_size: u64,

    /// Statistical power used when estimating required sample size
    pub power: f64,

    /// Relative lift used to size experiments when none has been observed
    pub minimum_detectable_effect: f64,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            min_sample_size: 30,
            power: 0.8,
            minimum_detectable_effect: 0.1,
        }
    }
}

impl StatisticsConfig {
    /// Significance threshold derived from the confidence level
    pub fn alpha(&self) -> f64 {
        1.0 - self.confidence_level
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "Confidence level must be between 0 and 1, got {}",
                self.confidence_level
            )));
        }

        if !(self.power > 0.0 && self.power < 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "Power must be between 0 and 1, got {}",
                self.power
            )));
        }

        if !(self.minimum_detectable_effect > 0.0) {
            return Err(ConfigError::ValidationError(
                "Minimum detectable effect must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Assignment store backend
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "backend")]
pub enum StorageConfig {
    /// Process-local store, lost on restart
    #[default]
    Memory,
    /// Embedded sled database
    Sled { path: PathBuf },
}

/// Periodic re-evaluation of active experiments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 900, // 15 minutes
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,

    /// Enable structured JSON logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}
