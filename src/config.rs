// File: ./src/config.rs
// Handles configuration loading, saving, and defaults.
use crate::context::AppContext;
use crate::estimator::SeedPolicy;
use crate::storage::Storage;
use anyhow::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_interval() -> u64 {
    300
}
fn default_backoff_base() -> u64 {
    30
}
fn default_backoff_max() -> u64 {
    1800
}

fn default_alpha() -> f64 {
    0.3
}
fn default_minutes() -> f64 {
    30.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    CalDav,
    Local,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::CalDav => write!(f, "caldav"),
            Backend::Local => write!(f, "local"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_true")]
    pub persist_learning: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
            persist_learning: true,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct EstimatorConfig {
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_minutes")]
    pub default_minutes: f64,
    #[serde(default)]
    pub first_observation: SeedPolicy,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            default_minutes: default_minutes(),
            first_observation: SeedPolicy::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub allow_insecure_certs: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            url: String::new(),
            username: String::new(),
            password: String::new(),
            allow_insecure_certs: false,
            request_timeout_secs: default_request_timeout(),
            log_level: default_log_level(),
            scheduler: SchedulerConfig::default(),
            estimator: EstimatorConfig::default(),
        }
    }
}

impl Config {
    /// Load the configuration from disk using an explicit context.
    /// Returns a contextualized error if reading or parsing fails.
    pub fn load(ctx: &dyn AppContext) -> Result<Self> {
        let path = ctx.get_config_file_path()?;

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found"));
        }

        let contents = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;

        let config: Config = toml::from_str(&contents).map_err(|e| {
            anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
        })?;

        config.validate()?;
        Ok(config)
    }

    /// True when `err` (or anything in its chain) means the file was absent.
    pub fn is_missing_config_error(err: &Error) -> bool {
        if err.to_string().contains("Config file not found") {
            return true;
        }
        err.chain().any(|cause| {
            cause
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend == Backend::CalDav && self.url.trim().is_empty() {
            anyhow::bail!("'url' is required for the caldav backend");
        }
        if !(self.estimator.alpha > 0.0 && self.estimator.alpha <= 1.0) {
            anyhow::bail!(
                "estimator.alpha must be in (0, 1], got {}",
                self.estimator.alpha
            );
        }
        if self.estimator.default_minutes.is_nan() || self.estimator.default_minutes < 0.0 {
            anyhow::bail!("estimator.default_minutes must be non-negative");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be positive");
        }
        let s = &self.scheduler;
        if s.interval_secs == 0 || s.backoff_base_secs == 0 {
            anyhow::bail!("scheduler intervals must be positive");
        }
        if s.backoff_max_secs < s.backoff_base_secs {
            anyhow::bail!("scheduler.backoff_max_secs must be >= backoff_base_secs");
        }
        Ok(())
    }

    /// Save configuration using an explicit context.
    pub fn save(&self, ctx: &dyn AppContext) -> Result<()> {
        let path = ctx.get_config_file_path()?;
        Storage::with_lock(&path, || {
            let toml_str = toml::to_string_pretty(self)?;
            Storage::atomic_write(&path, toml_str)?;
            Ok(())
        })
    }

    pub fn get_path_string(ctx: &dyn AppContext) -> Result<String> {
        let path = ctx.get_config_file_path()?;
        Ok(path.to_string_lossy().to_string())
    }
}
