//! Dynamic worker pool configuration and its providers.
//!
//! The service re-reads its [`WorkersConfig`] on every control tick through a
//! [`ConfigProvider`], so operators can change the worker command or the
//! scaling bounds without restarting. A provider error never stops the
//! service; the last configuration that loaded cleanly stays in effect.

use std::path::PathBuf;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;

/// Worker command line.
pub const ENV_WORKER_COMMAND: &str = "WORKER_COMMAND";
/// Lower bound of the pool size.
pub const ENV_MIN_WORKERS: &str = "MIN_WORKERS_NUMBER";
/// Upper bound of the pool size.
pub const ENV_MAX_WORKERS: &str = "MAX_WORKERS_NUMBER";
/// Workers added per scale-up step.
pub const ENV_SCALE_UP: &str = "WORKERS_NUMBER_SCALE_UP";
/// Load percentage that triggers a scale-up.
pub const ENV_SCALE_UP_PERCENT: &str = "WORKERS_NUMBER_PERCENT_SCALE_UP";
/// Load percentage below which the pool shrinks.
pub const ENV_SCALE_DOWN_PERCENT: &str = "WORKERS_NUMBER_PERCENT_SCALE_DOWN";

/// Reloadable pool sizing and worker command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Command line started for each worker (whitespace split, no shell).
    pub command: String,
    /// Minimum number of live workers.
    pub min_workers: usize,
    /// Maximum number of live workers.
    pub max_workers: usize,
    /// Workers added when load reaches `scale_up_percent`.
    pub scale_up: usize,
    /// Busy percentage at which the pool grows.
    pub scale_up_percent: usize,
    /// Busy percentage under which idle workers are retired.
    pub scale_down_percent: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            min_workers: 1,
            max_workers: num_cpus::get(),
            scale_up: 1,
            scale_up_percent: 80,
            scale_down_percent: 20,
        }
    }
}

impl WorkersConfig {
    /// Config for `command` with default sizing.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Set the pool size bounds.
    #[must_use]
    pub const fn with_bounds(mut self, min_workers: usize, max_workers: usize) -> Self {
        self.min_workers = min_workers;
        self.max_workers = max_workers;
        self
    }

    /// Set the scale-up step.
    #[must_use]
    pub const fn with_scale_up(mut self, scale_up: usize) -> Self {
        self.scale_up = scale_up;
        self
    }

    /// Set the scale-up and scale-down load thresholds.
    #[must_use]
    pub const fn with_thresholds(mut self, scale_up_percent: usize, scale_down_percent: usize) -> Self {
        self.scale_up_percent = scale_up_percent;
        self.scale_down_percent = scale_down_percent;
        self
    }

    /// Validate sizing values.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] describing the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.trim().is_empty() {
            return Err(ConfigError::Invalid("command must not be empty".into()));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be greater than 0".into()));
        }
        if self.min_workers > self.max_workers {
            return Err(ConfigError::Invalid(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.scale_up == 0 {
            return Err(ConfigError::Invalid("scale_up must be greater than 0".into()));
        }
        if self.scale_up_percent == 0 || self.scale_up_percent > 100 {
            return Err(ConfigError::Invalid("scale_up_percent must be within 1..=100".into()));
        }
        if self.scale_down_percent > 100 {
            return Err(ConfigError::Invalid("scale_down_percent must be within 0..=100".into()));
        }
        Ok(())
    }

    /// Parse a JSON document and validate it.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed JSON, otherwise whatever
    /// [`WorkersConfig::validate`] reports.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Source of the current [`WorkersConfig`].
pub trait ConfigProvider: Send + Sync {
    /// Load the configuration as it is right now.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]; the caller keeps its previous configuration.
    fn load(&self) -> Result<WorkersConfig, ConfigError>;
}

/// Reads the process environment, refreshed from `.env` style files.
///
/// Files are re-read on every [`ConfigProvider::load`] and their values
/// override variables already set, so edits take effect on the next tick.
///
/// Values containing spaces must be quoted, as in
/// `WORKER_COMMAND="php artisan worker"`. An unquoted multi-word value makes
/// the whole file fail with [`ConfigError::Parse`].
#[derive(Debug, Clone, Default)]
pub struct EnvConfigProvider {
    files: Vec<PathBuf>,
}

impl EnvConfigProvider {
    /// Provider that only reads the current environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also reload `path` before every read. Files load in the order added,
    /// later files win.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    fn number(key: &'static str, default: usize) -> Result<usize, ConfigError> {
        match std::env::var(key) {
            Ok(raw) if raw.trim().is_empty() => Ok(default),
            Ok(raw) => usize::from_str(raw.trim()).map_err(|_| ConfigError::Env { key, value: raw }),
            Err(std::env::VarError::NotPresent) => Ok(default),
            Err(std::env::VarError::NotUnicode(raw)) => Err(ConfigError::Env {
                key,
                value: raw.to_string_lossy().into_owned(),
            }),
        }
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn load(&self) -> Result<WorkersConfig, ConfigError> {
        for file in &self.files {
            dotenvy::from_path_override(file)
                .map_err(|e| ConfigError::Parse(format!("{}: {e}", file.display())))?;
        }

        let defaults = WorkersConfig::default();
        let cfg = WorkersConfig {
            command: std::env::var(ENV_WORKER_COMMAND).unwrap_or_default(),
            min_workers: Self::number(ENV_MIN_WORKERS, defaults.min_workers)?,
            max_workers: Self::number(ENV_MAX_WORKERS, defaults.max_workers)?,
            scale_up: Self::number(ENV_SCALE_UP, defaults.scale_up)?,
            scale_up_percent: Self::number(ENV_SCALE_UP_PERCENT, defaults.scale_up_percent)?,
            scale_down_percent: Self::number(ENV_SCALE_DOWN_PERCENT, defaults.scale_down_percent)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// In-process configuration that can be swapped at runtime.
#[derive(Debug)]
pub struct SharedConfig {
    inner: RwLock<WorkersConfig>,
}

impl SharedConfig {
    /// Wrap an initial configuration.
    #[must_use]
    pub fn new(config: WorkersConfig) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    /// Replace the configuration seen by the next load.
    pub fn set(&self, config: WorkersConfig) {
        *self.inner.write() = config;
    }

    /// Modify the configuration in place.
    pub fn update(&self, f: impl FnOnce(&mut WorkersConfig)) {
        f(&mut self.inner.write());
    }

    /// Current configuration.
    #[must_use]
    pub fn get(&self) -> WorkersConfig {
        self.inner.read().clone()
    }
}

impl ConfigProvider for SharedConfig {
    fn load(&self) -> Result<WorkersConfig, ConfigError> {
        let cfg = self.get();
        cfg.validate()?;
        Ok(cfg)
    }
}

impl<T: ConfigProvider + ?Sized> ConfigProvider for std::sync::Arc<T> {
    fn load(&self) -> Result<WorkersConfig, ConfigError> {
        (**self).load()
    }
}
