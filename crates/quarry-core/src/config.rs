use std::env;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::executor::ExecutorConfig;

pub const DEFAULT_DATABASE: &str = "telemetry";
pub const DEFAULT_RESULT_LOCATION: &str = "s3://quarry-results/query-results/";
pub const DEFAULT_RETENTION_CAP: usize = 20;

/// Engine settings shared by the session and the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct QuarryConfig {
    /// Root for artifacts, the schema store and saved templates.
    pub home: PathBuf,
    pub database: String,
    pub result_location: String,
    /// Maximum number of retained output artifacts.
    pub retention_cap: usize,
    pub executor: ExecutorConfig,
}

impl Default for QuarryConfig {
    fn default() -> Self {
        Self {
            home: resolve_quarry_home(),
            database: String::from(DEFAULT_DATABASE),
            result_location: String::from(DEFAULT_RESULT_LOCATION),
            retention_cap: DEFAULT_RETENTION_CAP,
            executor: ExecutorConfig::default(),
        }
    }
}

impl QuarryConfig {
    /// Defaults overridden by `QUARRY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides read through `lookup`. Empty values are ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(database) = read("QUARRY_DATABASE") {
            self.database = database;
        }
        if let Some(location) = read("QUARRY_RESULT_LOCATION") {
            self.result_location = location;
        }
        if let Some(workgroup) = read("QUARRY_WORKGROUP") {
            self.executor.workgroup = workgroup;
        }
        if let Some(cap) = read("QUARRY_RETENTION") {
            self.retention_cap = cap.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("QUARRY_RETENTION must be a count, got '{cap}'"))
            })?;
        }
        Ok(self)
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.home.join("outputs")
    }

    pub fn schema_path(&self) -> PathBuf {
        self.home.join("schemas.json")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.home.join("queries")
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Reject settings that cannot drive the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_string()));

        if self.database.trim().is_empty() {
            return invalid("database must not be empty");
        }
        if self.result_location.trim().is_empty() {
            return invalid("result location must not be empty");
        }
        if self.retention_cap == 0 {
            return invalid("retention cap must be greater than zero");
        }
        if self.executor.poll_interval.is_zero() {
            return invalid("poll interval must be greater than zero");
        }
        if self.executor.poll_deadline.is_zero() {
            return invalid("poll deadline must be greater than zero");
        }
        if self.executor.polls_per_second == 0 {
            return invalid("poll rate must be greater than zero");
        }
        if self.executor.page_size == 0 {
            return invalid("page size must be greater than zero");
        }
        Ok(())
    }
}

fn resolve_quarry_home() -> PathBuf {
    if let Some(path) = env::var_os("QUARRY_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".quarry");
    }

    PathBuf::from(".quarry")
}
