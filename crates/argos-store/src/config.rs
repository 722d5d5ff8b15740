use std::path::{Path, PathBuf};

use argos_core::AppError;

/// Filesystem layout for everything Argos persists.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub sites_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            sites_dir: PathBuf::from("./sites"),
        }
    }
}

impl StoreConfig {
    /// Read configuration from environment variables.
    ///
    /// - `ARGOS_DATA_DIR` (optional, defaults to `./data`)
    /// - `ARGOS_SITES_DIR` (optional, defaults to `./sites`)
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        Ok(Self {
            data_dir: dir_from_env("ARGOS_DATA_DIR", defaults.data_dir)?,
            sites_dir: dir_from_env("ARGOS_SITES_DIR", defaults.sites_dir)?,
        })
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_sites_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sites_dir = dir.into();
        self
    }

    pub fn registrations_path(&self) -> PathBuf {
        self.data_dir.join("registrations.json")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join("results")
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.data_dir.join("screenshots")
    }

    pub fn sites_dir(&self) -> &Path {
        &self.sites_dir
    }
}

fn dir_from_env(var: &str, default: PathBuf) -> Result<PathBuf, AppError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) if raw.trim().is_empty() => Err(AppError::ConfigError(format!(
            "{var} is set but empty"
        ))),
        Ok(raw) => Ok(PathBuf::from(raw.trim())),
    }
}
