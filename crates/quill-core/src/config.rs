//! Configuration types and loading for quill.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::Result;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the durable SQLite database.
    pub database: PathBuf,

    /// When to stop calling the durable backend after failures.
    pub fallback: FallbackConfig,

    /// Chunk sizing, in words.
    pub chunking: ChunkerConfig,

    /// Startup seeding.
    pub bootstrap: BootstrapConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME);

        Self {
            database: data_dir.join("quill.db"),
            fallback: FallbackConfig::default(),
            chunking: ChunkerConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.expand_paths();
        config.chunking.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME)
            .join("config.toml")
    }

    /// Save configuration to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ensure config exists at the given path, creating defaults if missing.
    pub fn ensure_at(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            let mut config = Self::default();
            config.expand_paths();
            config.save_to_path(path)?;
            Ok(config)
        }
    }

    /// Expand a path, replacing ~ and environment variables.
    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::full(path)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(expanded)
    }

    fn expand_paths(&mut self) {
        self.database = Self::expand_path(&self.database.to_string_lossy());
    }
}

/// Degraded-mode policy for the resilient store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Consecutive durable failures before the durable backend is skipped.
    /// Zero keeps calling it on every operation.
    pub failure_threshold: u32,

    /// While degraded, every Nth call probes the durable backend.
    pub probe_interval: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            probe_interval: 10,
        }
    }
}

/// Chunk size parameters, all in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub target_chunk_size: usize,
    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_chunk_size: 800,
            max_chunk_size: 1200,
            min_chunk_size: 400,
        }
    }
}

impl ChunkerConfig {
    /// Require `0 < min <= target <= max`.
    pub fn validate(&self) -> Result<()> {
        if self.min_chunk_size == 0
            || self.min_chunk_size > self.target_chunk_size
            || self.target_chunk_size > self.max_chunk_size
        {
            return Err(Error::Config(format!(
                "chunk sizes must satisfy 0 < min ({}) <= target ({}) <= max ({})",
                self.min_chunk_size, self.target_chunk_size, self.max_chunk_size
            )));
        }
        Ok(())
    }
}

/// Startup seeding performed once by the service, never by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Guarantee a user with `username` exists after bootstrap.
    pub seed_user: bool,
    pub username: String,
    pub password: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            seed_user: true,
            username: "demo".to_string(),
            password: "demo".to_string(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
