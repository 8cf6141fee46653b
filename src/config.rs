//! Harness configuration.
//!
//! Loaded from an explicit path, `.vizreg.yml`, or ~/.config/vizreg/vizreg.yml

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::storage::DEFAULT_CHANNEL_CAPACITY;

/// Storage and event settings for a harness.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Namespace prepended to every metadata key and channel.
    #[serde(rename = "key-prefix")]
    pub key_prefix: String,

    /// Root directory for baseline, current and diff images.
    #[serde(rename = "images-dir")]
    pub images_dir: PathBuf,

    /// JSONL journal for run and test metadata. In-memory when unset.
    pub journal: Option<PathBuf>,

    /// Events buffered per channel before slow subscribers start missing them.
    #[serde(rename = "event-buffer")]
    pub event_buffer: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vizreg");

        Self {
            key_prefix: "vizreg".to_string(),
            images_dir: data_dir.join("images"),
            journal: None,
            event_buffer: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl HarnessConfig {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .vizreg.yml in current directory
    /// 3. ~/.config/vizreg/vizreg.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(".vizreg.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from .vizreg.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load .vizreg.yml: {}", e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("vizreg").join("vizreg.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            eyre::bail!("key-prefix must not be empty");
        }
        if self.event_buffer == 0 {
            eyre::bail!("event-buffer must be > 0");
        }
        Ok(())
    }
}
