//! Engine configuration file format.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use cadence_graph::player::{DEFAULT_BLOCK_SIZE, DEFAULT_SAMPLE_RATE};
use cadence_graph::pool::DEFAULT_BUCKET_CAPACITY;
use cadence_graph::{AudioBufferPool, ThreadPoolConfig, default_worker_count};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths::default_config_path;

/// Lowest accepted sample rate in Hz.
pub const MIN_SAMPLE_RATE: u32 = 8000;
/// Highest accepted sample rate in Hz.
pub const MAX_SAMPLE_RATE: u32 = 384_000;
/// Largest accepted block size in samples.
pub const MAX_BLOCK_SIZE: usize = 8192;
/// Smallest accepted ready-queue capacity.
pub const MIN_QUEUE_CAPACITY: usize = 16;

/// Which player renders the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerKind {
    /// Sequential player on the calling thread.
    Single,
    /// Dependency-driven player on a worker pool.
    #[default]
    Multi,
}

impl fmt::Display for PlayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerKind::Single => f.write_str("single"),
            PlayerKind::Multi => f.write_str("multi"),
        }
    }
}

impl FromStr for PlayerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(PlayerKind::Single),
            "multi" => Ok(PlayerKind::Multi),
            other => Err(format!("unknown player kind '{other}', expected single or multi")),
        }
    }
}

/// `[audio]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Maximum samples per rendered block.
    pub block_size: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE as u32,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// `[threads]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadSettings {
    /// Worker count; hardware concurrency minus one when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Request real-time scheduling for workers.
    pub real_time_priority: bool,
    /// Pin workers to cores.
    pub pin_to_cores: bool,
    /// Capacity of the ready queue.
    pub queue_capacity: usize,
}

impl Default for ThreadSettings {
    fn default() -> Self {
        let defaults = ThreadPoolConfig::default();
        Self {
            workers: None,
            real_time_priority: defaults.real_time_priority,
            pin_to_cores: defaults.pin_to_cores,
            queue_capacity: defaults.queue_capacity,
        }
    }
}

/// `[player]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    /// Player used for rendering.
    pub kind: PlayerKind,
}

/// `[pool]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Free buffers kept per size bucket.
    pub bucket_capacity: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
        }
    }
}

/// Engine configuration.
///
/// Every section and key is optional; missing values take their defaults.
///
/// # TOML Format
///
/// ```toml
/// [audio]
/// sample_rate = 48000
/// block_size = 512
///
/// [threads]
/// workers = 3
/// real_time_priority = false
/// pin_to_cores = false
/// queue_capacity = 1024
///
/// [player]
/// kind = "multi"
///
/// [pool]
/// bucket_capacity = 256
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Audio format.
    pub audio: AudioSettings,
    /// Worker pool.
    pub threads: ThreadSettings,
    /// Player selection.
    pub player: PlayerSettings,
    /// Buffer pool.
    pub pool: PoolSettings,
}

impl EngineConfig {
    /// Load and validate a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a pretty TOML string.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate, then save to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.validate()?;
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }

        let content = self.to_toml_string()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        tracing::info!(path = %path.display(), "saved engine config");
        Ok(())
    }

    /// Load the file at [`default_config_path`], or defaults if it does not exist.
    ///
    /// A file that exists but fails to parse or validate is an error.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.is_file() {
            Self::load(&path)
        } else {
            tracing::debug!(path = %path.display(), "no engine config, using defaults");
            Ok(Self::default())
        }
    }

    /// Check every setting against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rate = self.audio.sample_rate;
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
            return Err(ConfigError::invalid(
                "audio.sample_rate",
                format!("must be in {MIN_SAMPLE_RATE}..={MAX_SAMPLE_RATE}, got {rate}"),
            ));
        }
        let block = self.audio.block_size;
        if !(1..=MAX_BLOCK_SIZE).contains(&block) {
            return Err(ConfigError::invalid(
                "audio.block_size",
                format!("must be in 1..={MAX_BLOCK_SIZE}, got {block}"),
            ));
        }
        if self.threads.workers == Some(0) {
            return Err(ConfigError::invalid("threads.workers", "must be at least 1"));
        }
        if self.threads.queue_capacity < MIN_QUEUE_CAPACITY {
            return Err(ConfigError::invalid(
                "threads.queue_capacity",
                format!(
                    "must be at least {MIN_QUEUE_CAPACITY}, got {}",
                    self.threads.queue_capacity
                ),
            ));
        }
        if self.pool.bucket_capacity == 0 {
            return Err(ConfigError::invalid("pool.bucket_capacity", "must be at least 1"));
        }
        Ok(())
    }

    /// Sample rate as the graph crate expects it.
    pub fn sample_rate(&self) -> f64 {
        f64::from(self.audio.sample_rate)
    }

    /// Worker count after applying the hardware default.
    pub fn workers(&self) -> usize {
        self.threads.workers.unwrap_or_else(default_worker_count)
    }

    /// Settings for [`cadence_graph::ThreadPool::new`].
    pub fn thread_pool_config(&self) -> ThreadPoolConfig {
        ThreadPoolConfig {
            workers: self.workers(),
            real_time_priority: self.threads.real_time_priority,
            pin_to_cores: self.threads.pin_to_cores,
            queue_capacity: self.threads.queue_capacity,
        }
    }

    /// A buffer pool sized by the `[pool]` section.
    pub fn buffer_pool(&self) -> AudioBufferPool {
        AudioBufferPool::new(self.pool.bucket_capacity)
    }
}
