//! Engine configuration for the cadence graph engine.
//!
//! Loads, validates and saves the TOML file that selects the audio format,
//! the worker pool and the player, and converts it into the graph crate's
//! settings types.
//!
//! # Example
//!
//! ```rust
//! use cadence_config::{EngineConfig, PlayerKind};
//!
//! let config = EngineConfig::from_toml_str(
//!     r#"
//!     [audio]
//!     block_size = 256
//!
//!     [threads]
//!     workers = 2
//!
//!     [player]
//!     kind = "single"
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.audio.block_size, 256);
//! assert_eq!(config.player.kind, PlayerKind::Single);
//! assert_eq!(config.thread_pool_config().workers, 2);
//! ```

mod engine;
mod error;

/// Platform-specific configuration paths.
pub mod paths;

pub use engine::{
    AudioSettings, EngineConfig, MAX_BLOCK_SIZE, MAX_SAMPLE_RATE, MIN_QUEUE_CAPACITY,
    MIN_SAMPLE_RATE, PlayerKind, PlayerSettings, PoolSettings, ThreadSettings,
};
pub use error::ConfigError;
pub use paths::{default_config_path, ensure_user_config_dir, user_config_dir};
