//! Integration tests for cadence-config.
//!
//! File round trips and error paths against a temporary directory.

use cadence_config::{ConfigError, EngineConfig, PlayerKind};
use tempfile::TempDir;

#[test]
fn test_save_then_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("engine.toml");

    let mut config = EngineConfig::default();
    config.audio.sample_rate = 96000;
    config.audio.block_size = 128;
    config.threads.workers = Some(2);
    config.threads.pin_to_cores = true;
    config.player.kind = PlayerKind::Single;
    config.pool.bucket_capacity = 32;

    config.save(&path).expect("save should create parent directories");
    assert!(path.is_file());

    let loaded = EngineConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_missing_file_reports_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    let err = EngineConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFile { .. }));
    assert!(err.to_string().contains("absent.toml"), "got: {err}");
}

#[test]
fn test_load_rejects_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, "[audio\nsample_rate = ").unwrap();

    assert!(matches!(EngineConfig::load(&path), Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, "[audio]\nblock_size = 100000\n").unwrap();

    assert!(matches!(
        EngineConfig::load(&path),
        Err(ConfigError::Invalid { key: "audio.block_size", .. })
    ));
}

#[test]
fn test_save_refuses_invalid_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");

    let mut config = EngineConfig::default();
    config.threads.queue_capacity = 1;

    assert!(config.save(&path).is_err());
    assert!(!path.exists());
}

#[test]
fn test_config_drives_a_thread_pool() {
    let config = EngineConfig::from_toml_str("[threads]\nworkers = 2\nqueue_capacity = 32\n").unwrap();
    let pool = cadence_graph::ThreadPool::new(config.thread_pool_config()).unwrap();
    assert_eq!(pool.num_workers(), 2);
    assert_eq!(pool.config().queue_capacity, 32);
}
