// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use fullhouse::Config;
use fullhouse::config::{CalibrationBoard, WorldSource};
use fullhouse::constants::DepthRange;

#[test]
fn test_config_default() {
    let config = Config::default();

    // Check sensible defaults
    assert_eq!(config.board, CalibrationBoard::new(10, 7));
    assert_eq!(config.publish_timeout_ms, 100);
    assert_eq!(
        config.calibration_world_source,
        WorldSource::Unproject,
        "Corners should unproject the raw depth sample by default"
    );
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_save_and_load() {
    let path = std::env::temp_dir()
        .join(format!("fullhouse-config-{}", std::process::id()))
        .join("config.json");

    let config = Config {
        board: CalibrationBoard::new(8, 5),
        depth_range: DepthRange::Near,
        elevation: 0.25,
        calibration_world_source: WorldSource::PublishedBuffer,
        ..Config::default()
    };
    config.save(&path).expect("config should save");

    let loaded = Config::load(&path).expect("config should load");
    assert_eq!(loaded, config);

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[test]
fn test_config_rejects_out_of_range_elevation() {
    let config = Config {
        elevation: 1.5,
        ..Config::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_config_load_missing_file_fails() {
    let path = std::env::temp_dir().join("fullhouse-does-not-exist/config.json");
    assert!(Config::load(&path).is_err());
}
