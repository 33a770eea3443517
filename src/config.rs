// SPDX-License-Identifier: GPL-3.0-only

//! User configuration
//!
//! Stored as JSON under the platform config directory. Values are passed
//! through unchanged to the sensor and the calibration stage.

use crate::constants::{DepthRange, timing};
use crate::errors::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Expected interior-corner grid of the calibration board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationBoard {
    pub columns: u32,
    pub rows: u32,
}

impl CalibrationBoard {
    pub fn new(columns: u32, rows: u32) -> Self {
        Self { columns, rows }
    }

    /// Number of interior corners a fully visible board yields
    pub fn corner_count(&self) -> usize {
        (self.columns * self.rows) as usize
    }
}

impl Default for CalibrationBoard {
    fn default() -> Self {
        Self {
            columns: 10,
            rows: 7,
        }
    }
}

/// Joint filtering parameters forwarded to the sensor's skeleton tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingParameters {
    pub smoothing: f32,
    pub correction: f32,
    pub prediction: f32,
    pub jitter_radius: f32,
    pub max_deviation_radius: f32,
}

impl Default for SmoothingParameters {
    fn default() -> Self {
        Self {
            smoothing: 0.5,
            correction: 0.5,
            prediction: 0.5,
            jitter_radius: 0.05,
            max_deviation_radius: 0.04,
        }
    }
}

/// Skeleton tracking settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkeletonConfig {
    pub enabled: bool,
    pub smoothing_enabled: bool,
    pub smoothing: SmoothingParameters,
}

impl Default for SkeletonConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smoothing_enabled: true,
            smoothing: SmoothingParameters::default(),
        }
    }
}

/// Where a calibration corner takes its world coordinate from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorldSource {
    /// Unproject the raw depth sample directly (latest depth frame)
    #[default]
    Unproject,
    /// Read the currently published world buffer
    PublishedBuffer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Index of the sensor to open
    pub sensor_index: usize,
    /// Open the sensor when the pipeline starts
    pub enabled: bool,
    /// Calibration board interior-corner grid
    pub board: CalibrationBoard,
    /// Build the depth-to-color registration table for every depth frame
    pub registration_enabled: bool,
    /// Skeleton tracking settings
    pub skeleton: SkeletonConfig,
    /// Depth range mode
    pub depth_range: DepthRange,
    /// Normalized elevation angle (0 = lowest, 1 = highest)
    pub elevation: f64,
    /// Bounded wait for the world buffer when publishing (milliseconds)
    pub publish_timeout_ms: u64,
    /// World worker idle wait between stop-signal checks (milliseconds)
    pub world_idle_wait_ms: u64,
    /// World coordinate source for calibration corners
    pub calibration_world_source: WorldSource,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sensor_index: 0,
            enabled: true,
            board: CalibrationBoard::default(),
            registration_enabled: true,
            skeleton: SkeletonConfig::default(),
            depth_range: DepthRange::default(),
            elevation: 0.5,
            publish_timeout_ms: timing::PUBLISH_TIMEOUT.as_millis() as u64,
            world_idle_wait_ms: timing::WORLD_IDLE_WAIT.as_millis() as u64,
            calibration_world_source: WorldSource::default(),
        }
    }
}

impl Config {
    /// Default config file location (`<config dir>/fullhouse/config.json`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fullhouse").join("config.json"))
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load from the default path, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Save configuration as pretty-printed JSON, creating parent directories
    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn world_idle_wait(&self) -> Duration {
        Duration::from_millis(self.world_idle_wait_ms.max(1))
    }

    /// Reject values no stage can work with
    pub fn validate(&self) -> PipelineResult<()> {
        if self.board.columns == 0 || self.board.rows == 0 {
            return Err(PipelineError::Config(format!(
                "Board size must be at least 1x1, got {}x{}",
                self.board.columns, self.board.rows
            )));
        }
        if !(0.0..=1.0).contains(&self.elevation) {
            return Err(PipelineError::Config(format!(
                "Elevation must be within 0..1, got {}",
                self.elevation
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{ "board": { "columns": 9, "rows": 6 } }"#)
            .expect("partial config should parse");
        assert_eq!(config.board, CalibrationBoard::new(9, 6));
        assert_eq!(config.publish_timeout_ms, 100);
        assert!(config.registration_enabled);
    }

    #[test]
    fn test_validate_rejects_empty_board() {
        let config = Config {
            board: CalibrationBoard::new(0, 7),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }
}
