// SPDX-License-Identifier: GPL-3.0-only

//! Depth sensor abstraction
//!
//! The pipeline never talks to sensor hardware directly. It consumes two
//! capabilities:
//!
//! - [`FrameSource`]: lifecycle plus frame-ready events delivered over a
//!   channel (color, depth and skeleton frames)
//! - [`CoordinateMapper`]: the sensor's own per-pixel mapping functions,
//!   depth pixel to world point and depth pixel to color pixel
//!
//! Sensors are discovered through a [`SensorProvider`]. The built-in
//! [`synthetic`] provider renders a planar scene with a calibration board and
//! is what the CLI and the integration tests run against.

pub mod elevation;
pub mod frame_loop;
pub mod synthetic;
pub mod types;

pub use elevation::normalized_to_degrees;
pub use frame_loop::{LoopAction, LoopController};
pub use synthetic::{SyntheticMapper, SyntheticProvider, SyntheticScene, SyntheticSensor};
pub use types::*;

use crate::config::SkeletonConfig;
use crate::constants::{DepthRange, stream};
use crate::errors::SensorError;
use crossbeam::channel::Sender;
use std::sync::Arc;

/// Per-pixel coordinate mapping provided by the sensor
///
/// Implementations must be callable concurrently from many worker threads.
pub trait CoordinateMapper: Send + Sync {
    /// Unproject one depth pixel into the sensor's world frame.
    ///
    /// `depth_mm` is the raw sample. A sample of 0 (no reading) maps to the
    /// origin.
    fn depth_to_world(
        &self,
        format: DepthImageFormat,
        x: u32,
        y: u32,
        depth_mm: u16,
    ) -> Result<WorldPoint, SensorError>;

    /// Map one depth pixel to the color pixel observing the same surface.
    ///
    /// The returned coordinate may lie outside the color image. `None` means
    /// the sample carries no depth and cannot be registered.
    fn depth_to_color(
        &self,
        depth_format: DepthImageFormat,
        x: u32,
        y: u32,
        depth_mm: u16,
        color_format: ColorImageFormat,
    ) -> Option<ColorPoint>;
}

/// A streaming depth sensor
pub trait FrameSource: Send {
    /// Identity of the opened sensor
    fn info(&self) -> &SensorInfo;

    /// Enable the streams in `settings` and begin delivering events.
    ///
    /// Events are sent with `try_send`; a full channel drops the frame.
    fn start(
        &mut self,
        settings: &SensorSettings,
        events: Sender<SensorEvent>,
    ) -> Result<(), SensorError>;

    /// Stop streaming. Returns once no further events will be sent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Shared handle to the sensor's coordinate mapping
    fn mapper(&self) -> Arc<dyn CoordinateMapper>;

    /// Change the depth range mode while streaming
    fn set_depth_range(&mut self, range: DepthRange) -> Result<(), SensorError>;

    /// Change skeleton tracking and smoothing while streaming
    fn set_skeleton_config(&mut self, config: &SkeletonConfig) -> Result<(), SensorError>;

    /// Elevation motor range in degrees (min, max)
    fn elevation_limits(&self) -> (i32, i32) {
        (
            crate::constants::elevation::MIN_DEGREES,
            crate::constants::elevation::MAX_DEGREES,
        )
    }

    /// Tilt the sensor to an absolute angle
    fn set_elevation_degrees(&mut self, _degrees: i32) -> Result<(), SensorError> {
        Err(SensorError::Unsupported(
            "This sensor has no elevation motor".to_string(),
        ))
    }

    /// Nominal (color, depth) fields of view
    fn fields_of_view(&self) -> (FieldOfView, FieldOfView) {
        (
            FieldOfView {
                horizontal: stream::COLOR_FOV_DEGREES.0,
                vertical: stream::COLOR_FOV_DEGREES.1,
            },
            FieldOfView {
                horizontal: stream::DEPTH_FOV_DEGREES.0,
                vertical: stream::DEPTH_FOV_DEGREES.1,
            },
        )
    }
}

/// Sensor discovery
pub trait SensorProvider: Send + Sync {
    /// List attached sensors
    fn enumerate(&self) -> Vec<SensorInfo>;

    /// Open the sensor at `index`
    fn open(&self, index: usize) -> Result<Box<dyn FrameSource>, SensorError>;
}

/// Default stream settings built from the user configuration
pub fn settings_from_config(config: &crate::config::Config) -> SensorSettings {
    SensorSettings {
        color_format: ColorImageFormat::new(
            stream::DEFAULT_WIDTH,
            stream::DEFAULT_HEIGHT,
            ColorLayout::Bgra,
        ),
        depth_format: DepthImageFormat::new(stream::DEFAULT_WIDTH, stream::DEFAULT_HEIGHT),
        depth_range: config.depth_range,
        skeleton: config.skeleton,
    }
}
