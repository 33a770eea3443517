// SPDX-License-Identifier: GPL-3.0-only

//! Fullhouse - depth sensor frame pipeline
//!
//! Captures color, depth and skeleton frames from a depth sensor, turns
//! every depth frame into a world-space point buffer in the background, and
//! on request pairs the interior corners of a chessboard seen by the color
//! camera with their depth and world coordinates for camera/projector
//! calibration.
//!
//! # Architecture
//!
//! - [`backends`]: sensor capability traits and the synthetic sensor
//! - [`pipelines`]: frame store, registration, world transform,
//!   publication and calibration
//! - [`config`]: user configuration handling
//!
//! # Example
//!
//! ```ignore
//! let scene = SyntheticScene::default();
//! let provider = SyntheticProvider::new(scene.clone());
//! let detector = Arc::new(scene.detector(color_format));
//! let mut pipeline = Pipeline::new(Config::default(), detector);
//! pipeline.start(&provider)?;
//! let corners = pipeline.calibrate()?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod pipelines;

// Re-export commonly used types
pub use config::Config;
pub use constants::DepthRange;
pub use errors::{PipelineError, PipelineResult, PublishError, SensorError};
pub use pipelines::{Corner, Pipeline};
