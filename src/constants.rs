// SPDX-License-Identifier: GPL-3.0-only

//! Sensor and pipeline constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Depth sensing range mode
///
/// Passed through unchanged to the sensor. Near mode trades far range for
/// closer minimum distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DepthRange {
    /// Standard range (0.8m - 4.0m)
    #[default]
    Default,
    /// Near range (0.4m - 3.0m)
    Near,
}

impl DepthRange {
    /// All range variants for iteration
    pub const ALL: [DepthRange; 2] = [DepthRange::Default, DepthRange::Near];

    /// Get display name for the range
    pub fn display_name(&self) -> &'static str {
        match self {
            DepthRange::Default => "Default",
            DepthRange::Near => "Near",
        }
    }

    /// Valid depth limits (min, max) in millimeters
    pub fn limits_mm(&self) -> (u16, u16) {
        match self {
            DepthRange::Default => (800, 4000),
            DepthRange::Near => (400, 3000),
        }
    }

    /// Check whether a raw depth sample lies inside this range
    pub fn contains_mm(&self, depth_mm: u16) -> bool {
        let (min, max) = self.limits_mm();
        depth_mm >= min && depth_mm <= max
    }
}

/// Depth camera intrinsics at the 640x480 reference resolution
pub mod intrinsics {
    /// Focal length X (pixels)
    pub const FX: f32 = 594.21;
    /// Focal length Y (pixels)
    pub const FY: f32 = 591.04;
    /// Principal point X (pixels)
    pub const CX: f32 = 339.5;
    /// Principal point Y (pixels)
    pub const CY: f32 = 242.7;

    /// Reference width for intrinsics scaling
    pub const BASE_WIDTH: f32 = 640.0;
    /// Reference height for intrinsics scaling
    pub const BASE_HEIGHT: f32 = 480.0;

    /// Horizontal offset between the depth and color optical centers (meters)
    pub const COLOR_BASELINE_M: f32 = 0.025;
}

/// Depth sample constants
pub mod depth {
    /// Millimeters per meter, used for all raw-to-metric conversions
    pub const MM_PER_METER: f32 = 1000.0;

    /// Invalid depth marker
    pub const DEPTH_INVALID_MM: u16 = 0;

    /// Sensor depth range limits in meters (used for sanity checks)
    pub const SENSOR_MIN_M: f32 = 0.4;
    pub const SENSOR_MAX_M: f32 = 4.0;

    /// Homogeneous fill value marking a written world sample
    pub const WORLD_W: f32 = 1.0;
}

/// Stream geometry
pub mod stream {
    /// Default color and depth resolution
    pub const DEFAULT_WIDTH: u32 = 640;
    pub const DEFAULT_HEIGHT: u32 = 480;

    /// Nominal frame rate of both streams
    pub const FRAMES_PER_SECOND: u32 = 30;

    /// Maximum number of tracked bodies per skeleton frame
    pub const SKELETON_COUNT: usize = 6;

    /// Nominal fields of view in degrees (horizontal, vertical)
    pub const COLOR_FOV_DEGREES: (f32, f32) = (62.0, 48.6);
    pub const DEPTH_FOV_DEGREES: (f32, f32) = (58.5, 45.6);
}

/// Elevation motor limits
pub mod elevation {
    /// Tilt angle limits (in degrees)
    pub const MIN_DEGREES: i32 = -27;
    pub const MAX_DEGREES: i32 = 27;
}

/// Timing constants for the pipeline stages
pub mod timing {
    use super::Duration;

    /// Bounded wait for a world buffer read lock when publishing
    pub const PUBLISH_TIMEOUT: Duration = Duration::from_millis(100);

    /// How long the world worker waits for a new depth frame before
    /// re-checking its stop signal
    pub const WORLD_IDLE_WAIT: Duration = Duration::from_millis(50);

    /// How long the capture loop waits on the sensor channel per iteration
    pub const CAPTURE_RECV_TIMEOUT: Duration = Duration::from_millis(50);

    /// Capacity of the sensor-to-capture channel
    pub const CAPTURE_CHANNEL_CAPACITY: usize = 8;

    /// Frame period of the synthetic sensor
    pub const SYNTHETIC_FRAME_PERIOD: Duration = Duration::from_millis(33);

    /// Log capture statistics every N depth frames
    pub const FRAME_LOG_INTERVAL: u64 = 30;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_range_limits() {
        assert_eq!(DepthRange::Default.limits_mm(), (800, 4000));
        assert!(DepthRange::Near.contains_mm(500));
        assert!(!DepthRange::Default.contains_mm(500));
        assert!(!DepthRange::Near.contains_mm(3500));
    }
}
