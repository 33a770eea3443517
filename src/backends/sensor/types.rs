// SPDX-License-Identifier: GPL-3.0-only
// Shared types for the sensor abstraction

//! Frame, format and skeleton types delivered by a sensor

use crate::config::SkeletonConfig;
use crate::constants::DepthRange;
use serde::{Deserialize, Serialize};

/// Byte order of a 4-byte color pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorLayout {
    /// R G B A
    #[default]
    Rgba,
    /// B G R A (X8R8G8B8 little-endian, what most depth sensors emit)
    Bgra,
}

/// Fixed color stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorImageFormat {
    pub width: u32,
    pub height: u32,
    pub layout: ColorLayout,
}

impl ColorImageFormat {
    /// Bytes per color pixel
    pub const BYTES_PER_PIXEL: usize = 4;

    pub fn new(width: u32, height: u32, layout: ColorLayout) -> Self {
        Self {
            width,
            height,
            layout,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Expected length of a frame buffer in bytes
    pub fn byte_len(&self) -> usize {
        self.pixel_count() * Self::BYTES_PER_PIXEL
    }

    /// Linear pixel index for an in-bounds coordinate
    pub fn index_of(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }
}

impl std::fmt::Display for ColorImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {:?}", self.width, self.height, self.layout)
    }
}

/// Fixed depth stream format (16-bit samples in millimeters)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepthImageFormat {
    pub width: u32,
    pub height: u32,
}

impl DepthImageFormat {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Split a linear depth index into (x, y)
    pub fn coords_of(&self, index: usize) -> Option<(u32, u32)> {
        if self.width == 0 || index >= self.pixel_count() {
            return None;
        }
        let width = self.width as usize;
        Some(((index % width) as u32, (index / width) as u32))
    }
}

impl std::fmt::Display for DepthImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} depth16", self.width, self.height)
    }
}

/// A point in the sensor's world reference frame (meters)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl WorldPoint {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// An integer pixel coordinate in color image space (may be out of bounds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorPoint {
    pub x: i32,
    pub y: i32,
}

impl ColorPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Color frame as delivered by the sensor
#[derive(Debug, Clone)]
pub struct ColorFrame {
    pub format: ColorImageFormat,
    pub data: Vec<u8>,
    pub frame_number: u32,
    /// Sensor timestamp in milliseconds
    pub timestamp_ms: i64,
}

/// Depth frame as delivered by the sensor
#[derive(Debug, Clone)]
pub struct DepthFrame {
    pub format: DepthImageFormat,
    pub data: Vec<u16>,
    pub frame_number: u32,
    pub timestamp_ms: i64,
}

/// Body tracking state of a skeleton slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackingState {
    #[default]
    NotTracked,
    PositionOnly,
    Tracked,
}

/// Tracking state of a single joint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JointTrackingState {
    #[default]
    NotTracked,
    Inferred,
    Tracked,
}

/// Skeleton joint identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JointType {
    HipCenter,
    Spine,
    ShoulderCenter,
    Head,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
    HipLeft,
    KneeLeft,
    AnkleLeft,
    FootLeft,
    HipRight,
    KneeRight,
    AnkleRight,
    FootRight,
}

impl JointType {
    pub const ALL: [JointType; 20] = [
        JointType::HipCenter,
        JointType::Spine,
        JointType::ShoulderCenter,
        JointType::Head,
        JointType::ShoulderLeft,
        JointType::ElbowLeft,
        JointType::WristLeft,
        JointType::HandLeft,
        JointType::ShoulderRight,
        JointType::ElbowRight,
        JointType::WristRight,
        JointType::HandRight,
        JointType::HipLeft,
        JointType::KneeLeft,
        JointType::AnkleLeft,
        JointType::FootLeft,
        JointType::HipRight,
        JointType::KneeRight,
        JointType::AnkleRight,
        JointType::FootRight,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub joint_type: JointType,
    pub position: WorldPoint,
    pub tracking_state: JointTrackingState,
}

/// One tracked-body record. Copied through the pipeline unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Skeleton {
    pub tracking_id: u32,
    pub tracking_state: TrackingState,
    pub position: WorldPoint,
    pub joints: Vec<Joint>,
}

#[derive(Debug, Clone)]
pub struct SkeletonFrame {
    pub skeletons: Vec<Skeleton>,
    pub frame_number: u32,
    pub timestamp_ms: i64,
}

/// A frame-ready notification from the sensor
#[derive(Debug, Clone)]
pub enum SensorEvent {
    Color(ColorFrame),
    Depth(DepthFrame),
    Skeleton(SkeletonFrame),
}

/// Stream settings applied when a sensor starts
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSettings {
    pub color_format: ColorImageFormat,
    pub depth_format: DepthImageFormat,
    pub depth_range: DepthRange,
    pub skeleton: SkeletonConfig,
}

/// Identity of a discoverable sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorInfo {
    pub index: usize,
    pub name: String,
    pub serial: String,
}

/// Nominal field of view in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldOfView {
    pub horizontal: f32,
    pub vertical: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_index_bounds() {
        let format = ColorImageFormat::new(640, 480, ColorLayout::Bgra);
        assert_eq!(format.index_of(0, 0), Some(0));
        assert_eq!(format.index_of(639, 479), Some(640 * 480 - 1));
        assert_eq!(format.index_of(640, 0), None);
        assert_eq!(format.index_of(-1, 3), None);
        assert_eq!(format.byte_len(), 640 * 480 * 4);
    }

    #[test]
    fn test_depth_coords() {
        let format = DepthImageFormat::new(320, 240);
        assert_eq!(format.coords_of(321), Some((1, 1)));
        assert_eq!(format.coords_of(320 * 240), None);
    }
}
