// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic depth sensor
//!
//! Renders a flat wall facing the sensor with a chessboard calibration
//! target printed on it. The color camera sits a fixed baseline to the side
//! of the depth camera, so registration is a pure horizontal shift that
//! depends on depth, which is enough to exercise the whole pipeline without
//! hardware.

use super::frame_loop::{LoopAction, LoopController};
use super::types::*;
use super::{CoordinateMapper, FrameSource, SensorProvider};
use crate::config::{CalibrationBoard, SkeletonConfig};
use crate::constants::{DepthRange, depth, intrinsics, stream, timing};
use crate::errors::SensorError;
use crate::pipelines::calibration::ProjectedBoardDetector;
use crossbeam::channel::{Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

const WALL_LUMA: u8 = 128;
const MARGIN_LUMA: u8 = 240;
const DARK_LUMA: u8 = 30;
const LIGHT_LUMA: u8 = 225;

/// Pinhole parameters scaled to a stream resolution
#[derive(Debug, Clone, Copy)]
struct Pinhole {
    fx: f32,
    fy: f32,
    cx: f32,
    cy: f32,
}

impl Pinhole {
    fn for_size(width: u32, height: u32) -> Self {
        let sx = width as f32 / intrinsics::BASE_WIDTH;
        let sy = height as f32 / intrinsics::BASE_HEIGHT;
        Self {
            fx: intrinsics::FX * sx,
            fy: intrinsics::FY * sy,
            cx: intrinsics::CX * sx,
            cy: intrinsics::CY * sy,
        }
    }

    /// Camera-frame point (y down) to pixel coordinate
    fn project(&self, x: f32, y: f32, z: f32) -> (f32, f32) {
        (self.fx * x / z + self.cx, self.fy * y / z + self.cy)
    }

    /// Pixel coordinate at depth `z` to camera-frame point (y down)
    fn unproject(&self, u: f32, v: f32, z: f32) -> (f32, f32) {
        ((u - self.cx) * z / self.fx, (v - self.cy) * z / self.fy)
    }
}

/// Coordinate mapping of the synthetic rig
#[derive(Debug, Clone, Copy)]
pub struct SyntheticMapper {
    /// Color camera offset along +X from the depth camera (meters)
    pub baseline_m: f32,
}

impl Default for SyntheticMapper {
    fn default() -> Self {
        Self {
            baseline_m: intrinsics::COLOR_BASELINE_M,
        }
    }
}

impl CoordinateMapper for SyntheticMapper {
    fn depth_to_world(
        &self,
        format: DepthImageFormat,
        x: u32,
        y: u32,
        depth_mm: u16,
    ) -> Result<WorldPoint, SensorError> {
        if x >= format.width || y >= format.height {
            return Err(SensorError::MappingFailed(format!(
                "pixel ({}, {}) outside {}",
                x, y, format
            )));
        }
        if depth_mm == depth::DEPTH_INVALID_MM {
            return Ok(WorldPoint::default());
        }

        let z = depth_mm as f32 / depth::MM_PER_METER;
        let (cam_x, cam_y) = Pinhole::for_size(format.width, format.height).unproject(
            x as f32,
            y as f32,
            z,
        );
        // World frame is Y-up
        Ok(WorldPoint::new(cam_x, -cam_y, z))
    }

    fn depth_to_color(
        &self,
        depth_format: DepthImageFormat,
        x: u32,
        y: u32,
        depth_mm: u16,
        color_format: ColorImageFormat,
    ) -> Option<ColorPoint> {
        if depth_mm == depth::DEPTH_INVALID_MM {
            return None;
        }
        let z = depth_mm as f32 / depth::MM_PER_METER;
        let (cam_x, cam_y) = Pinhole::for_size(depth_format.width, depth_format.height)
            .unproject(x as f32, y as f32, z);
        let (u, v) = Pinhole::for_size(color_format.width, color_format.height).project(
            cam_x - self.baseline_m,
            cam_y,
            z,
        );
        Some(ColorPoint::new(u.round() as i32, v.round() as i32))
    }
}

/// Scene rendered by the synthetic sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticScene {
    /// Distance from the sensor to the wall (millimeters)
    pub plane_depth_mm: u16,
    /// Interior-corner grid of the printed board
    pub board: CalibrationBoard,
    /// Edge length of one board square (meters)
    pub square_size_m: f32,
    /// When false the board is hidden, as if something blocks the view
    pub board_visible: bool,
    /// Number of tracked bodies standing in front of the wall
    pub tracked_bodies: usize,
}

impl Default for SyntheticScene {
    fn default() -> Self {
        Self {
            plane_depth_mm: 1500,
            board: CalibrationBoard::default(),
            square_size_m: 0.04,
            board_visible: true,
            tracked_bodies: 1,
        }
    }
}

impl SyntheticScene {
    fn plane_z(&self) -> f32 {
        self.plane_depth_mm as f32 / depth::MM_PER_METER
    }

    /// Top-left corner of the board's outer squares in color camera space
    fn board_origin(&self) -> (f32, f32) {
        let s = self.square_size_m;
        (
            -((self.board.columns + 1) as f32) * s / 2.0,
            -((self.board.rows + 1) as f32) * s / 2.0,
        )
    }

    /// Interior corners in color pixel coordinates, row-major
    pub fn corner_pixels(&self, format: ColorImageFormat) -> Vec<(f32, f32)> {
        let pinhole = Pinhole::for_size(format.width, format.height);
        let (x0, y0) = self.board_origin();
        let s = self.square_size_m;
        let z = self.plane_z();

        let mut corners = Vec::with_capacity(self.board.corner_count());
        for row in 0..self.board.rows {
            for col in 0..self.board.columns {
                let x = x0 + (col + 1) as f32 * s;
                let y = y0 + (row + 1) as f32 * s;
                corners.push(pinhole.project(x, y, z));
            }
        }
        corners
    }

    /// Size of one board square in color pixels
    pub fn square_pixels(&self, format: ColorImageFormat) -> f32 {
        let pinhole = Pinhole::for_size(format.width, format.height);
        pinhole.fx * self.square_size_m / self.plane_z()
    }

    /// Corner detector that recognizes this scene's board
    pub fn detector(&self, format: ColorImageFormat) -> ProjectedBoardDetector {
        ProjectedBoardDetector::new(
            self.board,
            self.corner_pixels(format),
            self.square_pixels(format),
        )
    }

    fn luma_at(&self, pinhole: &Pinhole, u: u32, v: u32) -> u8 {
        if !self.board_visible {
            return WALL_LUMA;
        }
        let (x, y) = pinhole.unproject(u as f32, v as f32, self.plane_z());
        let (x0, y0) = self.board_origin();
        let s = self.square_size_m;
        let cols = (self.board.columns + 1) as f32;
        let rows = (self.board.rows + 1) as f32;

        let i = ((x - x0) / s).floor();
        let j = ((y - y0) / s).floor();
        if i >= 0.0 && i < cols && j >= 0.0 && j < rows {
            if (i as i64 + j as i64) % 2 == 0 {
                DARK_LUMA
            } else {
                LIGHT_LUMA
            }
        } else if i >= -1.0 && i <= cols && j >= -1.0 && j <= rows {
            MARGIN_LUMA
        } else {
            WALL_LUMA
        }
    }

    /// Render one color frame
    pub fn render_color(&self, format: ColorImageFormat) -> Vec<u8> {
        let pinhole = Pinhole::for_size(format.width, format.height);
        let mut data = vec![0u8; format.byte_len()];
        for (index, pixel) in data
            .chunks_exact_mut(ColorImageFormat::BYTES_PER_PIXEL)
            .enumerate()
        {
            let u = (index % format.width as usize) as u32;
            let v = (index / format.width as usize) as u32;
            let luma = self.luma_at(&pinhole, u, v);
            // Gray pixels read the same in either channel order
            pixel.copy_from_slice(&[luma, luma, luma, 255]);
        }
        data
    }

    /// Render one depth frame, dropping samples outside the range mode
    pub fn render_depth(&self, format: DepthImageFormat, range: DepthRange) -> Vec<u16> {
        let sample = if range.contains_mm(self.plane_depth_mm) {
            self.plane_depth_mm
        } else {
            depth::DEPTH_INVALID_MM
        };
        vec![sample; format.pixel_count()]
    }

    /// Skeleton slots for one frame
    pub fn skeletons(&self) -> Vec<Skeleton> {
        let tracked = self.tracked_bodies.min(stream::SKELETON_COUNT);
        let z = self.plane_z() * 0.75;
        (0..stream::SKELETON_COUNT)
            .map(|slot| {
                if slot >= tracked {
                    return Skeleton::default();
                }
                let body_x = slot as f32 * 0.6 - 0.3;
                let joints = JointType::ALL
                    .iter()
                    .enumerate()
                    .map(|(n, joint_type)| Joint {
                        joint_type: *joint_type,
                        position: WorldPoint::new(body_x, 0.7 - n as f32 * 0.08, z),
                        tracking_state: JointTrackingState::Tracked,
                    })
                    .collect();
                Skeleton {
                    tracking_id: slot as u32 + 1,
                    tracking_state: TrackingState::Tracked,
                    position: WorldPoint::new(body_x, 0.0, z),
                    joints,
                }
            })
            .collect()
    }
}

/// Settings that may change while streaming
#[derive(Debug, Clone, Copy)]
struct LiveSettings {
    depth_range: DepthRange,
    skeleton: SkeletonConfig,
    elevation_degrees: i32,
}

/// Sensor streaming a [`SyntheticScene`]
pub struct SyntheticSensor {
    info: SensorInfo,
    scene: SyntheticScene,
    mapper: Arc<SyntheticMapper>,
    live: Arc<Mutex<LiveSettings>>,
    frame_period: Duration,
    worker: Option<LoopController>,
}

impl SyntheticSensor {
    pub fn new(info: SensorInfo, scene: SyntheticScene, frame_period: Duration) -> Self {
        Self {
            info,
            scene,
            mapper: Arc::new(SyntheticMapper::default()),
            live: Arc::new(Mutex::new(LiveSettings {
                depth_range: DepthRange::default(),
                skeleton: SkeletonConfig::default(),
                elevation_degrees: 0,
            })),
            frame_period,
            worker: None,
        }
    }

    pub fn elevation_degrees(&self) -> i32 {
        self.live.lock().elevation_degrees
    }
}

impl FrameSource for SyntheticSensor {
    fn info(&self) -> &SensorInfo {
        &self.info
    }

    fn start(
        &mut self,
        settings: &SensorSettings,
        events: Sender<SensorEvent>,
    ) -> Result<(), SensorError> {
        if self.is_running() {
            return Err(SensorError::InitializationFailed(
                "Sensor is already streaming".to_string(),
            ));
        }
        if settings.color_format.pixel_count() == 0 || settings.depth_format.pixel_count() == 0 {
            return Err(SensorError::InitializationFailed(format!(
                "Invalid stream formats {} / {}",
                settings.color_format, settings.depth_format
            )));
        }

        {
            let mut live = self.live.lock();
            live.depth_range = settings.depth_range;
            live.skeleton = settings.skeleton;
        }

        info!(
            sensor = %self.info.name,
            color = %settings.color_format,
            depth = %settings.depth_format,
            "Starting synthetic sensor"
        );

        let color_format = settings.color_format;
        let depth_format = settings.depth_format;
        let color = self.scene.render_color(color_format);
        let scene = self.scene.clone();
        let live = Arc::clone(&self.live);
        let period = self.frame_period;
        let started = Instant::now();
        let mut frame_number = 0u32;

        let worker = LoopController::start("synthetic-sensor", move || {
            frame_number = frame_number.wrapping_add(1);
            let timestamp_ms = started.elapsed().as_millis() as i64;
            let settings = *live.lock();

            let mut batch = vec![
                SensorEvent::Color(ColorFrame {
                    format: color_format,
                    data: color.clone(),
                    frame_number,
                    timestamp_ms,
                }),
                SensorEvent::Depth(DepthFrame {
                    format: depth_format,
                    data: scene.render_depth(depth_format, settings.depth_range),
                    frame_number,
                    timestamp_ms,
                }),
            ];
            if settings.skeleton.enabled {
                batch.push(SensorEvent::Skeleton(SkeletonFrame {
                    skeletons: scene.skeletons(),
                    frame_number,
                    timestamp_ms,
                }));
            }

            for event in batch {
                match events.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        trace!(frame_number, "Event channel full, dropping frame");
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("Event receiver gone, stopping synthetic sensor");
                        return LoopAction::Stop;
                    }
                }
            }

            std::thread::sleep(period);
            LoopAction::Continue
        });

        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
            info!(sensor = %self.info.name, "Synthetic sensor stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.is_running())
    }

    fn mapper(&self) -> Arc<dyn CoordinateMapper> {
        self.mapper.clone()
    }

    fn set_depth_range(&mut self, range: DepthRange) -> Result<(), SensorError> {
        debug!(range = range.display_name(), "Setting depth range");
        self.live.lock().depth_range = range;
        Ok(())
    }

    fn set_skeleton_config(&mut self, config: &SkeletonConfig) -> Result<(), SensorError> {
        debug!(enabled = config.enabled, "Setting skeleton tracking");
        self.live.lock().skeleton = *config;
        Ok(())
    }

    fn set_elevation_degrees(&mut self, degrees: i32) -> Result<(), SensorError> {
        let (min, max) = self.elevation_limits();
        let clamped = degrees.clamp(min, max);
        debug!(requested = degrees, applied = clamped, "Setting elevation");
        self.live.lock().elevation_degrees = clamped;
        Ok(())
    }
}

impl Drop for SyntheticSensor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Provider exposing zero or more identical synthetic sensors
#[derive(Debug, Clone)]
pub struct SyntheticProvider {
    scene: SyntheticScene,
    sensor_count: usize,
    frame_period: Duration,
}

impl SyntheticProvider {
    /// One sensor streaming `scene`
    pub fn new(scene: SyntheticScene) -> Self {
        Self {
            scene,
            sensor_count: 1,
            frame_period: timing::SYNTHETIC_FRAME_PERIOD,
        }
    }

    /// A provider with nothing attached
    pub fn disconnected() -> Self {
        Self {
            scene: SyntheticScene::default(),
            sensor_count: 0,
            frame_period: timing::SYNTHETIC_FRAME_PERIOD,
        }
    }

    pub fn with_frame_period(mut self, period: Duration) -> Self {
        self.frame_period = period;
        self
    }

    pub fn scene(&self) -> &SyntheticScene {
        &self.scene
    }
}

impl SensorProvider for SyntheticProvider {
    fn enumerate(&self) -> Vec<SensorInfo> {
        (0..self.sensor_count)
            .map(|index| SensorInfo {
                index,
                name: format!("Synthetic Sensor {}", index),
                serial: format!("SYN{:04}", index),
            })
            .collect()
    }

    fn open(&self, index: usize) -> Result<Box<dyn FrameSource>, SensorError> {
        let info = self
            .enumerate()
            .into_iter()
            .find(|info| info.index == index)
            .ok_or(SensorError::NotFound)?;
        Ok(Box::new(SyntheticSensor::new(
            info,
            self.scene.clone(),
            self.frame_period,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats() -> (DepthImageFormat, ColorImageFormat) {
        (
            DepthImageFormat::new(640, 480),
            ColorImageFormat::new(640, 480, ColorLayout::Bgra),
        )
    }

    #[test]
    fn test_unprojection_matches_pinhole() {
        let (depth_format, _) = formats();
        let mapper = SyntheticMapper::default();

        let p = mapper.depth_to_world(depth_format, 0, 0, 2000).unwrap();
        assert!((p.z - 2.0).abs() < 1e-6);
        assert!((p.x - (0.0 - intrinsics::CX) * 2.0 / intrinsics::FX).abs() < 1e-5);
        // Image top is world up
        assert!(p.y > 0.0);

        let origin = mapper.depth_to_world(depth_format, 10, 10, 0).unwrap();
        assert_eq!(origin, WorldPoint::default());

        assert!(mapper.depth_to_world(depth_format, 640, 0, 1000).is_err());
    }

    #[test]
    fn test_registration_is_depth_dependent_shift() {
        let (depth_format, color_format) = formats();
        let mapper = SyntheticMapper::default();

        let near = mapper
            .depth_to_color(depth_format, 320, 200, 500, color_format)
            .unwrap();
        let far = mapper
            .depth_to_color(depth_format, 320, 200, 4000, color_format)
            .unwrap();
        assert_eq!(near.y, 200);
        assert_eq!(far.y, 200);
        assert!(near.x < far.x);
        assert!(mapper
            .depth_to_color(depth_format, 320, 200, 0, color_format)
            .is_none());
    }

    #[test]
    fn test_corners_are_inside_image() {
        let (_, color_format) = formats();
        let scene = SyntheticScene::default();
        let corners = scene.corner_pixels(color_format);
        assert_eq!(corners.len(), 70);
        for (u, v) in corners {
            assert!(u > 0.0 && u < 640.0);
            assert!(v > 0.0 && v < 480.0);
        }
    }

    #[test]
    fn test_near_mode_drops_far_samples() {
        let scene = SyntheticScene {
            plane_depth_mm: 3500,
            ..SyntheticScene::default()
        };
        let format = DepthImageFormat::new(4, 2);
        assert!(scene
            .render_depth(format, DepthRange::Near)
            .iter()
            .all(|&d| d == 0));
        assert!(scene
            .render_depth(format, DepthRange::Default)
            .iter()
            .all(|&d| d == 3500));
    }

    #[test]
    fn test_disconnected_provider_has_no_sensor() {
        let provider = SyntheticProvider::disconnected();
        assert!(provider.enumerate().is_empty());
        assert!(matches!(provider.open(0), Err(SensorError::NotFound)));
    }

    #[test]
    fn test_skeleton_slots() {
        let scene = SyntheticScene::default();
        let skeletons = scene.skeletons();
        assert_eq!(skeletons.len(), stream::SKELETON_COUNT);
        assert_eq!(skeletons[0].tracking_state, TrackingState::Tracked);
        assert_eq!(skeletons[0].joints.len(), 20);
        assert_eq!(skeletons[1].tracking_state, TrackingState::NotTracked);
    }
}
