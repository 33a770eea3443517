// SPDX-License-Identifier: GPL-3.0-only

//! Board-corner correspondences
//!
//! Locates the chessboard in the color image and, for every interior
//! corner, finds the registered depth pixel, its raw depth and its world
//! position. The resulting pairs of (color pixel, world point) feed an
//! external camera/projector calibration.

pub mod detector;

pub use detector::{CornerDetector, ProjectedBoardDetector, luminance};

use crate::backends::sensor::{CoordinateMapper, WorldPoint};
use crate::config::{CalibrationBoard, WorldSource};
use crate::constants::depth;
use crate::errors::{PipelineError, PipelineResult};
use crate::pipelines::publisher::BufferPublisher;
use crate::pipelines::registration::{InverseRegistrationTable, RegistrationTable};
use crate::pipelines::store::{ColorBuffer, DepthBuffer};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Convert a raw depth sample to meters
pub fn depth_mm_to_meters(depth_mm: u16) -> f64 {
    depth_mm as f64 / depth::MM_PER_METER as f64
}

/// One detected board corner with its depth correspondence
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Corner {
    /// Sub-pixel corner position in the color image
    pub rgb: (f32, f32),
    /// Registered depth pixel
    pub depth_coordinate: (u32, u32),
    /// Raw depth sample (millimeters)
    pub depth_value_mm: u16,
    /// World position of the depth pixel (meters)
    pub world: WorldPoint,
}

impl Corner {
    pub fn depth_meters(&self) -> f64 {
        depth_mm_to_meters(self.depth_value_mm)
    }
}

/// Frames a correspondence search reads from
pub struct CalibrationInputs<'a> {
    pub color: &'a ColorBuffer,
    pub depth: &'a DepthBuffer,
    pub registration: &'a RegistrationTable,
    /// Needed for [`WorldSource::PublishedBuffer`]
    pub publisher: Option<&'a BufferPublisher>,
}

/// Finds corner correspondences on request
pub struct CorrespondenceFinder {
    detector: Arc<dyn CornerDetector>,
    mapper: Arc<dyn CoordinateMapper>,
    world_source: WorldSource,
}

impl CorrespondenceFinder {
    pub fn new(
        detector: Arc<dyn CornerDetector>,
        mapper: Arc<dyn CoordinateMapper>,
        world_source: WorldSource,
    ) -> Self {
        Self {
            detector,
            mapper,
            world_source,
        }
    }

    /// Detect the board and resolve every corner.
    ///
    /// Corners whose color pixel has no registered depth sample are left
    /// out, so the result can be shorter than the board's corner count.
    pub fn find(
        &self,
        inputs: &CalibrationInputs<'_>,
        board: CalibrationBoard,
    ) -> PipelineResult<Vec<Corner>> {
        let gray = luminance(inputs.color).ok_or_else(|| PipelineError::NoFrame("RGB".into()))?;
        let Some(corner_pixels) = self.detector.find_corners(&gray, board) else {
            info!(
                columns = board.columns,
                rows = board.rows,
                "No chessboard found"
            );
            return Err(PipelineError::CalibrationNotFound);
        };

        let inverse = inputs.registration.invert();
        let corners = self.resolve(&corner_pixels, &inverse, inputs.depth, inputs.publisher);
        info!(
            detected = corner_pixels.len(),
            resolved = corners.len(),
            "Board corners resolved"
        );
        Ok(corners)
    }

    /// Resolve detected corner pixels to depth and world coordinates
    pub fn resolve(
        &self,
        corner_pixels: &[(f32, f32)],
        inverse: &InverseRegistrationTable,
        depth: &DepthBuffer,
        publisher: Option<&BufferPublisher>,
    ) -> Vec<Corner> {
        corner_pixels
            .iter()
            .filter_map(|&rgb| match self.resolve_one(rgb, inverse, depth, publisher) {
                Ok(corner) => Some(corner),
                Err(e) => {
                    debug!(x = rgb.0, y = rgb.1, error = %e, "Skipping corner");
                    None
                }
            })
            .collect()
    }

    fn resolve_one(
        &self,
        rgb: (f32, f32),
        inverse: &InverseRegistrationTable,
        depth: &DepthBuffer,
        publisher: Option<&BufferPublisher>,
    ) -> PipelineResult<Corner> {
        let x = rgb.0.round() as i64;
        let y = rgb.1.round() as i64;
        let color_format = inverse.color_format;
        let color_index = color_format
            .index_of(x, y)
            .ok_or(PipelineError::IndexOutOfRange {
                index: (y.max(0) as usize) * color_format.width as usize + x.max(0) as usize,
                len: color_format.pixel_count(),
            })?;

        let depth_index = inverse
            .depth_index(color_index)
            .ok_or(PipelineError::IndexOutOfRange {
                index: color_index,
                len: depth.data.len(),
            })?;
        let depth_value_mm = *depth
            .data
            .get(depth_index)
            .ok_or(PipelineError::IndexOutOfRange {
                index: depth_index,
                len: depth.data.len(),
            })?;
        let (depth_x, depth_y) = depth
            .format
            .coords_of(depth_index)
            .ok_or(PipelineError::IndexOutOfRange {
                index: depth_index,
                len: depth.format.pixel_count(),
            })?;

        let world = self.world_point(
            depth,
            depth_index,
            depth_x,
            depth_y,
            depth_value_mm,
            publisher,
        )?;

        Ok(Corner {
            rgb,
            depth_coordinate: (depth_x, depth_y),
            depth_value_mm,
            world,
        })
    }

    fn world_point(
        &self,
        depth: &DepthBuffer,
        depth_index: usize,
        x: u32,
        y: u32,
        depth_mm: u16,
        publisher: Option<&BufferPublisher>,
    ) -> PipelineResult<WorldPoint> {
        if self.world_source == WorldSource::PublishedBuffer
            && let Some(publisher) = publisher
        {
            let texel = publisher.read_world(|world, _| {
                (world.width == depth.format.width && world.height == depth.format.height)
                    .then(|| world.get(depth_index))
                    .flatten()
            });
            match texel {
                Ok(Some(t)) => return Ok(WorldPoint::new(t.x, t.y, t.z)),
                Ok(None) => debug!(depth_index, "World buffer has another size, unprojecting"),
                Err(e) => debug!(error = %e, "World buffer unavailable, unprojecting"),
            }
        }
        Ok(self.mapper.depth_to_world(depth.format, x, y, depth_mm)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::{
        ColorImageFormat, ColorLayout, DepthImageFormat, SyntheticMapper, SyntheticScene,
    };

    fn inputs(scene: &SyntheticScene) -> (ColorBuffer, DepthBuffer, RegistrationTable) {
        let color_format = ColorImageFormat::new(640, 480, ColorLayout::Bgra);
        let depth_format = DepthImageFormat::new(640, 480);
        let color = ColorBuffer {
            format: color_format,
            data: scene.render_color(color_format),
            frame_number: 1,
            timestamp_ms: 0,
        };
        let depth = DepthBuffer {
            format: depth_format,
            data: vec![scene.plane_depth_mm; depth_format.pixel_count()],
            frame_number: 1,
            timestamp_ms: 0,
        };
        let table = RegistrationTable::build(&SyntheticMapper::default(), &depth, color_format);
        (color, depth, table)
    }

    fn finder(scene: &SyntheticScene) -> CorrespondenceFinder {
        let format = ColorImageFormat::new(640, 480, ColorLayout::Bgra);
        CorrespondenceFinder::new(
            Arc::new(scene.detector(format)),
            Arc::new(SyntheticMapper::default()),
            WorldSource::Unproject,
        )
    }

    #[test]
    fn test_depth_conversion() {
        assert_eq!(depth_mm_to_meters(0), 0.0);
        assert_eq!(depth_mm_to_meters(1000), 1.0);
        assert_eq!(depth_mm_to_meters(2500), 2.5);
        assert!((depth_mm_to_meters(65535) - 65.535).abs() < 1e-9);
    }

    #[test]
    fn test_corners_resolve_to_plane() {
        let scene = SyntheticScene::default();
        let (color, depth, table) = inputs(&scene);
        let corners = finder(&scene)
            .find(
                &CalibrationInputs {
                    color: &color,
                    depth: &depth,
                    registration: &table,
                    publisher: None,
                },
                scene.board,
            )
            .unwrap();

        assert_eq!(corners.len(), 70);
        for corner in &corners {
            assert_eq!(corner.depth_value_mm, 1500);
            assert!((corner.world.z - 1.5).abs() < 1e-6);
            assert!((corner.depth_meters() - 1.5).abs() < 1e-9);
        }
        // Row-major: first row runs left to right
        assert!(corners[0].rgb.0 < corners[1].rgb.0);
        assert!(corners[0].depth_coordinate.0 < corners[1].depth_coordinate.0);
    }

    #[test]
    fn test_hidden_board_reports_not_found() {
        let scene = SyntheticScene {
            board_visible: false,
            ..SyntheticScene::default()
        };
        let (color, depth, table) = inputs(&scene);
        let result = finder(&scene).find(
            &CalibrationInputs {
                color: &color,
                depth: &depth,
                registration: &table,
                publisher: None,
            },
            scene.board,
        );
        assert_eq!(result, Err(PipelineError::CalibrationNotFound));
    }

    #[test]
    fn test_unregistered_corners_are_skipped() {
        let scene = SyntheticScene::default();
        let (_, depth, table) = inputs(&scene);
        let inverse = table.invert();
        let pixels = [(-5.0, 10.0), (639.4, 100.0), (320.0, 240.0)];
        let corners = finder(&scene).resolve(&pixels, &inverse, &depth, None);
        // Off-image and the unregistered right edge are dropped
        assert_eq!(corners.len(), 1);
        assert_eq!(corners[0].rgb, (320.0, 240.0));
    }
}
