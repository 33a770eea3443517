// SPDX-License-Identifier: GPL-3.0-only

//! Depth-to-color registration
//!
//! The forward table gives, for every depth pixel, the color pixel observing
//! the same surface. Calibration needs the opposite direction, so the table
//! is inverted on demand. Several depth pixels can land on the same color
//! pixel; in the inverse table the highest depth index wins.

use crate::backends::sensor::{ColorImageFormat, ColorPoint, CoordinateMapper, DepthImageFormat};
use crate::pipelines::store::DepthBuffer;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, trace};

/// Depth index to color coordinate, built from one depth frame
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationTable {
    pub depth_format: DepthImageFormat,
    pub color_format: ColorImageFormat,
    /// Frame number of the depth frame the table was built from
    pub frame_number: u32,
    points: Vec<Option<ColorPoint>>,
}

impl RegistrationTable {
    /// Build the table for `depth` by calling the sensor mapping per pixel.
    ///
    /// Rows are mapped in parallel.
    pub fn build(
        mapper: &dyn CoordinateMapper,
        depth: &DepthBuffer,
        color_format: ColorImageFormat,
    ) -> Self {
        let format = depth.format;
        let width = format.width as usize;
        let mut points = vec![None; format.pixel_count()];

        if width > 0 && depth.data.len() == points.len() {
            points
                .par_chunks_mut(width)
                .zip(depth.data.par_chunks(width))
                .enumerate()
                .for_each(|(y, (out_row, in_row))| {
                    for (x, (point, &depth_mm)) in out_row.iter_mut().zip(in_row).enumerate() {
                        let (x, y) = (x as u32, y as u32);
                        *point = mapper.depth_to_color(format, x, y, depth_mm, color_format);
                    }
                });
        } else if !depth.data.is_empty() {
            debug!(
                samples = depth.data.len(),
                %format,
                "Depth buffer does not match its format, registration left empty"
            );
        }

        Self {
            depth_format: format,
            color_format,
            frame_number: depth.frame_number,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Color coordinate registered to a depth index
    pub fn get(&self, depth_index: usize) -> Option<ColorPoint> {
        self.points.get(depth_index).copied().flatten()
    }

    /// Invert into a color-pixel to depth-index table.
    ///
    /// Entries are visited in increasing depth index so later writes win.
    /// Targets outside the color image are skipped.
    pub fn invert(&self) -> InverseRegistrationTable {
        let color_format = self.color_format;
        let mut indices = vec![None; color_format.pixel_count()];
        let mut skipped = 0usize;

        for (depth_index, point) in self.points.iter().enumerate() {
            let Some(point) = point else {
                continue;
            };
            match color_format.index_of(point.x as i64, point.y as i64) {
                Some(color_index) => indices[color_index] = Some(depth_index as u32),
                None => skipped += 1,
            }
        }

        trace!(skipped, "Inverted registration table");
        InverseRegistrationTable {
            color_format,
            depth_format: self.depth_format,
            indices,
        }
    }
}

/// Color pixel to depth index
#[derive(Debug, Clone, PartialEq)]
pub struct InverseRegistrationTable {
    pub color_format: ColorImageFormat,
    pub depth_format: DepthImageFormat,
    indices: Vec<Option<u32>>,
}

impl InverseRegistrationTable {
    /// Depth index registered to a linear color index
    pub fn depth_index(&self, color_index: usize) -> Option<usize> {
        self.indices
            .get(color_index)
            .copied()
            .flatten()
            .map(|i| i as usize)
    }

    /// Depth index registered to a color pixel, `None` when out of bounds or
    /// unmapped
    pub fn lookup(&self, x: i64, y: i64) -> Option<usize> {
        self.color_format
            .index_of(x, y)
            .and_then(|index| self.depth_index(index))
    }

    /// Count of color pixels with a registered depth sample
    pub fn mapped_count(&self) -> usize {
        self.indices.iter().filter(|i| i.is_some()).count()
    }
}

/// Keeps the registration table of the latest depth frame
pub struct RegistrationMapper {
    mapper: Arc<dyn CoordinateMapper>,
    latest: Mutex<Option<Arc<RegistrationTable>>>,
}

impl RegistrationMapper {
    pub fn new(mapper: Arc<dyn CoordinateMapper>) -> Self {
        Self {
            mapper,
            latest: Mutex::new(None),
        }
    }

    /// Build a table for `depth` without storing it
    pub fn build(&self, depth: &DepthBuffer, color_format: ColorImageFormat) -> RegistrationTable {
        RegistrationTable::build(self.mapper.as_ref(), depth, color_format)
    }

    /// Build a table for `depth` and make it the latest
    pub fn update(
        &self,
        depth: &DepthBuffer,
        color_format: ColorImageFormat,
    ) -> Arc<RegistrationTable> {
        let table = Arc::new(self.build(depth, color_format));
        *self.latest.lock() = Some(Arc::clone(&table));
        table
    }

    pub fn latest(&self) -> Option<Arc<RegistrationTable>> {
        self.latest.lock().clone()
    }

    /// Latest table if it was built from the given depth frame and formats,
    /// otherwise a fresh one
    pub fn table_for(
        &self,
        depth: &DepthBuffer,
        color_format: ColorImageFormat,
    ) -> Arc<RegistrationTable> {
        match self.latest() {
            Some(table)
                if table.frame_number == depth.frame_number
                    && table.depth_format == depth.format
                    && table.color_format == color_format =>
            {
                table
            }
            _ => Arc::new(self.build(depth, color_format)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::{ColorLayout, SyntheticMapper, WorldPoint};
    use crate::errors::SensorError;

    fn depth(width: u32, height: u32, mm: u16) -> DepthBuffer {
        DepthBuffer {
            format: DepthImageFormat::new(width, height),
            data: vec![mm; (width * height) as usize],
            frame_number: 7,
            timestamp_ms: 0,
        }
    }

    /// Every depth pixel lands on color pixel (0, 0)
    struct CollapsingMapper;

    impl CoordinateMapper for CollapsingMapper {
        fn depth_to_world(
            &self,
            _format: DepthImageFormat,
            _x: u32,
            _y: u32,
            _depth_mm: u16,
        ) -> Result<WorldPoint, SensorError> {
            Ok(WorldPoint::default())
        }

        fn depth_to_color(
            &self,
            _depth_format: DepthImageFormat,
            _x: u32,
            _y: u32,
            _depth_mm: u16,
            _color_format: ColorImageFormat,
        ) -> Option<ColorPoint> {
            Some(ColorPoint::new(0, 0))
        }
    }

    #[test]
    fn test_inverse_round_trips_to_color_pixel() {
        let color_format = ColorImageFormat::new(64, 48, ColorLayout::Bgra);
        let table = RegistrationTable::build(
            &SyntheticMapper::default(),
            &depth(64, 48, 1500),
            color_format,
        );
        let inverse = table.invert();
        assert!(inverse.mapped_count() > 0);

        for color_index in 0..color_format.pixel_count() {
            if let Some(depth_index) = inverse.depth_index(color_index) {
                let point = table.get(depth_index).unwrap();
                let back = color_format.index_of(point.x as i64, point.y as i64);
                assert_eq!(back, Some(color_index));
            }
        }
    }

    #[test]
    fn test_collisions_keep_last_depth_index() {
        let color_format = ColorImageFormat::new(4, 4, ColorLayout::Bgra);
        let table = RegistrationTable::build(&CollapsingMapper, &depth(3, 2, 1000), color_format);
        let inverse = table.invert();
        assert_eq!(inverse.lookup(0, 0), Some(5));
        assert_eq!(inverse.mapped_count(), 1);
    }

    #[test]
    fn test_invalid_depth_is_unregistered() {
        let color_format = ColorImageFormat::new(8, 8, ColorLayout::Bgra);
        let table =
            RegistrationTable::build(&SyntheticMapper::default(), &depth(8, 8, 0), color_format);
        assert_eq!(table.len(), 64);
        assert!(table.get(0).is_none());
        assert_eq!(table.invert().mapped_count(), 0);
    }

    #[test]
    fn test_out_of_bounds_lookup() {
        let color_format = ColorImageFormat::new(8, 8, ColorLayout::Bgra);
        let table =
            RegistrationTable::build(&SyntheticMapper::default(), &depth(8, 8, 1000), color_format);
        let inverse = table.invert();
        assert_eq!(inverse.lookup(-1, 0), None);
        assert_eq!(inverse.lookup(8, 0), None);
    }

    #[test]
    fn test_table_for_reuses_matching_frame() {
        let registration = RegistrationMapper::new(Arc::new(SyntheticMapper::default()));
        let color_format = ColorImageFormat::new(8, 8, ColorLayout::Bgra);
        let frame = depth(8, 8, 1000);
        let latest = registration.update(&frame, color_format);
        assert!(Arc::ptr_eq(&latest, &registration.table_for(&frame, color_format)));

        let mut newer = frame.clone();
        newer.frame_number += 1;
        assert!(!Arc::ptr_eq(&latest, &registration.table_for(&newer, color_format)));
    }
}
