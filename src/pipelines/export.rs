// SPDX-License-Identifier: GPL-3.0-only

//! LAS point cloud export of a world buffer
//!
//! Writes every depth pixel with a reading as one point. When a color frame
//! and its registration table are supplied, points are colored from the
//! registered color pixel.

use crate::backends::sensor::ColorLayout;
use crate::errors::{PipelineError, PipelineResult};
use crate::pipelines::registration::RegistrationTable;
use crate::pipelines::store::ColorBuffer;
use crate::pipelines::world::WorldBuffer;
use las::{Builder, Color, Point, Writer};
use std::path::Path;
use tracing::{debug, info};

/// Color source for exported points
pub struct PointColors<'a> {
    pub color: &'a ColorBuffer,
    pub registration: &'a RegistrationTable,
}

impl PointColors<'_> {
    /// 16-bit RGB of the color pixel registered to `depth_index`
    fn at(&self, depth_index: usize) -> Option<Color> {
        let point = self.registration.get(depth_index)?;
        let format = self.color.format;
        let offset = format.index_of(point.x as i64, point.y as i64)? * 4;
        let pixel = self.color.data.get(offset..offset + 4)?;
        let (r, g, b) = match format.layout {
            ColorLayout::Rgba => (pixel[0], pixel[1], pixel[2]),
            ColorLayout::Bgra => (pixel[2], pixel[1], pixel[0]),
        };
        // LAS stores 16-bit color
        Some(Color::new(
            (r as u16) << 8,
            (g as u16) << 8,
            (b as u16) << 8,
        ))
    }
}

fn las_error(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Io(format!("{}: {}", context, e))
}

/// Write the valid samples of `world` to a LAS 1.4 file.
///
/// Returns the number of points written.
pub fn export_las(
    world: &WorldBuffer,
    colors: Option<&PointColors<'_>>,
    output_path: &Path,
) -> PipelineResult<usize> {
    let points: Vec<(usize, f64, f64, f64)> = world
        .texels
        .iter()
        .enumerate()
        .filter(|(_, t)| t.z > 0.0)
        .map(|(i, t)| (i, t.x as f64, t.y as f64, t.z as f64))
        .collect();

    if points.is_empty() {
        return Err(PipelineError::NoFrame("world".into()));
    }

    let bounds = points.iter().fold(
        ([f64::MAX; 3], [f64::MIN; 3]),
        |(mut min, mut max), &(_, x, y, z)| {
            for (axis, v) in [x, y, z].into_iter().enumerate() {
                min[axis] = min[axis].min(v);
                max[axis] = max[axis].max(v);
            }
            (min, max)
        },
    );
    let center = |axis: usize| (bounds.0[axis] + bounds.1[axis]) / 2.0;

    let mut builder = Builder::from((1, 4));
    builder.point_format.has_color = colors.is_some();
    builder.point_format.is_compressed = false;

    let scale = 0.001; // 1mm
    builder.transforms = las::Vector {
        x: las::Transform {
            scale,
            offset: center(0),
        },
        y: las::Transform {
            scale,
            offset: center(1),
        },
        z: las::Transform {
            scale,
            offset: center(2),
        },
    };

    let header = builder
        .into_header()
        .map_err(|e| las_error("Failed to build LAS header", e))?;

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = Writer::from_path(output_path, header)
        .map_err(|e| las_error("Failed to create LAS writer", e))?;

    for &(index, x, y, z) in &points {
        let point = Point {
            x,
            y,
            z,
            color: colors.map(|c| c.at(index).unwrap_or(Color::new(0, 0, 0))),
            ..Default::default()
        };
        writer
            .write_point(point)
            .map_err(|e| las_error("Failed to write point", e))?;
    }

    writer
        .close()
        .map_err(|e| las_error("Failed to close LAS file", e))?;

    debug!(path = %output_path.display(), "LAS export complete");
    info!(points = points.len(), path = %output_path.display(), "Exported point cloud");
    Ok(points.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::world::WorldTexel;

    #[test]
    fn test_export_skips_empty_samples() {
        let mut world = WorldBuffer::new(2, 2);
        world.texels[0] = WorldTexel {
            x: 0.1,
            y: 0.2,
            z: 1.5,
            w: 1.0,
        };
        world.texels[3] = WorldTexel {
            x: -0.1,
            y: -0.2,
            z: 2.0,
            w: 1.0,
        };

        let path =
            std::env::temp_dir().join(format!("fullhouse-export-{}.las", std::process::id()));
        let written = export_las(&world, None, &path).unwrap();
        assert_eq!(written, 2);
        assert!(path.exists());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_export_without_samples_fails() {
        let world = WorldBuffer::new(2, 2);
        let path = std::env::temp_dir().join("fullhouse-export-empty.las");
        assert!(matches!(
            export_las(&world, None, &path),
            Err(PipelineError::NoFrame(_))
        ));
    }
}
