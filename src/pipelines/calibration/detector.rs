// SPDX-License-Identifier: GPL-3.0-only

//! Chessboard corner detection seam
//!
//! Detection runs on a single-channel luminance image. The detector itself
//! is pluggable; [`ProjectedBoardDetector`] verifies a known board placement
//! against the image, which is what the synthetic sensor needs.

use crate::backends::sensor::ColorLayout;
use crate::config::CalibrationBoard;
use crate::pipelines::store::ColorBuffer;
use image::{DynamicImage, GrayImage, RgbaImage};
use tracing::{debug, trace};

/// Minimum luminance step between neighboring squares at a corner
const MIN_CORNER_CONTRAST: i32 = 60;

/// Finds the interior corners of a chessboard
pub trait CornerDetector: Send + Sync {
    /// Interior corners in pixel coordinates (sub-pixel), row-major, or
    /// `None` when the full board is not visible.
    fn find_corners(&self, luminance: &GrayImage, board: CalibrationBoard)
    -> Option<Vec<(f32, f32)>>;
}

/// Convert a color frame to luminance
pub fn luminance(color: &ColorBuffer) -> Option<GrayImage> {
    let format = color.format;
    if color.data.len() != format.byte_len() {
        debug!(
            len = color.data.len(),
            expected = format.byte_len(),
            "Color buffer length does not match its format"
        );
        return None;
    }

    let mut rgba = color.data.clone();
    if format.layout == ColorLayout::Bgra {
        for pixel in rgba.chunks_exact_mut(4) {
            pixel.swap(0, 2);
        }
    }
    let image = RgbaImage::from_raw(format.width, format.height, rgba)?;
    Some(DynamicImage::ImageRgba8(image).to_luma8())
}

/// Checks a board at known pixel positions
///
/// Each expected corner must show the chessboard pattern: diagonal
/// neighbors alike, adjacent neighbors contrasting.
#[derive(Debug, Clone)]
pub struct ProjectedBoardDetector {
    board: CalibrationBoard,
    corners: Vec<(f32, f32)>,
    probe: f32,
}

impl ProjectedBoardDetector {
    /// `square_pixels` is the approximate square edge length in the image
    pub fn new(board: CalibrationBoard, corners: Vec<(f32, f32)>, square_pixels: f32) -> Self {
        Self {
            board,
            corners,
            probe: (square_pixels / 4.0).max(1.0),
        }
    }

    fn sample(image: &GrayImage, x: f32, y: f32) -> Option<i32> {
        let (x, y) = (x.round(), y.round());
        if x < 0.0 || y < 0.0 || x >= image.width() as f32 || y >= image.height() as f32 {
            return None;
        }
        Some(image.get_pixel(x as u32, y as u32).0[0] as i32)
    }

    fn is_corner(&self, image: &GrayImage, (x, y): (f32, f32)) -> bool {
        let d = self.probe;
        let quadrants = (
            Self::sample(image, x - d, y - d),
            Self::sample(image, x + d, y - d),
            Self::sample(image, x - d, y + d),
            Self::sample(image, x + d, y + d),
        );
        let (Some(tl), Some(tr), Some(bl), Some(br)) = quadrants else {
            return false;
        };
        (tl - br).abs() < MIN_CORNER_CONTRAST
            && (tr - bl).abs() < MIN_CORNER_CONTRAST
            && (tl - tr).abs() >= MIN_CORNER_CONTRAST
            && (tl - bl).abs() >= MIN_CORNER_CONTRAST
    }
}

impl CornerDetector for ProjectedBoardDetector {
    fn find_corners(
        &self,
        luminance: &GrayImage,
        board: CalibrationBoard,
    ) -> Option<Vec<(f32, f32)>> {
        if board != self.board || self.corners.len() != board.corner_count() {
            debug!(
                requested = ?board,
                known = ?self.board,
                "Board size does not match the known board"
            );
            return None;
        }
        if let Some(missing) = self.corners.iter().position(|c| !self.is_corner(luminance, *c)) {
            trace!(missing, "Corner pattern not found");
            return None;
        }
        Some(self.corners.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::{ColorImageFormat, SyntheticScene};

    fn frame(scene: &SyntheticScene, format: ColorImageFormat) -> ColorBuffer {
        ColorBuffer {
            format,
            data: scene.render_color(format),
            frame_number: 1,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_luminance_of_gray_frame() {
        let format = ColorImageFormat::new(2, 1, ColorLayout::Bgra);
        let color = ColorBuffer {
            format,
            data: vec![90, 90, 90, 255, 200, 200, 200, 255],
            frame_number: 0,
            timestamp_ms: 0,
        };
        let gray = luminance(&color).unwrap();
        assert_eq!(gray.dimensions(), (2, 1));
        assert_eq!(gray.get_pixel(0, 0).0[0], 90);
        assert_eq!(gray.get_pixel(1, 0).0[0], 200);
    }

    #[test]
    fn test_detects_visible_board() {
        let format = ColorImageFormat::new(640, 480, ColorLayout::Bgra);
        let scene = SyntheticScene::default();
        let detector = scene.detector(format);
        let gray = luminance(&frame(&scene, format)).unwrap();
        let corners = detector.find_corners(&gray, scene.board).unwrap();
        assert_eq!(corners.len(), 70);
    }

    #[test]
    fn test_hidden_board_not_found() {
        let format = ColorImageFormat::new(640, 480, ColorLayout::Bgra);
        let scene = SyntheticScene {
            board_visible: false,
            ..SyntheticScene::default()
        };
        let detector = scene.detector(format);
        let gray = luminance(&frame(&scene, format)).unwrap();
        assert!(detector.find_corners(&gray, scene.board).is_none());
    }

    #[test]
    fn test_wrong_board_size_not_found() {
        let format = ColorImageFormat::new(640, 480, ColorLayout::Bgra);
        let scene = SyntheticScene::default();
        let gray = luminance(&frame(&scene, format)).unwrap();
        assert!(scene
            .detector(format)
            .find_corners(&gray, CalibrationBoard::new(9, 6))
            .is_none());
    }
}
