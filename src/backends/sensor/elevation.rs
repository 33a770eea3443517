// SPDX-License-Identifier: GPL-3.0-only

//! Elevation (tilt) motor mapping
//!
//! The configuration stores elevation as a normalized 0..1 value so it stays
//! meaningful across sensors with different motor ranges.

use tracing::debug;

/// Map a normalized elevation onto a sensor's `[min, max]` degree range.
///
/// Values outside 0..1 are clamped to the range ends.
pub fn normalized_to_degrees(normalized: f64, min_degrees: i32, max_degrees: i32) -> i32 {
    let (lo, hi) = if min_degrees <= max_degrees {
        (min_degrees, max_degrees)
    } else {
        (max_degrees, min_degrees)
    };
    let t = if normalized.is_finite() {
        normalized.clamp(0.0, 1.0)
    } else {
        0.5
    };
    let degrees = lo as f64 + t * (hi - lo) as f64;
    let degrees = (degrees.round() as i32).clamp(lo, hi);
    debug!(normalized, degrees, "Mapped elevation");
    degrees
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevation_mapping() {
        assert_eq!(normalized_to_degrees(0.0, -27, 27), -27);
        assert_eq!(normalized_to_degrees(0.5, -27, 27), 0);
        assert_eq!(normalized_to_degrees(1.0, -27, 27), 27);
    }

    #[test]
    fn test_elevation_clamps() {
        assert_eq!(normalized_to_degrees(-3.0, -27, 27), -27);
        assert_eq!(normalized_to_degrees(7.5, -27, 27), 27);
        assert_eq!(normalized_to_degrees(f64::NAN, -27, 27), 0);
    }
}
