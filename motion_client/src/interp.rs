//! Interpolation.
//!
//! The server moves things a whole tile at a time. Between two tiles the
//! client draws the entity at its old tile plus a pixel offset that grows with
//! elapsed time until the step commits.

use motion_shared::math::{Direction, Vec3, PIXELS_PER_Z};

/// Fraction of a step completed, clamped to $[0,1]$.
///
/// A zero-length step counts as complete.
pub fn progress(elapsed_ms: u64, duration_ms: u64) -> f32 {
    if duration_ms == 0 {
        return 1.0;
    }
    (elapsed_ms as f32 / duration_ms as f32).clamp(0.0, 1.0)
}

/// Pixel offset `progress` of the way through a one-tile step in `dir`
/// that changes height by `dz`.
///
/// Horizontal travel follows the per-direction stride table; vertical travel
/// is the Z delta scaled to pixels.
pub fn step_offset(dir: Direction, dz: i32, progress: f32) -> Vec3 {
    let (px, py) = dir.pixel_stride();
    let full = Vec3::new(px, py, dz as f32 * PIXELS_PER_Z);
    Vec3::ZERO.lerp(full, progress)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_clamps_and_handles_zero() {
        assert_eq!(progress(0, 500), 0.0);
        assert_eq!(progress(250, 500), 0.5);
        assert_eq!(progress(900, 500), 1.0);
        assert_eq!(progress(10, 0), 1.0);
    }

    #[test]
    fn east_halfway() {
        let off = step_offset(Direction::East, 0, 0.5);
        assert_eq!(off, Vec3::new(11.0, 11.0, 0.0));
    }

    #[test]
    fn diagonal_strides_use_full_width() {
        assert_eq!(step_offset(Direction::NorthEast, 0, 1.0), Vec3::new(44.0, 0.0, 0.0));
        assert_eq!(step_offset(Direction::NorthWest, 0, 0.25), Vec3::new(0.0, -11.0, 0.0));
    }

    #[test]
    fn climbing_scales_z() {
        let off = step_offset(Direction::South, 5, 0.5);
        assert_eq!(off.z, 10.0);
    }
}
