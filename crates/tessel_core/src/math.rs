//! Coordinate math
//!
//! Re-exports glam with the split-precision and Web-Mercator helpers used
//! by the render path.

use std::f64::consts::PI;

pub use glam::{DVec2, Vec2};

/// Linear interpolation between `a` and `b`.
#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// A double split into two single-precision parts: `high = f32(v)`,
/// `low = f32(v - high)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SplitF32 {
    pub high: f32,
    pub low: f32,
}

impl SplitF32 {
    #[inline]
    pub fn encode(value: f64) -> Self {
        let high = value as f32;
        let low = (value - high as f64) as f32;
        Self { high, low }
    }

    #[inline]
    pub fn decode(self) -> f64 {
        self.high as f64 + self.low as f64
    }

    /// Component-wise difference, used to express a vertex relative to the
    /// render centre.
    #[inline]
    pub fn relative_to(self, origin: SplitF32) -> SplitF32 {
        SplitF32 {
            high: self.high - origin.high,
            low: self.low - origin.low,
        }
    }
}

/// Normalised Web-Mercator coordinate of a lon/lat pair in degrees.
/// `(0, 0)` is the north-west corner of the world, `(1, 1)` the south-east.
#[inline]
pub fn mercator_from_lon_lat(lon_lat: DVec2) -> DVec2 {
    let x = (180.0 + lon_lat.x) / 360.0;
    let y = (180.0 - (180.0 / PI) * (PI / 4.0 + lon_lat.y * PI / 360.0).tan().ln()) / 360.0;
    DVec2::new(x, y)
}

/// Greatest common divisor.
#[inline]
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}
