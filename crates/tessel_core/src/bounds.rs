//! Patch bounds alignment.
//!
//! Snaps a rectangle onto the lattice of level-1 cells anchored at a
//! schema base point. Alignment happens in a metric working CRS: Web
//! Mercator when the schema CRS is geographic, the schema CRS otherwise.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::context::BoundingBox;
use crate::math::DVec2;
use crate::projection::{Conversion, Crs, PointConverter};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoundsError {
    #[error("cell size [{width}, {height}] must be positive and finite")]
    InvalidCellSize { width: f64, height: f64 },

    #[error("rectangle [{min_x}, {min_y}, {max_x}, {max_y}] is malformed")]
    MalformedRectangle {
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    },

    #[error("a rectangle needs at least one point")]
    EmptyRing,
}

/// Corners and centre of a rectangle; corners may be skewed after
/// reprojection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RectangleCoordinates {
    pub north_east: DVec2,
    pub south_east: DVec2,
    pub south_west: DVec2,
    pub north_west: DVec2,
    pub center: DVec2,
}

impl RectangleCoordinates {
    /// Axis-aligned rectangle from its south-west corner and size.
    pub fn from_south_west(south_west: DVec2, size: DVec2) -> Self {
        Self {
            north_east: south_west + size,
            south_east: DVec2::new(south_west.x + size.x, south_west.y),
            south_west,
            north_west: DVec2::new(south_west.x, south_west.y + size.y),
            center: south_west + size * 0.5,
        }
    }

    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        Self::from_south_west(bbox.min, bbox.size())
    }

    /// Bounding rectangle of a drawn polygon ring.
    pub fn from_ring(points: &[DVec2]) -> Result<Self, BoundsError> {
        let first = *points.first().ok_or(BoundsError::EmptyRing)?;
        let (min, max) = points
            .iter()
            .fold((first, first), |(min, max), p| (min.min(*p), max.max(*p)));
        Ok(Self::from_south_west(min, max - min))
    }

    /// `[sw.x, sw.y, ne.x, ne.y]`.
    pub fn bounds(&self) -> [f64; 4] {
        [self.south_west.x, self.south_west.y, self.north_east.x, self.north_east.y]
    }

    /// Converts every point, reporting whether any conversion degraded.
    fn convert(&self, converter: &PointConverter) -> (Self, bool) {
        let mut degraded = false;
        let mut apply = |p: DVec2| {
            let conversion = converter.convert(p);
            degraded |= conversion.is_degraded();
            conversion.point()
        };
        let converted = Self {
            north_east: apply(self.north_east),
            south_east: apply(self.south_east),
            south_west: apply(self.south_west),
            north_west: apply(self.north_west),
            center: apply(self.center),
        };
        (converted, degraded)
    }
}

/// Result of [`align_bounds`]; every rectangle is in the schema CRS.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignedBounds {
    pub converted: RectangleCoordinates,
    pub aligned: RectangleCoordinates,
    pub expanded: RectangleCoordinates,
    /// The metric CRS alignment happened in.
    pub working_crs: Crs,
    /// The expanded rectangle in the working CRS.
    pub expanded_metric: RectangleCoordinates,
    /// True if any projection fell back to unconverted coordinates.
    pub degraded: bool,
}

/// Metric CRS used for alignment against `schema_crs`.
pub fn working_crs(schema_crs: Crs) -> Crs {
    if schema_crs.is_geographic() {
        Crs::WEB_MERCATOR
    } else {
        schema_crs
    }
}

/// Snaps `bounds` (in `from`) onto the lattice of `cell_size` cells anchored
/// at `base_point` (in `to`).
pub fn align_bounds(
    bounds: [f64; 4],
    cell_size: DVec2,
    from: Crs,
    to: Crs,
    base_point: DVec2,
) -> Result<AlignedBounds, BoundsError> {
    if !(cell_size.is_finite() && cell_size.x > 0.0 && cell_size.y > 0.0) {
        return Err(BoundsError::InvalidCellSize {
            width: cell_size.x,
            height: cell_size.y,
        });
    }
    let bbox = BoundingBox::from(bounds);
    if !bbox.is_valid() {
        return Err(BoundsError::MalformedRectangle {
            min_x: bounds[0],
            min_y: bounds[1],
            max_x: bounds[2],
            max_y: bounds[3],
        });
    }

    let (converted, mut degraded) = RectangleCoordinates::from_bbox(&bbox).convert(&PointConverter::new(from, to));

    let working = working_crs(to);
    let into_metric = PointConverter::new(to, working);
    let out_of_metric = PointConverter::new(working, to);

    let (metric, d) = converted.convert(&into_metric);
    degraded |= d;
    let base = into_metric.convert(base_point);
    degraded |= base.is_degraded();
    let base = base.point();

    let size = metric.north_east - metric.south_west;
    let delta = metric.south_west - base;
    let snapped = (delta / cell_size).floor() * cell_size;
    let offset = snapped - delta;
    let south_west = metric.south_west + offset;

    let aligned_metric = RectangleCoordinates::from_south_west(south_west, size);
    let expanded_size = (size / cell_size).ceil() * cell_size;
    let expanded_metric = RectangleCoordinates::from_south_west(south_west, expanded_size);

    let (aligned, d) = aligned_metric.convert(&out_of_metric);
    degraded |= d;
    let (expanded, d) = expanded_metric.convert(&out_of_metric);
    degraded |= d;

    debug!(%from, %to, %working, offset_x = offset.x, offset_y = offset.y, degraded, "aligned patch bounds");
    Ok(AlignedBounds {
        converted,
        aligned,
        expanded,
        working_crs: working,
        expanded_metric,
        degraded,
    })
}

/// Cells between a south-west corner and the base point, per axis:
/// `|delta / cell|`.
pub fn grid_counts(south_west: DVec2, base_point: DVec2, cell_size: DVec2) -> (f64, f64) {
    let counts = ((south_west - base_point) / cell_size).abs();
    (counts.x, counts.y)
}

/// Converts `[min_x, min_y, max_x, max_y]` to WGS84 by its two corners.
pub fn to_wgs84(bounds: [f64; 4], from: Crs) -> ([f64; 4], bool) {
    let converter = PointConverter::new(from, Crs::WGS84);
    let sw = converter.convert(DVec2::new(bounds[0], bounds[1]));
    let ne = converter.convert(DVec2::new(bounds[2], bounds[3]));
    let degraded = sw.is_degraded() || ne.is_degraded();
    let (sw, ne) = (sw.point(), ne.point());
    ([sw.x, sw.y, ne.x, ne.y], degraded)
}

/// Single-point conversion that never fails; see [`Conversion`].
pub fn convert_point(point: DVec2, from: Crs, to: Crs) -> Conversion {
    PointConverter::new(from, to).convert(point)
}
