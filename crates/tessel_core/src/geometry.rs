//! Coordinate/geometry manager.
//!
//! Pure spatial math over the level table: parent/child/local ids, cell
//! corners in source space, and render vertices in split precision
//! relative to the domain centre. Each worker owns one manager.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cell::CellBatch;
use crate::context::{BoundingBox, ConfigError, GridContext};
use crate::level::{LevelInfo, LevelTable};
use crate::math::{lerp, mercator_from_lon_lat, DVec2, SplitF32};
use crate::projection::{Conversion, Projector};
use crate::topology::{self, TopologyInfo};

/// Corners of a cell in source coordinates, before projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellCorners {
    pub min: DVec2,
    pub max: DVec2,
}

impl CellCorners {
    pub fn top_left(&self) -> DVec2 {
        DVec2::new(self.min.x, self.max.y)
    }

    pub fn top_right(&self) -> DVec2 {
        self.max
    }

    pub fn bottom_left(&self) -> DVec2 {
        self.min
    }

    pub fn bottom_right(&self) -> DVec2 {
        DVec2::new(self.max.x, self.min.y)
    }

    /// TL, TR, BL, BR.
    pub fn render_order(&self) -> [DVec2; 4] {
        [self.top_left(), self.top_right(), self.bottom_left(), self.bottom_right()]
    }

    pub fn to_bbox(&self) -> BoundingBox {
        BoundingBox {
            min: self.min,
            max: self.max,
        }
    }
}

/// Source-space corners of `global_id` at a level of `info` inside `bbox`.
pub fn cell_corners(bbox: &BoundingBox, info: LevelInfo, global_id: u32) -> CellCorners {
    let (u, v) = info.uv(global_id);
    let (w, h) = (info.width as f64, info.height as f64);
    CellCorners {
        min: DVec2::new(
            lerp(bbox.min.x, bbox.max.x, u as f64 / w),
            lerp(bbox.min.y, bbox.max.y, v as f64 / h),
        ),
        max: DVec2::new(
            lerp(bbox.min.x, bbox.max.x, (u + 1) as f64 / w),
            lerp(bbox.min.y, bbox.max.y, (v + 1) as f64 / h),
        ),
    }
}

/// Render vertices of one cell: `x, y` pairs for TL, TR, BL, BR.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderQuad {
    pub high: [f32; 8],
    pub low: [f32; 8],
    pub degraded: bool,
}

/// Render vertices of many cells, one array per corner, two floats per cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredVertices {
    pub tl: Vec<f32>,
    pub tr: Vec<f32>,
    pub bl: Vec<f32>,
    pub br: Vec<f32>,
    pub tl_low: Vec<f32>,
    pub tr_low: Vec<f32>,
    pub bl_low: Vec<f32>,
    pub br_low: Vec<f32>,
    /// Positions (within this batch) of cells whose projection degraded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<u32>,
}

impl StructuredVertices {
    pub fn with_capacity(cells: usize) -> Self {
        let corner = || Vec::with_capacity(cells * 2);
        Self {
            tl: corner(),
            tr: corner(),
            bl: corner(),
            br: corner(),
            tl_low: corner(),
            tr_low: corner(),
            bl_low: corner(),
            br_low: corner(),
            degraded: Vec::new(),
        }
    }

    /// Number of cells described.
    pub fn len(&self) -> usize {
        self.tl.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.tl.is_empty()
    }

    pub fn push(&mut self, quad: &RenderQuad) {
        let index = self.len() as u32;
        self.tl.extend_from_slice(&quad.high[0..2]);
        self.tr.extend_from_slice(&quad.high[2..4]);
        self.bl.extend_from_slice(&quad.high[4..6]);
        self.br.extend_from_slice(&quad.high[6..8]);
        self.tl_low.extend_from_slice(&quad.low[0..2]);
        self.tr_low.extend_from_slice(&quad.low[2..4]);
        self.bl_low.extend_from_slice(&quad.low[4..6]);
        self.br_low.extend_from_slice(&quad.low[6..8]);
        if quad.degraded {
            self.degraded.push(index);
        }
    }

    /// Writes these cells into corner-major buffers describing `total`
    /// cells, starting at cell `offset`. Buffers hold `total * 8` floats:
    /// all TL pairs, then TR, BL, BR.
    ///
    /// Panics if the buffers are too small for `offset + self.len()` cells.
    pub fn write_corner_major(&self, offset: usize, total: usize, high: &mut [f32], low: &mut [f32]) {
        let n = self.len();
        let corners_high = [&self.tl, &self.tr, &self.bl, &self.br];
        let corners_low = [&self.tl_low, &self.tr_low, &self.bl_low, &self.br_low];
        for corner in 0..4 {
            let base = total * 2 * corner + offset * 2;
            high[base..base + n * 2].copy_from_slice(corners_high[corner]);
            low[base..base + n * 2].copy_from_slice(corners_low[corner]);
        }
    }

    /// Corner-major `(high, low)` buffers for this batch alone.
    pub fn to_corner_major(&self) -> (Vec<f32>, Vec<f32>) {
        let n = self.len();
        let mut high = vec![0.0; n * 8];
        let mut low = vec![0.0; n * 8];
        self.write_corner_major(0, n, &mut high, &mut low);
        (high, low)
    }
}

/// Spatial math for one grid context.
pub struct GridManager {
    context: GridContext,
    levels: LevelTable,
    // None for abstract (EPSG:0) contexts
    projector: Option<Projector>,
    render_center: [SplitF32; 2],
}

impl GridManager {
    pub fn new(context: GridContext) -> Result<Self, ConfigError> {
        context.validate()?;
        let levels = context.level_table()?;

        let (projector, render_center) = if context.is_abstract() {
            (None, [SplitF32::encode(0.5), SplitF32::encode(0.5)])
        } else {
            if !context.target_crs.is_geographic() {
                return Err(ConfigError::TargetNotGeographic {
                    crs: context.target_crs,
                });
            }
            let projector = Projector::new(context.src_crs, context.target_crs)?;
            let conversion = projector.convert(context.bbox.center());
            if conversion.is_degraded() {
                warn!(src = %context.src_crs, "domain centre could not be projected");
            }
            let center = mercator_from_lon_lat(conversion.point());
            (
                Some(projector),
                [SplitF32::encode(center.x), SplitF32::encode(center.y)],
            )
        };

        debug!(
            src = %context.src_crs,
            target = %context.target_crs,
            levels = levels.len(),
            "grid manager ready"
        );
        Ok(Self {
            context,
            levels,
            projector,
            render_center,
        })
    }

    pub fn context(&self) -> &GridContext {
        &self.context
    }

    pub fn levels(&self) -> &LevelTable {
        &self.levels
    }

    /// Render centre in split precision, `[x, y]`.
    pub fn render_center(&self) -> [SplitF32; 2] {
        self.render_center
    }

    pub fn parent_global_id(&self, level: u8, global_id: u32) -> u32 {
        self.levels.parent_global_id(level, global_id)
    }

    pub fn local_id(&self, level: u8, global_id: u32) -> u32 {
        self.levels.local_id(level, global_id)
    }

    pub fn children(&self, level: u8, global_id: u32) -> Option<Vec<u32>> {
        self.levels.children(level, global_id)
    }

    /// Source-space corners of a cell.
    ///
    /// Panics if `level` is not part of the level table.
    pub fn cell_corners(&self, level: u8, global_id: u32) -> CellCorners {
        let info = self.levels.infos()[level as usize];
        cell_corners(&self.context.bbox, info, global_id)
    }

    /// Render vertices of one cell relative to the render centre.
    pub fn render_vertices(&self, level: u8, global_id: u32) -> RenderQuad {
        let mut quad = RenderQuad::default();

        let points: [DVec2; 4] = match &self.projector {
            Some(projector) => {
                let corners = self.cell_corners(level, global_id).render_order();
                corners.map(|corner| match projector.convert(corner) {
                    Conversion::Exact(p) => mercator_from_lon_lat(p),
                    Conversion::Degraded(p) => {
                        quad.degraded = true;
                        mercator_from_lon_lat(p)
                    }
                })
            }
            None => {
                let info = self.levels.infos()[level as usize];
                let (u, v) = info.uv(global_id);
                let max_len = info.width.max(info.height) as f64;
                let min = DVec2::new(u as f64, v as f64) / max_len;
                let max = DVec2::new((u + 1) as f64, (v + 1) as f64) / max_len;
                CellCorners { min, max }.render_order()
            }
        };

        let [cx, cy] = self.render_center;
        for (i, point) in points.iter().enumerate() {
            let x = SplitF32::encode(point.x).relative_to(cx);
            let y = SplitF32::encode(point.y).relative_to(cy);
            quad.high[i * 2] = x.high;
            quad.high[i * 2 + 1] = y.high;
            quad.low[i * 2] = x.low;
            quad.low[i * 2 + 1] = y.low;
        }
        quad
    }

    /// Render vertices of a batch, one array per corner.
    pub fn structured_render_vertices(&self, cells: &CellBatch) -> StructuredVertices {
        let mut out = StructuredVertices::with_capacity(cells.len());
        for key in cells.keys() {
            out.push(&self.render_vertices(key.level(), key.global_id()));
        }
        if !out.degraded.is_empty() {
            warn!(degraded = out.degraded.len(), cells = cells.len(), "render vertices used unprojected coordinates");
        }
        out
    }

    /// Full adjacency/edge topology of `cells` (storage order).
    pub fn parse_topology(&self, cells: &CellBatch) -> TopologyInfo {
        topology::parse(&self.levels, cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SubdivideRule;
    use crate::projection::Crs;

    fn abstract_manager(bbox: [f64; 4], rules: &[[u32; 2]]) -> GridManager {
        let context = GridContext::new(
            Crs::Abstract,
            Crs::Abstract,
            BoundingBox::from(bbox),
            rules.iter().copied().map(SubdivideRule::from).collect(),
        )
        .unwrap();
        GridManager::new(context).unwrap()
    }

    #[test]
    fn scenario_cell_corners() {
        let manager = abstract_manager([0.0, 0.0, 100.0, 100.0], &[[10, 10]]);
        let corners = manager.cell_corners(1, 23);
        assert_eq!(corners.min, DVec2::new(30.0, 20.0));
        assert_eq!(corners.max, DVec2::new(40.0, 30.0));
        assert_eq!(manager.parent_global_id(1, 23), 0);
    }

    #[test]
    fn abstract_vertices_are_unit_square_relative_to_centre() {
        let manager = abstract_manager([0.0, 0.0, 100.0, 50.0], &[[2, 1]]);
        // Level 1 is 2 x 1, so max(w, h) = 2 and cell 1 spans x 0.5..1.0, y 0..0.5.
        let quad = manager.render_vertices(1, 1);
        let decode = |i: usize| quad.high[i] as f64 + quad.low[i] as f64 + 0.5;
        // TL
        assert!((decode(0) - 0.5).abs() < 1e-7);
        assert!((decode(1) - 0.5).abs() < 1e-7);
        // BR
        assert!((decode(6) - 1.0).abs() < 1e-7);
        assert!((decode(7) - 0.0).abs() < 1e-7);
        assert!(!quad.degraded);
    }

    #[test]
    fn structured_vertices_are_corner_major() {
        let manager = abstract_manager([0.0, 0.0, 1.0, 1.0], &[[2, 2]]);
        let cells = CellBatch::from_parts(vec![1, 1, 1], vec![0, 1, 3]);
        let structured = manager.structured_render_vertices(&cells);
        assert_eq!(structured.len(), 3);

        let (high, _low) = structured.to_corner_major();
        assert_eq!(high.len(), 24);
        for (i, key) in cells.keys().enumerate() {
            let quad = manager.render_vertices(key.level(), key.global_id());
            for corner in 0..4 {
                assert_eq!(high[3 * 2 * corner + i * 2], quad.high[corner * 2]);
                assert_eq!(high[3 * 2 * corner + i * 2 + 1], quad.high[corner * 2 + 1]);
            }
        }
    }

    #[test]
    fn projected_vertices_stay_near_centre() {
        let context = GridContext::new(
            Crs::Epsg(3857),
            Crs::WGS84,
            BoundingBox::new(-1000.0, -1000.0, 1000.0, 1000.0),
            vec![SubdivideRule::new(2, 2)],
        )
        .unwrap();
        let manager = GridManager::new(context).unwrap();
        let [cx, cy] = manager.render_center();
        assert!((cx.decode() - 0.5).abs() < 1e-6);
        assert!((cy.decode() - 0.5).abs() < 1e-6);

        let quad = manager.render_vertices(0, 0);
        assert!(!quad.degraded);
        // TL is west and north of the centre: negative x, negative mercator y.
        assert!(quad.high[0] < 0.0);
        assert!(quad.high[1] < 0.0);
        // BR is east and south.
        assert!(quad.high[6] > 0.0);
        assert!(quad.high[7] > 0.0);
    }

    #[test]
    fn rejects_projected_target() {
        let context = GridContext::new(
            Crs::Epsg(2326),
            Crs::Epsg(3857),
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            vec![SubdivideRule::new(2, 2)],
        )
        .unwrap();
        assert!(matches!(
            GridManager::new(context),
            Err(ConfigError::TargetNotGeographic { .. })
        ));
    }
}
