//! Render-ready results handed back to the caller.

use std::ops::Range;

use tessel_core::CellBatch;

/// Cells newly written to the cache, with their render vertices.
///
/// `vertices` and `vertices_low` are corner-major: all top-left `(x, y)`
/// pairs, then top-right, bottom-left and bottom-right, each block `count`
/// pairs long.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellBaseInfo {
    pub base_storage_id: u32,
    pub count: usize,
    pub levels: Vec<u8>,
    pub global_ids: Vec<u32>,
    pub vertices: Vec<f32>,
    pub vertices_low: Vec<f32>,
    pub deleted: Vec<bool>,
    /// Indices (into this result) of cells rendered from unprojected
    /// coordinates.
    pub degraded: Vec<u32>,
}

impl CellBaseInfo {
    /// Result for `cells` written from `base_storage_id` on.
    pub fn from_batch(
        base_storage_id: u32,
        cells: CellBatch,
        vertices: Vec<f32>,
        vertices_low: Vec<f32>,
        degraded: Vec<u32>,
    ) -> Self {
        let deleted = (0..cells.len()).map(|i| cells.is_deleted(i)).collect();
        Self {
            base_storage_id,
            count: cells.len(),
            levels: cells.levels,
            global_ids: cells.global_ids,
            vertices,
            vertices_low,
            deleted,
            degraded,
        }
    }

    pub fn storage_ids(&self) -> Range<u32> {
        self.base_storage_id..self.base_storage_id + self.count as u32
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn vertex_low_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices_low)
    }

    /// Deleted flags as one byte per cell.
    pub fn deleted_bytes(&self) -> Vec<u8> {
        self.deleted.iter().map(|&d| d as u8).collect()
    }

    /// High part of corner `corner` (0 = TL, 1 = TR, 2 = BL, 3 = BR) of cell `i`.
    pub fn corner(&self, i: usize, corner: usize) -> [f32; 2] {
        let base = self.count * 2 * corner + i * 2;
        [self.vertices[base], self.vertices[base + 1]]
    }
}

/// Result of a backend merge, resolved against the cache before any local
/// change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Pre-merge storage ids of every child of every parent.
    pub child_storage_ids: Vec<u32>,
    pub parents: CellBatch,
}
