//! Grid schemas and patches.
//!
//! A schema fixes the CRS, base point and per-level cell sizes of a family
//! of grids; `grid_info[0]` is the level-1 cell size and every further
//! level must evenly divide the previous one. A patch is a rectangle of a
//! schema with its own editable grid.

use serde::{Deserialize, Serialize};
use tessel_core::bounds::working_crs;
use tessel_core::glam::DVec2;
use tessel_core::projection::PointConverter;
use tessel_core::{BoundingBox, ConfigError, Crs, GridContext, SubdivideRule};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema name cannot be empty")]
    EmptyName,

    #[error("at least one grid level is required")]
    NoLevels,

    #[error("level {level}: width and height must be positive numbers")]
    NotPositive { level: usize },

    #[error("level {level}: width {width} must be smaller than the previous level ({previous})")]
    WidthNotSmaller { level: usize, width: f64, previous: f64 },

    #[error("level {level}: previous width ({previous}) must be a multiple of width {width}")]
    WidthNotMultiple { level: usize, width: f64, previous: f64 },

    #[error("level {level}: height {height} must be smaller than the previous level ({previous})")]
    HeightNotSmaller { level: usize, height: f64, previous: f64 },

    #[error("level {level}: previous height ({previous}) must be a multiple of height {height}")]
    HeightNotMultiple { level: usize, height: f64, previous: f64 },

    #[error("patch name cannot be empty")]
    EmptyPatchName,

    #[error("patch bounds {0:?} are malformed")]
    InvalidPatchBounds([f64; 4]),

    #[error("patch bounds are smaller than one level-1 cell")]
    PatchTooSmall,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Whether `previous` is a whole multiple of `current`, within rounding.
fn is_multiple(previous: f64, current: f64) -> bool {
    let ratio = previous / current;
    (ratio - ratio.round()).abs() <= 1e-9 * ratio.abs().max(1.0)
}

/// Every per-level problem of a list of `[width, height]` cell sizes.
pub fn grid_layer_errors(layers: &[[f64; 2]]) -> Vec<SchemaError> {
    let mut errors = Vec::new();
    for (level, &[width, height]) in layers.iter().enumerate() {
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            errors.push(SchemaError::NotPositive { level });
            continue;
        }
        let Some(&[prev_width, prev_height]) = level.checked_sub(1).and_then(|i| layers.get(i)) else {
            continue;
        };

        if width >= prev_width {
            errors.push(SchemaError::WidthNotSmaller { level, width, previous: prev_width });
        } else if !is_multiple(prev_width, width) {
            errors.push(SchemaError::WidthNotMultiple { level, width, previous: prev_width });
        }
        if height >= prev_height {
            errors.push(SchemaError::HeightNotSmaller { level, height, previous: prev_height });
        } else if !is_multiple(prev_height, height) {
            errors.push(SchemaError::HeightNotMultiple { level, height, previous: prev_height });
        }
    }
    errors
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSchema {
    pub name: String,
    /// EPSG code; 0 for abstract schemas.
    #[serde(default)]
    pub epsg: u32,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "basePoint")]
    pub base_point: Option<[f64; 2]>,
    /// Cell `[width, height]` per level, level 1 first.
    #[serde(alias = "gridInfo")]
    pub grid_info: Vec<[f64; 2]>,
}

impl GridSchema {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyName);
        }
        if self.grid_info.is_empty() {
            return Err(SchemaError::NoLevels);
        }
        Crs::from_code(self.epsg)?;
        match grid_layer_errors(&self.grid_info).into_iter().next() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn crs(&self) -> Result<Crs, ConfigError> {
        Crs::from_code(self.epsg)
    }

    pub fn base_point(&self) -> DVec2 {
        self.base_point.map_or(DVec2::ZERO, DVec2::from)
    }

    /// Level-1 cell size.
    pub fn cell_size(&self) -> Option<DVec2> {
        self.grid_info.first().map(|&size| DVec2::from(size))
    }

    /// Subdivision rules between consecutive schema levels.
    pub fn level_rules(&self) -> Vec<SubdivideRule> {
        self.grid_info
            .windows(2)
            .map(|pair| {
                SubdivideRule::new(
                    (pair[0][0] / pair[1][0]).round() as u32,
                    (pair[0][1] / pair[1][1]).round() as u32,
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchMeta {
    pub name: String,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub description: String,
    /// `[min_x, min_y, max_x, max_y]` in the schema CRS.
    pub bounds: [f64; 4],
}

impl PatchMeta {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyPatchName);
        }
        if !BoundingBox::from(self.bounds).is_valid() {
            return Err(SchemaError::InvalidPatchBounds(self.bounds));
        }
        Ok(())
    }

    /// Grid context for editing this patch of `schema`.
    ///
    /// Geographic schemas are laid out in Web Mercator so that cell sizes are
    /// metres. Rule 0 splits the patch into level-1 cells; the remaining
    /// rules follow the schema levels.
    pub fn grid_context(&self, schema: &GridSchema) -> Result<GridContext, SchemaError> {
        schema.validate()?;
        self.validate()?;

        let schema_crs = schema.crs()?;
        let (src_crs, target_crs) = if schema_crs.is_abstract() {
            (Crs::Abstract, Crs::Abstract)
        } else {
            (working_crs(schema_crs), Crs::WGS84)
        };

        let mut bbox = BoundingBox::from(self.bounds);
        if src_crs != schema_crs {
            let converter = PointConverter::new(schema_crs, src_crs);
            let min = converter.convert(bbox.min);
            let max = converter.convert(bbox.max);
            if min.is_degraded() || max.is_degraded() {
                warn!(patch = %self.name, "patch bounds kept in schema coordinates");
            }
            bbox = BoundingBox {
                min: min.point(),
                max: max.point(),
            };
        }

        let cell = schema.cell_size().ok_or(SchemaError::NoLevels)?;
        let counts = (bbox.size() / cell).round();
        if counts.x < 1.0 || counts.y < 1.0 {
            return Err(SchemaError::PatchTooSmall);
        }

        let mut rules = vec![SubdivideRule::new(counts.x as u32, counts.y as u32)];
        rules.extend(schema.level_rules());
        Ok(GridContext::new(src_crs, target_crs, bbox, rules)?)
    }
}
