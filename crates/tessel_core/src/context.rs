//! Grid context: the immutable per-session configuration.
//!
//! A context names the source and target coordinate systems, the domain
//! bounding box (in the source CRS) and the ordered subdivision rules.
//! It is exchanged as JSON:
//!
//! ```json
//! { "srcCrs": "EPSG:2326", "targetCrs": "EPSG:4326",
//!   "bbox": [808357.5, 824117.5, 838949.5, 843957.5],
//!   "rules": [[478, 310], [2, 2], [2, 2]] }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::level::LevelTable;
use crate::math::DVec2;
use crate::projection::{Crs, ProjectionError};

/// Errors raised while validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one subdivision rule is required")]
    MissingRules,

    #[error("subdivision rule {index} is [{sub_x}, {sub_y}]; both factors must be positive")]
    ZeroRule { index: usize, sub_x: u32, sub_y: u32 },

    #[error("{rules} subdivision rules exceed the {max} levels addressable by a u8 level")]
    TooManyLevels { rules: usize, max: usize },

    #[error("level {level} has {cells} cells, more than a u32 global id can address")]
    LevelTooLarge { level: usize, cells: u64 },

    #[error("bounding box [{min_x}, {min_y}, {max_x}, {max_y}] must be finite with min < max")]
    InvalidBoundingBox {
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    },

    #[error("'{value}' is not a CRS identifier of the form EPSG:<code>")]
    InvalidCrs { value: String },

    #[error("EPSG code {code} is outside 1024..=32767")]
    EpsgOutOfRange { code: u32 },

    #[error("render target {crs} must be a longitude/latitude system")]
    TargetNotGeographic { crs: Crs },

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error("invalid grid context JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// How a level-`i` cell splits into level-`i + 1` cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct SubdivideRule {
    pub sub_x: u32,
    pub sub_y: u32,
}

impl SubdivideRule {
    pub const fn new(sub_x: u32, sub_y: u32) -> Self {
        Self { sub_x, sub_y }
    }

    /// Children per parent cell.
    #[inline]
    pub fn child_count(&self) -> u32 {
        self.sub_x * self.sub_y
    }
}

impl From<[u32; 2]> for SubdivideRule {
    fn from([sub_x, sub_y]: [u32; 2]) -> Self {
        Self { sub_x, sub_y }
    }
}

impl From<SubdivideRule> for [u32; 2] {
    fn from(rule: SubdivideRule) -> Self {
        [rule.sub_x, rule.sub_y]
    }
}

/// Axis-aligned rectangle `[min_x, min_y, max_x, max_y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub min: DVec2,
    pub max: DVec2,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min: DVec2::new(min_x, min_y),
            max: DVec2::new(max_x, max_y),
        }
    }

    pub fn size(&self) -> DVec2 {
        self.max - self.min
    }

    pub fn center(&self) -> DVec2 {
        (self.min + self.max) * 0.5
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min.x < self.max.x && self.min.y < self.max.y
    }

    /// Strict overlap test; rectangles that only touch do not intersect.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min.x < other.max.x && other.min.x < self.max.x && self.min.y < other.max.y && other.min.y < self.max.y
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ConfigError::InvalidBoundingBox {
                min_x: self.min.x,
                min_y: self.min.y,
                max_x: self.max.x,
                max_y: self.max.y,
            })
        }
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([min_x, min_y, max_x, max_y]: [f64; 4]) -> Self {
        Self::new(min_x, min_y, max_x, max_y)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(bbox: BoundingBox) -> Self {
        [bbox.min.x, bbox.min.y, bbox.max.x, bbox.max.y]
    }
}

/// Immutable per-session grid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridContext {
    pub src_crs: Crs,
    pub target_crs: Crs,
    pub bbox: BoundingBox,
    pub rules: Vec<SubdivideRule>,
}

impl GridContext {
    /// Builds and validates a context.
    pub fn new(
        src_crs: Crs,
        target_crs: Crs,
        bbox: BoundingBox,
        rules: Vec<SubdivideRule>,
    ) -> Result<Self, ConfigError> {
        let context = Self {
            src_crs,
            target_crs,
            bbox,
            rules,
        };
        context.validate()?;
        Ok(context)
    }

    /// Parses and validates a context from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let context: Self = serde_json::from_str(json)?;
        context.validate()?;
        Ok(context)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bbox.validate()?;
        LevelTable::try_new(&self.rules)?;
        Ok(())
    }

    /// Builds the level table for this context.
    pub fn level_table(&self) -> Result<LevelTable, ConfigError> {
        LevelTable::try_new(&self.rules)
    }

    /// `EPSG:0` contexts use abstract unit-square geometry.
    pub fn is_abstract(&self) -> bool {
        self.src_crs.is_abstract()
    }
}
