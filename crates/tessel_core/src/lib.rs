//! Tessel Core
//!
//! Contains the hierarchical grid engine:
//! - Level geometry and cell identity
//! - Hash index and flat struct-of-arrays cell cache
//! - Coordinate/geometry manager with projection support
//! - Shared-edge topology across mixed-resolution cells
//! - Patch bounds alignment onto a schema lattice

pub mod bounds;
pub mod cache;
pub mod cell;
pub mod context;
pub mod geometry;
pub mod index;
pub mod level;
pub mod math;
pub mod projection;
pub mod topology;

pub use glam;

pub use cache::{CacheError, CellCache, Compaction, SlotMove};
pub use cell::{BatchError, CellBatch, CellCheck, CellKey};
pub use context::{BoundingBox, ConfigError, GridContext, SubdivideRule};
pub use geometry::{CellCorners, GridManager, RenderQuad, StructuredVertices};
pub use index::CellIndex;
pub use level::{LevelInfo, LevelTable};
pub use projection::{Conversion, Crs, ProjectionError};
pub use topology::{Side, TopologyInfo};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
