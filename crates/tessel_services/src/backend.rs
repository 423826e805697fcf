//! Authoritative grid backend boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessel_core::CellBatch;
use thiserror::Error;

use crate::schema::SchemaError;

/// Which backend endpoint a request goes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    #[default]
    Local,
    Remote,
}

/// Outcome of a save request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveInfo {
    pub success: bool,
    pub message: String,
    pub active: usize,
    pub deleted: usize,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("unknown cell {level}-{global_id}")]
    UnknownCell { level: u8, global_id: u32 },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("unknown feature '{0}'")]
    UnknownFeature(String),

    #[error("unknown schema '{0}'")]
    UnknownSchema(String),

    #[error("unknown patch '{patch}' in schema '{schema}'")]
    UnknownPatch { schema: String, patch: String },

    #[error("'{0}' already exists")]
    Conflict(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Authoritative store of the active cell set. Cells cross the boundary as
/// parallel `(level, global_id)` arrays.
#[async_trait]
pub trait GridBackend: Send + Sync {
    /// Every active cell with its deleted flag.
    async fn active_cells(&self, route: Route) -> Result<CellBatch, BackendError>;

    /// Replaces each cell by its children and returns the children.
    async fn subdivide(&self, cells: &CellBatch, route: Route) -> Result<CellBatch, BackendError>;

    /// Replaces the children of each cell's parent by the parent and
    /// returns the distinct parents.
    async fn merge(&self, cells: &CellBatch, route: Route) -> Result<CellBatch, BackendError>;

    async fn mark_deleted(&self, cells: &CellBatch, route: Route) -> Result<(), BackendError>;

    async fn recover(&self, cells: &CellBatch, route: Route) -> Result<(), BackendError>;

    /// Active cells intersecting the feature stored at `path`.
    async fn cells_by_feature(&self, path: &str, route: Route) -> Result<CellBatch, BackendError>;

    async fn save(&self, route: Route) -> Result<SaveInfo, BackendError>;
}
