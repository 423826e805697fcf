//! Editor session: one grid core plus its collaborators.

use std::sync::Arc;

use tessel_core::{CellBatch, Compaction, GridContext};
use tessel_dispatch::{wait_until_ready, ReadinessPolicy};
use tessel_services::{GridBackend, SchemaStore, Settings};
use tokio::sync::Notify;
use tracing::info;

use crate::error::GridError;
use crate::grid::{GridCore, GridOptions};
use crate::info::CellBaseInfo;

/// Subdivision applied to the cache. Apply `children` before `removed`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubdivideApplied {
    pub children: CellBaseInfo,
    pub removed: Compaction,
}

/// Merge applied to the cache. Apply `parents` before `removed`.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeApplied {
    pub parents: CellBaseInfo,
    pub removed: Compaction,
}

/// Builds the grid context of a stored patch.
pub async fn patch_context(store: &dyn SchemaStore, schema: &str, patch: &str) -> Result<GridContext, GridError> {
    let schema = store.schema(schema).await?;
    let patch = store.patch(&schema.name, patch).await?;
    Ok(patch.grid_context(&schema)?)
}

/// Owns the grid core for one editing session. Dropping the session drops
/// the worker pool; [`close`](Self::close) waits for it to stop.
pub struct EditorSession {
    core: GridCore,
}

impl EditorSession {
    /// Creates the core and loads the backend's cells.
    pub async fn open(
        context: GridContext,
        backend: Arc<dyn GridBackend>,
        settings: &Settings,
    ) -> Result<(Self, CellBaseInfo), GridError> {
        let mut core = GridCore::new(context, backend, GridOptions::from_settings(settings))?;
        let cells = core.initialize().await?;
        info!(cells = cells.count, "editor session opened");
        Ok((Self { core }, cells))
    }

    /// Like [`open`](Self::open), once `ready` reports true.
    pub async fn open_when_ready<P>(
        ready: P,
        notify: &Notify,
        policy: ReadinessPolicy,
        context: GridContext,
        backend: Arc<dyn GridBackend>,
        settings: &Settings,
    ) -> Result<(Self, CellBaseInfo), GridError>
    where
        P: Fn() -> bool,
    {
        wait_until_ready(ready, notify, policy).await?;
        Self::open(context, backend, settings).await
    }

    pub fn core(&self) -> &GridCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut GridCore {
        &mut self.core
    }

    /// Subdivides the given cells and drops the parents from the cache.
    pub async fn subdivide(&mut self, storage_ids: &[u32]) -> Result<SubdivideApplied, GridError> {
        let parents = CellBatch::from_keys(storage_ids.iter().map(|&id| self.core.cache().key(id)));
        let children = self.core.subdivide_cells(&parents).await?;

        let parent_ids: Vec<u32> = parents
            .keys()
            .filter_map(|key| self.core.cache().storage_id(key))
            .collect();
        let removed = self.core.delete_cells_locally(&parent_ids);
        Ok(SubdivideApplied { children, removed })
    }

    /// Merges the given cells into their parents and swaps them in the cache.
    /// The children stay cached if the parents cannot be added.
    pub async fn merge(&mut self, storage_ids: &[u32]) -> Result<MergeApplied, GridError> {
        let started = self.core.epoch();
        let outcome = self.core.merge_cells(storage_ids).await?;
        let parents = self.core.append_since(outcome.parents, started).await?;
        // Appending only adds slots, so the pre-merge child ids are still valid.
        let removed = self.core.delete_cells_locally(&outcome.child_storage_ids);
        Ok(MergeApplied { parents, removed })
    }

    pub async fn close(self) {
        self.core.shutdown().await;
        info!("editor session closed");
    }
}
