//! Grid core: the caller-side cell cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tessel_core::{
    CellBatch, CellCache, CellCheck, CellKey, Compaction, GridContext, LevelTable, SlotMove, TopologyInfo,
};
use tessel_dispatch::{Dispatcher, WorkerRequest};
use tessel_services::{GridBackend, Route, SaveInfo, Settings};
use tracing::{debug, info, warn};

use crate::error::GridError;
use crate::info::{CellBaseInfo, MergeOutcome};

#[derive(Debug, Clone, Copy)]
pub struct GridOptions {
    pub workers: usize,
    pub max_cells: usize,
    /// Cells per vertex batch; each batch is itself split across workers.
    pub vertex_batch: usize,
    pub route: Route,
}

impl GridOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            workers: settings.worker_count(),
            max_cells: settings.cache.max_cells,
            vertex_batch: settings.cache.vertex_batch,
            route: settings.backend.route,
        }
    }
}

impl Default for GridOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Invalidates the cache epoch of a [`GridCore`]. An operation whose epoch
/// changed before it commits fails with [`GridError::Aborted`] and leaves the
/// cache untouched.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    epoch: Arc<AtomicU64>,
}

impl AbortHandle {
    pub fn abort(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(epoch, "grid operations aborted");
    }
}

pub struct GridCore {
    context: GridContext,
    levels: LevelTable,
    options: GridOptions,
    cache: CellCache,
    dispatcher: Dispatcher,
    epoch: Arc<AtomicU64>,
}

impl GridCore {
    /// Spawns the worker pool. Must be called from within a Tokio runtime.
    pub fn new(context: GridContext, backend: Arc<dyn GridBackend>, options: GridOptions) -> Result<Self, GridError> {
        let levels = context.level_table()?;
        let dispatcher = Dispatcher::new(options.workers, backend);
        info!(
            src = %context.src_crs,
            target = %context.target_crs,
            levels = levels.len(),
            workers = dispatcher.worker_count(),
            "grid core created"
        );
        Ok(Self {
            context,
            levels,
            options,
            cache: CellCache::with_capacity(options.max_cells),
            dispatcher,
            epoch: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn context(&self) -> &GridContext {
        &self.context
    }

    pub fn levels(&self) -> &LevelTable {
        &self.levels
    }

    pub fn route(&self) -> Route {
        self.options.route
    }

    pub fn cache(&self) -> &CellCache {
        &self.cache
    }

    pub fn cell_count(&self) -> usize {
        self.cache.len()
    }

    pub fn max_level(&self) -> u8 {
        self.levels.max_level()
    }

    pub fn storage_id(&self, level: u8, global_id: u32) -> Option<u32> {
        self.cache.storage_id(CellKey::new(level, global_id))
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            epoch: Arc::clone(&self.epoch),
        }
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn check_epoch(&self, started: u64) -> Result<(), GridError> {
        let current = self.epoch();
        if current != started {
            warn!(started, current, "discarding aborted grid operation");
            return Err(GridError::Aborted { started, current });
        }
        Ok(())
    }

    /// Rejects backend batches that would not fit this grid's level table.
    fn check_batch(&self, cells: &CellBatch) -> Result<(), GridError> {
        cells.validate(self.levels.len()).map_err(|err| {
            warn!(cells = cells.len(), error = %err, "rejecting backend cells");
            GridError::MalformedBatch(err)
        })
    }

    fn keys_of(&self, storage_ids: &[u32]) -> CellBatch {
        CellBatch::from_keys(storage_ids.iter().map(|&id| self.cache.key(id)))
    }

    /// Rebuilds the cache from the backend's active cells.
    ///
    /// The context is broadcast to every worker first. The previous cache
    /// is kept until the new cells and their vertices are ready.
    pub async fn initialize(&mut self) -> Result<CellBaseInfo, GridError> {
        let started = self.epoch();
        let timer = Instant::now();

        self.dispatcher
            .broadcast(WorkerRequest::SetContext(self.context.clone()))
            .await?;
        let cells = self
            .dispatcher
            .dispatch_one(WorkerRequest::ActiveCells { route: self.route() })
            .await?
            .into_cells("active_cells")?;
        self.check_batch(&cells)?;

        if cells.len() > self.cache.capacity() {
            return Err(GridError::CapacityExceeded {
                requested: cells.len(),
                len: 0,
                capacity: self.cache.capacity(),
            });
        }
        let (vertices, vertices_low, degraded) = self.render(&cells, started).await?;
        self.check_epoch(started)?;

        // Built aside so a rejected batch leaves the previous cells in place.
        let mut cache = CellCache::with_capacity(self.cache.capacity());
        let range = cache.append(&cells)?;
        self.cache = cache;
        let info = CellBaseInfo::from_batch(range.start, cells, vertices, vertices_low, degraded);
        info!(
            cells = info.count,
            elapsed_ms = timer.elapsed().as_secs_f64() * 1000.0,
            batch_ms = self.dispatcher.average_batch_ms(),
            "grid initialized"
        );
        Ok(info)
    }

    /// Appends backend-provided cells to the cache and computes their render
    /// vertices. Cells without deleted flags are added undeleted.
    pub async fn append_cells(&mut self, cells: CellBatch) -> Result<CellBaseInfo, GridError> {
        let started = self.epoch();
        self.append_since(cells, started).await
    }

    pub(crate) async fn append_since(&mut self, cells: CellBatch, started: u64) -> Result<CellBaseInfo, GridError> {
        self.check_batch(&cells)?;
        self.cache.ensure_room(cells.len())?;
        let (vertices, vertices_low, degraded) = self.render(&cells, started).await?;
        self.check_epoch(started)?;
        self.commit(cells, vertices, vertices_low, degraded)
    }

    async fn render(&self, cells: &CellBatch, started: u64) -> Result<(Vec<f32>, Vec<f32>, Vec<u32>), GridError> {
        let total = cells.len();
        let mut high = vec![0.0f32; total * 8];
        let mut low = vec![0.0f32; total * 8];
        let mut degraded = Vec::new();

        let step = self.options.vertex_batch.max(1);
        for chunk_start in (0..total).step_by(step) {
            self.check_epoch(started)?;
            let chunk = cells.slice(chunk_start..(chunk_start + step).min(total));
            self.dispatcher
                .dispatch_batch(&chunk, WorkerRequest::RenderVertices, |offset, response| {
                    let part = response.into_vertices("render_vertices")?;
                    let base = chunk_start + offset;
                    part.write_corner_major(base, total, &mut high, &mut low);
                    degraded.extend(part.degraded.iter().map(|&i| base as u32 + i));
                    Ok(())
                })
                .await?;
        }
        Ok((high, low, degraded))
    }

    fn commit(
        &mut self,
        cells: CellBatch,
        vertices: Vec<f32>,
        vertices_low: Vec<f32>,
        degraded: Vec<u32>,
    ) -> Result<CellBaseInfo, GridError> {
        let range = self.cache.append(&cells)?;
        Ok(CellBaseInfo::from_batch(range.start, cells, vertices, vertices_low, degraded))
    }

    /// Hard-removes cells from the cache, compacting the slot space.
    pub fn delete_cells_locally(&mut self, storage_ids: &[u32]) -> Compaction {
        self.cache.remove_many(storage_ids)
    }

    pub fn delete_cell_locally(&mut self, storage_id: u32) -> Option<SlotMove> {
        self.cache.remove_one(storage_id)
    }

    async fn set_deleted(&mut self, storage_ids: &[u32], deleted: bool) -> Result<(), GridError> {
        let cells = self.keys_of(storage_ids);
        let previous: Vec<bool> = storage_ids
            .iter()
            .map(|&id| self.cache.set_deleted(id, deleted))
            .collect();

        let request = if deleted {
            WorkerRequest::MarkDeleted { cells, route: self.route() }
        } else {
            WorkerRequest::Recover { cells, route: self.route() }
        };
        let name = request.name();
        let result = match self.dispatcher.dispatch_one(request).await {
            Ok(response) => response.into_ack(name),
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            // Reverse order so repeated ids end at their previous flag.
            for (&id, &flag) in storage_ids.iter().zip(&previous).rev() {
                self.cache.set_deleted(id, flag);
            }
            warn!(request = name, cells = storage_ids.len(), error = %err, "restored deleted flags");
            return Err(err.into());
        }
        debug!(request = name, cells = storage_ids.len(), "updated deleted flags");
        Ok(())
    }

    /// Soft-deletes cells locally and on the backend.
    pub async fn mark_cells_deleted(&mut self, storage_ids: &[u32]) -> Result<(), GridError> {
        self.set_deleted(storage_ids, true).await
    }

    pub async fn recover_cells(&mut self, storage_ids: &[u32]) -> Result<(), GridError> {
        self.set_deleted(storage_ids, false).await
    }

    /// Subdivides cells on the backend and appends the children. The parents
    /// stay cached until removed with [`delete_cells_locally`](Self::delete_cells_locally).
    pub async fn subdivide_cells(&mut self, cells: &CellBatch) -> Result<CellBaseInfo, GridError> {
        let started = self.epoch();
        let mut children = self
            .dispatcher
            .dispatch_one(WorkerRequest::Subdivide {
                cells: cells.clone(),
                route: self.route(),
            })
            .await?
            .into_cells("subdivide")?;
        children.deleted = None;
        debug!(parents = cells.len(), children = children.len(), "subdivided on backend");
        self.append_since(children, started).await
    }

    /// Merges cells on the backend. The cache is not changed.
    pub async fn merge_cells(&mut self, storage_ids: &[u32]) -> Result<MergeOutcome, GridError> {
        let cells = self.keys_of(storage_ids);
        let parents = self
            .dispatcher
            .dispatch_one(WorkerRequest::Merge {
                cells,
                route: self.route(),
            })
            .await?
            .into_cells("merge")?;
        self.check_batch(&parents)?;

        let mut child_storage_ids = Vec::new();
        for parent in parents.keys() {
            let Some(children) = self.levels.children(parent.level(), parent.global_id()) else {
                continue;
            };
            for child in children {
                match self.storage_id(parent.level() + 1, child) {
                    Some(id) => child_storage_ids.push(id),
                    None => warn!(%parent, child, "merged child is not cached"),
                }
            }
        }
        Ok(MergeOutcome {
            child_storage_ids,
            parents,
        })
    }

    /// Storage ids of the cached cells intersecting a backend feature.
    pub async fn cells_by_feature(&self, path: &str) -> Result<Vec<u32>, GridError> {
        let cells = self
            .dispatcher
            .dispatch_one(WorkerRequest::CellsByFeature {
                path: path.to_string(),
                route: self.route(),
            })
            .await?
            .into_cells("cells_by_feature")?;

        Ok(cells
            .keys()
            .filter_map(|key| {
                let id = self.cache.storage_id(key);
                if id.is_none() {
                    warn!(%key, "feature cell is not cached");
                }
                id
            })
            .collect())
    }

    /// Panics if `storage_id` is not live.
    pub fn check_cell(&self, storage_id: u32) -> CellCheck {
        let key = self.cache.key(storage_id);
        CellCheck {
            storage_id,
            level: key.level(),
            global_id: key.global_id(),
            local_id: self.levels.local_id(key.level(), key.global_id()),
            deleted: self.cache.is_deleted(storage_id),
        }
    }

    pub fn cell_children(&self, level: u8, global_id: u32) -> Option<Vec<u32>> {
        self.levels.children(level, global_id)
    }

    pub async fn save(&self) -> Result<SaveInfo, GridError> {
        Ok(self
            .dispatcher
            .dispatch_one(WorkerRequest::Save { route: self.route() })
            .await?
            .into_saved("save")?)
    }

    /// Topology of the current cache, computed on a worker. Cell indices in
    /// the result are storage ids.
    pub async fn parse_topology(&self) -> Result<TopologyInfo, GridError> {
        let cells = self.cache.snapshot();
        Ok(self
            .dispatcher
            .dispatch_one(WorkerRequest::ParseTopology(cells))
            .await?
            .into_topology("parse_topology")?)
    }

    /// Stops the worker pool.
    pub async fn shutdown(self) {
        self.dispatcher.shutdown().await;
    }
}
