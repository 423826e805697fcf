//! In-process grid backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use tessel_core::geometry::cell_corners;
use tessel_core::{BoundingBox, CellBatch, CellKey, ConfigError, GridContext, LevelTable};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backend::{BackendError, GridBackend, Route, SaveInfo};

#[derive(Default)]
struct State {
    // key -> deleted flag, ordered for deterministic listings
    cells: BTreeMap<CellKey, bool>,
    features: FxHashMap<String, BoundingBox>,
    saved: Option<CellBatch>,
}

/// Authoritative cell set kept in memory, seeded with every level-1 cell.
/// Features are rectangles in the context's source CRS.
pub struct MemoryBackend {
    levels: LevelTable,
    bbox: BoundingBox,
    state: Mutex<State>,
    offline: AtomicBool,
}

impl MemoryBackend {
    pub fn new(context: &GridContext) -> Result<Arc<Self>, ConfigError> {
        let levels = context.level_table()?;
        let mut state = State::default();
        if let Some(info) = levels.info(1) {
            for global_id in 0..info.cell_count() as u32 {
                state.cells.insert(CellKey::new(1, global_id), false);
            }
        }
        info!(cells = state.cells.len(), "seeded in-memory grid backend");
        Ok(Arc::new(Self {
            levels,
            bbox: context.bbox,
            state: Mutex::new(state),
            offline: AtomicBool::new(false),
        }))
    }

    /// While offline every request fails with [`BackendError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn add_feature(&self, path: impl Into<String>, bounds: BoundingBox) {
        self.state.lock().await.features.insert(path.into(), bounds);
    }

    /// Number of active cells, deleted ones included.
    pub async fn cell_count(&self) -> usize {
        self.state.lock().await.cells.len()
    }

    pub async fn contains(&self, key: CellKey) -> bool {
        self.state.lock().await.cells.contains_key(&key)
    }

    pub async fn is_deleted(&self, key: CellKey) -> Option<bool> {
        self.state.lock().await.cells.get(&key).copied()
    }

    /// Snapshot taken by the last successful save.
    pub async fn last_saved(&self) -> Option<CellBatch> {
        self.state.lock().await.saved.clone()
    }

    fn check_online(&self) -> Result<(), BackendError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable("in-memory backend is offline".into()))
        } else {
            Ok(())
        }
    }

    fn unknown(key: CellKey) -> BackendError {
        BackendError::UnknownCell {
            level: key.level(),
            global_id: key.global_id(),
        }
    }

    async fn set_flags(&self, cells: &CellBatch, deleted: bool) -> Result<(), BackendError> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        if let Some(key) = cells.keys().find(|key| !state.cells.contains_key(key)) {
            return Err(Self::unknown(key));
        }
        for key in cells.keys() {
            state.cells.insert(key, deleted);
        }
        Ok(())
    }
}

#[async_trait]
impl GridBackend for MemoryBackend {
    async fn active_cells(&self, route: Route) -> Result<CellBatch, BackendError> {
        self.check_online()?;
        let state = self.state.lock().await;
        let mut batch = CellBatch::from_keys(state.cells.keys().copied());
        batch.deleted = Some(state.cells.values().copied().collect());
        debug!(?route, cells = batch.len(), "listed active cells");
        Ok(batch)
    }

    async fn subdivide(&self, cells: &CellBatch, route: Route) -> Result<CellBatch, BackendError> {
        self.check_online()?;
        let mut state = self.state.lock().await;

        for key in cells.keys() {
            if !state.cells.contains_key(&key) {
                return Err(Self::unknown(key));
            }
            if self.levels.rule(key.level()).is_none() {
                return Err(BackendError::Rejected(format!(
                    "cell {key} is at the deepest level and cannot be subdivided"
                )));
            }
        }

        let mut children = CellBatch::new();
        for key in cells.keys() {
            if state.cells.remove(&key).is_none() {
                // listed twice in the request
                continue;
            }
            if let Some(iter) = self.levels.children_iter(key.level(), key.global_id()) {
                for (_, child) in iter {
                    state.cells.insert(CellKey::new(key.level() + 1, child), false);
                    children.push(key.level() + 1, child);
                }
            }
        }
        debug!(?route, parents = cells.len(), children = children.len(), "subdivided cells");
        Ok(children)
    }

    async fn merge(&self, cells: &CellBatch, route: Route) -> Result<CellBatch, BackendError> {
        self.check_online()?;
        let mut state = self.state.lock().await;

        let mut seen = FxHashSet::default();
        let mut parents = CellBatch::new();
        for key in cells.keys() {
            if !state.cells.contains_key(&key) {
                return Err(Self::unknown(key));
            }
            if key.level() <= 1 {
                return Err(BackendError::Rejected(format!(
                    "cell {key} has no mergeable parent"
                )));
            }
            let parent = CellKey::new(
                key.level() - 1,
                self.levels.parent_global_id(key.level(), key.global_id()),
            );
            if seen.insert(parent) {
                parents.push(parent.level(), parent.global_id());
            }
        }

        for parent in parents.keys() {
            let children = self
                .levels
                .children(parent.level(), parent.global_id())
                .unwrap_or_default();
            if let Some(missing) = children
                .iter()
                .map(|&child| CellKey::new(parent.level() + 1, child))
                .find(|child| !state.cells.contains_key(child))
            {
                return Err(BackendError::Rejected(format!(
                    "cannot merge into {parent}: child {missing} is not a leaf cell"
                )));
            }
        }

        for parent in parents.keys() {
            if let Some(children) = self.levels.children(parent.level(), parent.global_id()) {
                for child in children {
                    state.cells.remove(&CellKey::new(parent.level() + 1, child));
                }
            }
            state.cells.insert(parent, false);
        }
        debug!(?route, parents = parents.len(), "merged cells");
        Ok(parents)
    }

    async fn mark_deleted(&self, cells: &CellBatch, route: Route) -> Result<(), BackendError> {
        debug!(?route, cells = cells.len(), "marking cells deleted");
        self.set_flags(cells, true).await
    }

    async fn recover(&self, cells: &CellBatch, route: Route) -> Result<(), BackendError> {
        debug!(?route, cells = cells.len(), "recovering cells");
        self.set_flags(cells, false).await
    }

    async fn cells_by_feature(&self, path: &str, route: Route) -> Result<CellBatch, BackendError> {
        self.check_online()?;
        let state = self.state.lock().await;
        let feature = state
            .features
            .get(path)
            .ok_or_else(|| BackendError::UnknownFeature(path.to_string()))?;

        let hits = state.cells.keys().copied().filter(|key| {
            self.levels
                .info(key.level())
                .map(|info| cell_corners(&self.bbox, info, key.global_id()).to_bbox())
                .map_or(false, |cell| cell.intersects(feature))
        });
        let batch = CellBatch::from_keys(hits);
        debug!(?route, path, cells = batch.len(), "resolved feature cells");
        Ok(batch)
    }

    async fn save(&self, route: Route) -> Result<SaveInfo, BackendError> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        let deleted = state.cells.values().filter(|&&d| d).count();
        let active = state.cells.len() - deleted;

        let mut snapshot = CellBatch::from_keys(state.cells.keys().copied());
        snapshot.deleted = Some(state.cells.values().copied().collect());
        state.saved = Some(snapshot);

        info!(?route, active, deleted, "saved grid");
        Ok(SaveInfo {
            success: true,
            message: format!("saved {active} active and {deleted} deleted cells"),
            active,
            deleted,
        })
    }
}
