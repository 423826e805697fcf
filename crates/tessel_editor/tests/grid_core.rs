use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tessel_core::{BatchError, BoundingBox, CellBatch, CellKey, Crs, GridContext, SubdivideRule};
use tessel_editor::{AbortHandle, EditorSession, GridCore, GridError, GridOptions};
use tessel_services::{BackendError, GridBackend, MemoryBackend, Route, SaveInfo, Settings};

// 3x2 level-1 cells over the unit square, 6x4 at level 2.
fn context() -> GridContext {
    GridContext::new(
        Crs::Abstract,
        Crs::Abstract,
        BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        vec![SubdivideRule::new(3, 2), SubdivideRule::new(2, 2)],
    )
    .unwrap()
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.workers.count = Some(2);
    settings
}

async fn open() -> (EditorSession, Arc<MemoryBackend>) {
    let backend = MemoryBackend::new(&context()).unwrap();
    let (session, info) = EditorSession::open(context(), backend.clone(), &settings())
        .await
        .unwrap();
    assert_eq!(info.count, 6);
    (session, backend)
}

#[tokio::test]
async fn initialize_loads_backend_cells() {
    let backend = MemoryBackend::new(&context()).unwrap();
    let mut core = GridCore::new(context(), backend, GridOptions::from_settings(&settings())).unwrap();
    let info = core.initialize().await.unwrap();

    assert_eq!(info.base_storage_id, 0);
    assert_eq!(info.levels, vec![1; 6]);
    assert_eq!(info.global_ids, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(info.vertices.len(), 48);
    assert_eq!(info.vertices_low.len(), 48);
    assert_eq!(info.deleted, vec![false; 6]);
    assert!(info.degraded.is_empty());
    assert!(core.cache().is_consistent());

    // Abstract geometry is relative to the unit-square centre.
    let tl = info.corner(0, 0);
    let tl_low = [info.vertices_low[0], info.vertices_low[1]];
    assert!((tl[0] + tl_low[0] + 0.5).abs() < 1e-6);

    // A second initialize starts from an empty cache again.
    let again = core.initialize().await.unwrap();
    assert_eq!(again.base_storage_id, 0);
    assert_eq!(core.cell_count(), 6);
    core.shutdown().await;
}

#[tokio::test]
async fn small_vertex_batches_match_a_single_batch() {
    let backend = MemoryBackend::new(&context()).unwrap();
    let mut options = GridOptions::from_settings(&settings());
    let mut whole = GridCore::new(context(), backend.clone(), options).unwrap();
    options.vertex_batch = 4;
    let mut split = GridCore::new(context(), backend, options).unwrap();

    let a = whole.initialize().await.unwrap();
    let b = split.initialize().await.unwrap();
    assert_eq!(a.vertices, b.vertices);
    assert_eq!(a.vertices_low, b.vertices_low);
}

#[tokio::test]
async fn capacity_is_enforced_before_commit() {
    let backend = MemoryBackend::new(&context()).unwrap();
    let mut settings = settings();
    settings.cache.max_cells = 4;
    let mut core = GridCore::new(context(), backend, GridOptions::from_settings(&settings)).unwrap();

    let err = core.initialize().await.unwrap_err();
    assert!(matches!(
        err,
        GridError::CapacityExceeded {
            requested: 6,
            capacity: 4,
            ..
        }
    ));
    assert_eq!(core.cell_count(), 0);
}

#[tokio::test]
async fn local_delete_refills_from_the_tail() {
    let (mut session, backend) = open().await;
    let core = session.core_mut();

    let compaction = core.delete_cells_locally(&[2, 5]);
    assert_eq!(compaction.replaced, vec![4]);
    assert_eq!(compaction.removed, vec![2]);
    assert_eq!(core.cache().next_storage_id(), 4);
    assert_eq!(core.storage_id(1, 4), Some(2));
    assert_eq!(core.storage_id(1, 2), None);
    assert!(core.cache().is_consistent());

    let moved = core.delete_cell_locally(0).unwrap();
    assert_eq!((moved.from, moved.to), (3, 0));
    assert_eq!(core.delete_cell_locally(10), None);

    // Local removal never reaches the backend.
    assert_eq!(backend.cell_count().await, 6);
}

#[tokio::test]
async fn check_cell_and_children() {
    let (session, _) = open().await;
    let core = session.core();

    let check = core.check_cell(5);
    assert_eq!((check.level, check.global_id, check.local_id), (1, 5, 5));
    assert!(!check.deleted);

    assert_eq!(core.cell_children(0, 0), Some(vec![0, 1, 2, 3, 4, 5]));
    assert_eq!(core.cell_children(1, 0), Some(vec![0, 1, 6, 7]));
    assert_eq!(core.cell_children(2, 0), None);
    assert_eq!(core.cell_children(9, 0), None);
}

#[tokio::test]
async fn soft_delete_restores_flags_when_backend_fails() {
    let (mut session, backend) = open().await;

    backend.set_offline(true);
    let err = session.core_mut().mark_cells_deleted(&[1, 3]).await.unwrap_err();
    assert!(matches!(err, GridError::Backend(BackendError::Unavailable(_))));
    assert!(!session.core().cache().is_deleted(1));
    assert!(!session.core().cache().is_deleted(3));

    backend.set_offline(false);
    session.core_mut().mark_cells_deleted(&[1, 3]).await.unwrap();
    assert!(session.core().cache().is_deleted(1));
    assert_eq!(backend.is_deleted(CellKey::new(1, 3)).await, Some(true));
    assert_eq!(session.core().cell_count(), 6);

    session.core_mut().recover_cells(&[3]).await.unwrap();
    assert!(!session.core().cache().is_deleted(3));
    assert_eq!(backend.is_deleted(CellKey::new(1, 3)).await, Some(false));
}

#[tokio::test]
async fn subdivide_then_merge_round_trips() {
    let (mut session, backend) = open().await;

    let applied = session.subdivide(&[0]).await.unwrap();
    assert_eq!(applied.children.base_storage_id, 6);
    assert_eq!(applied.children.global_ids, vec![0, 1, 6, 7]);
    assert_eq!(applied.children.levels, vec![2; 4]);
    assert_eq!(applied.removed.replaced, vec![9]);
    assert_eq!(applied.removed.removed, vec![0]);
    assert_eq!(session.core().cell_count(), 9);
    assert_eq!(session.core().storage_id(2, 7), Some(0));
    assert!(session.core().cache().is_consistent());
    assert_eq!(backend.cell_count().await, 9);

    let child = session.core().storage_id(2, 6).unwrap();
    let outcome = session.core_mut().merge_cells(&[child]).await.unwrap();
    assert_eq!(outcome.parents, CellBatch::from_parts(vec![1], vec![0]));
    let mut children = outcome.child_storage_ids.clone();
    children.sort_unstable();
    assert_eq!(children, vec![0, 6, 7, 8]);
    // merge_cells alone leaves the cache as it was
    assert_eq!(session.core().cell_count(), 9);

    // The backend already merged; apply the same outcome locally.
    let parents = session.core_mut().append_cells(outcome.parents).await.unwrap();
    assert_eq!(parents.storage_ids(), 9..10);
    let removed = session.core_mut().delete_cells_locally(&outcome.child_storage_ids);
    assert_eq!(removed.replaced, vec![9]);
    assert_eq!(removed.removed, vec![0]);
    assert_eq!(session.core().storage_id(1, 0), Some(0));
    assert_eq!(session.core().cell_count(), 6);
    assert!(session.core().cache().is_consistent());
    assert_eq!(backend.cell_count().await, 6);
}

#[tokio::test]
async fn session_merge_applies_locally() {
    let (mut session, backend) = open().await;
    session.subdivide(&[4]).await.unwrap();
    assert_eq!(session.core().cell_count(), 9);

    let child = session.core().storage_id(2, 14).unwrap();
    let applied = session.merge(&[child]).await.unwrap();
    assert_eq!(applied.parents.global_ids, vec![4]);
    assert_eq!(session.core().cell_count(), 6);
    assert!(session.core().storage_id(1, 4).is_some());
    assert_eq!(backend.cell_count().await, 6);
    session.close().await;
}

#[tokio::test]
async fn feature_query_resolves_storage_ids() {
    let (session, backend) = open().await;
    backend
        .add_feature("roads/1", BoundingBox::new(0.0, 0.0, 0.3, 0.3))
        .await;

    assert_eq!(session.core().cells_by_feature("roads/1").await.unwrap(), vec![0]);
    let err = session.core().cells_by_feature("missing").await.unwrap_err();
    assert!(matches!(err, GridError::Backend(BackendError::UnknownFeature(_))));
}

#[tokio::test]
async fn save_and_topology() {
    let (session, backend) = open().await;

    let saved = session.core().save().await.unwrap();
    assert!(saved.success);
    assert_eq!((saved.active, saved.deleted), (6, 0));
    assert_eq!(backend.last_saved().await.map(|cells| cells.len()), Some(6));

    // 3x2 cells: 9 horizontal and 8 vertical unit edges.
    let topology = session.core().parse_topology().await.unwrap();
    assert_eq!(topology.edge_count(), 17);
    assert_eq!(topology.cell_edges.len(), 6);
}

#[tokio::test]
async fn malformed_cells_are_rejected_before_the_cache() {
    let backend = MemoryBackend::new(&context()).unwrap();
    let mut core = GridCore::new(context(), backend, GridOptions::from_settings(&settings())).unwrap();
    core.initialize().await.unwrap();

    let err = core
        .append_cells(CellBatch::from_parts(vec![2, 3], vec![0, 0]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GridError::MalformedBatch(BatchError::UnknownLevel {
            row: 1,
            level: 3,
            level_count: 3,
        })
    ));

    let mut short = CellBatch::from_parts(vec![2, 2], vec![0, 1]);
    short.deleted = Some(vec![false]);
    let err = core.append_cells(short).await.unwrap_err();
    assert!(matches!(err, GridError::MalformedBatch(BatchError::LengthMismatch { .. })));

    assert_eq!(core.cell_count(), 6);
    assert!(core.cache().is_consistent());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    AbortOnSubdivide,
    AbortOnMerge,
    /// Every listing after the first repeats cell `1-0`.
    DuplicateOnReload,
    /// Every listing after the first carries a single deleted flag.
    ShortFlagsOnReload,
}

/// Delegates to a memory backend and injects one kind of fault.
struct FaultyBackend {
    inner: Arc<MemoryBackend>,
    handle: OnceLock<AbortHandle>,
    fault: Fault,
    listings: AtomicUsize,
}

impl FaultyBackend {
    fn new(fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(&context()).unwrap(),
            handle: OnceLock::new(),
            fault,
            listings: AtomicUsize::new(0),
        })
    }

    fn abort_if(&self, fault: Fault) {
        if self.fault == fault {
            if let Some(handle) = self.handle.get() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl GridBackend for FaultyBackend {
    async fn active_cells(&self, route: Route) -> Result<CellBatch, BackendError> {
        let mut cells = self.inner.active_cells(route).await?;
        if self.listings.fetch_add(1, Ordering::SeqCst) > 0 {
            match self.fault {
                Fault::DuplicateOnReload => cells.push(1, 0),
                Fault::ShortFlagsOnReload => cells.deleted = Some(vec![false]),
                _ => {}
            }
        }
        Ok(cells)
    }

    async fn subdivide(&self, cells: &CellBatch, route: Route) -> Result<CellBatch, BackendError> {
        let children = self.inner.subdivide(cells, route).await?;
        self.abort_if(Fault::AbortOnSubdivide);
        Ok(children)
    }

    async fn merge(&self, cells: &CellBatch, route: Route) -> Result<CellBatch, BackendError> {
        let parents = self.inner.merge(cells, route).await?;
        self.abort_if(Fault::AbortOnMerge);
        Ok(parents)
    }

    async fn mark_deleted(&self, cells: &CellBatch, route: Route) -> Result<(), BackendError> {
        self.inner.mark_deleted(cells, route).await
    }

    async fn recover(&self, cells: &CellBatch, route: Route) -> Result<(), BackendError> {
        self.inner.recover(cells, route).await
    }

    async fn cells_by_feature(&self, path: &str, route: Route) -> Result<CellBatch, BackendError> {
        self.inner.cells_by_feature(path, route).await
    }

    async fn save(&self, route: Route) -> Result<SaveInfo, BackendError> {
        self.inner.save(route).await
    }
}

#[tokio::test]
async fn aborted_subdivision_is_not_committed() {
    let backend = FaultyBackend::new(Fault::AbortOnSubdivide);
    let mut core = GridCore::new(context(), backend.clone(), GridOptions::from_settings(&settings())).unwrap();
    backend.handle.set(core.abort_handle()).unwrap();
    core.initialize().await.unwrap();

    let err = core
        .subdivide_cells(&CellBatch::from_parts(vec![1], vec![0]))
        .await
        .unwrap_err();
    assert!(matches!(err, GridError::Aborted { .. }));
    assert_eq!(core.cell_count(), 6);
    assert!(core.cache().is_consistent());

    // Later operations use the new epoch.
    let info = core.initialize().await.unwrap();
    assert_eq!(info.count, 9);
}

#[tokio::test]
async fn aborted_merge_keeps_the_children() {
    let backend = FaultyBackend::new(Fault::AbortOnMerge);
    let (mut session, _) = EditorSession::open(context(), backend.clone(), &settings())
        .await
        .unwrap();
    backend.handle.set(session.core().abort_handle()).unwrap();
    session.subdivide(&[4]).await.unwrap();
    assert_eq!(session.core().cell_count(), 9);

    let child = session.core().storage_id(2, 14).unwrap();
    let err = session.merge(&[child]).await.unwrap_err();
    assert!(matches!(err, GridError::Aborted { .. }));
    assert_eq!(session.core().cell_count(), 9);
    assert_eq!(session.core().storage_id(2, 14), Some(child));
    assert_eq!(session.core().storage_id(1, 4), None);
    assert!(session.core().cache().is_consistent());
    assert!(backend.inner.contains(CellKey::new(1, 4)).await);

    // Reloading picks up the backend's merged state.
    session.core_mut().initialize().await.unwrap();
    assert_eq!(session.core().cell_count(), 6);
    assert!(session.core().storage_id(1, 4).is_some());
}

#[tokio::test]
async fn failed_reload_keeps_the_previous_cells() {
    for fault in [Fault::DuplicateOnReload, Fault::ShortFlagsOnReload] {
        let backend = FaultyBackend::new(fault);
        let mut core = GridCore::new(context(), backend, GridOptions::from_settings(&settings())).unwrap();
        core.initialize().await.unwrap();
        core.delete_cells_locally(&[1]);

        let err = core.initialize().await.unwrap_err();
        match fault {
            Fault::DuplicateOnReload => {
                assert!(matches!(err, GridError::DuplicateCell { key } if key == CellKey::new(1, 0)))
            }
            _ => assert!(matches!(
                err,
                GridError::MalformedBatch(BatchError::LengthMismatch {
                    field: "deleted flags",
                    levels: 6,
                    actual: 1,
                })
            )),
        }
        assert_eq!(core.cell_count(), 5);
        assert_eq!(core.storage_id(1, 1), None);
        assert_eq!(core.storage_id(1, 5), Some(1));
        assert!(core.cache().is_consistent());
    }
}
