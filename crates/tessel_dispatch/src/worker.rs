//! Worker task loop.

use std::sync::Arc;

use tessel_core::GridManager;
use tessel_services::GridBackend;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::protocol::{WorkerRequest, WorkerResponse};
use crate::DispatchError;

pub(crate) type Reply = oneshot::Sender<Result<WorkerResponse, DispatchError>>;

pub(crate) struct Envelope {
    pub request: WorkerRequest,
    pub reply: Reply,
}

pub(crate) struct WorkerHandle {
    pub id: usize,
    pub tx: mpsc::UnboundedSender<Envelope>,
    pub join: JoinHandle<()>,
}

/// Spawns a worker on the current Tokio runtime.
pub(crate) fn spawn(id: usize, backend: Arc<dyn GridBackend>) -> WorkerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let join = tokio::spawn(run(id, rx, backend));
    WorkerHandle { id, tx, join }
}

async fn run(id: usize, mut rx: mpsc::UnboundedReceiver<Envelope>, backend: Arc<dyn GridBackend>) {
    let mut manager: Option<Arc<GridManager>> = None;
    while let Some(Envelope { request, reply }) = rx.recv().await {
        let name = request.name();
        trace!(worker = id, request = name, "handling request");
        let result = handle(&mut manager, backend.as_ref(), request).await;
        // The caller may have given up on the reply.
        let _ = reply.send(result);
    }
    debug!(worker = id, "worker stopped");
}

fn current(manager: &Option<Arc<GridManager>>) -> Result<Arc<GridManager>, DispatchError> {
    manager.clone().ok_or(DispatchError::NoManager)
}

async fn blocking<F, R>(f: F) -> Result<R, DispatchError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| DispatchError::TaskFailed(err.to_string()))
}

async fn handle(
    manager: &mut Option<Arc<GridManager>>,
    backend: &dyn GridBackend,
    request: WorkerRequest,
) -> Result<WorkerResponse, DispatchError> {
    let response = match request {
        WorkerRequest::SetContext(context) => {
            *manager = Some(Arc::new(GridManager::new(context)?));
            WorkerResponse::Ack
        }
        WorkerRequest::RenderVertices(cells) => {
            let manager = current(manager)?;
            WorkerResponse::Vertices(blocking(move || manager.structured_render_vertices(&cells)).await?)
        }
        WorkerRequest::ParseTopology(cells) => {
            let manager = current(manager)?;
            WorkerResponse::Topology(blocking(move || manager.parse_topology(&cells)).await?)
        }
        WorkerRequest::ActiveCells { route } => WorkerResponse::Cells(backend.active_cells(route).await?),
        WorkerRequest::Subdivide { cells, route } => WorkerResponse::Cells(backend.subdivide(&cells, route).await?),
        WorkerRequest::Merge { cells, route } => WorkerResponse::Cells(backend.merge(&cells, route).await?),
        WorkerRequest::MarkDeleted { cells, route } => {
            backend.mark_deleted(&cells, route).await?;
            WorkerResponse::Ack
        }
        WorkerRequest::Recover { cells, route } => {
            backend.recover(&cells, route).await?;
            WorkerResponse::Ack
        }
        WorkerRequest::CellsByFeature { path, route } => {
            WorkerResponse::Cells(backend.cells_by_feature(&path, route).await?)
        }
        WorkerRequest::Save { route } => WorkerResponse::Saved(backend.save(route).await?),
    };
    Ok(response)
}
