//! Worker pool with broadcast, round-robin and batched dispatch.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tessel_core::CellBatch;
use tessel_metrics::{BatchTimer, Counter};
use tessel_services::GridBackend;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::protocol::{WorkerRequest, WorkerResponse};
use crate::worker::{self, Envelope, WorkerHandle};
use crate::DispatchError;

type Pending = (usize, oneshot::Receiver<Result<WorkerResponse, DispatchError>>);

struct DispatchStats {
    requests: Counter,
    batches: BatchTimer,
}

/// Splits `len` items into contiguous worker slices.
///
/// Fewer items than workers go out as a single slice; otherwise each slice
/// holds `ceil(len / workers)` items and the last one may be shorter.
pub fn batch_ranges(len: usize, workers: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let actors = if len < workers { 1 } else { workers.max(1) };
    let size = len.div_ceil(actors);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

pub struct Dispatcher {
    workers: Vec<WorkerHandle>,
    cursor: AtomicUsize,
    stats: Mutex<DispatchStats>,
}

impl Dispatcher {
    /// Spawns `count` workers (at least one) on the current runtime.
    pub fn new(count: usize, backend: Arc<dyn GridBackend>) -> Self {
        let count = count.max(1);
        let workers = (0..count)
            .map(|id| worker::spawn(id, Arc::clone(&backend)))
            .collect();
        info!(workers = count, "dispatcher started");
        Self {
            workers,
            cursor: AtomicUsize::new(0),
            stats: Mutex::new(DispatchStats {
                requests: Counter::new(),
                batches: BatchTimer::new(64),
            }),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of requests of the given kind sent so far.
    pub fn request_count(&self, name: &str) -> usize {
        self.stats.lock().map(|stats| stats.requests.get(name)).unwrap_or(0)
    }

    pub fn average_batch_ms(&self) -> f64 {
        self.stats.lock().map(|stats| stats.batches.average_ms()).unwrap_or(0.0)
    }

    fn send(&self, index: usize, request: WorkerRequest) -> Result<Pending, DispatchError> {
        let handle = &self.workers[index];
        if let Ok(mut stats) = self.stats.lock() {
            stats.requests.increment(request.name(), 1);
        }
        let (reply, rx) = oneshot::channel();
        handle
            .tx
            .send(Envelope { request, reply })
            .map_err(|_| DispatchError::WorkerGone { worker: handle.id })?;
        Ok((handle.id, rx))
    }

    async fn receive((worker, rx): Pending) -> Result<WorkerResponse, DispatchError> {
        rx.await.map_err(|_| DispatchError::WorkerGone { worker })?
    }

    /// Sends the request to every worker and waits for all of them.
    pub async fn broadcast(&self, request: WorkerRequest) -> Result<(), DispatchError> {
        let name = request.name();
        let pending = (0..self.workers.len())
            .map(|index| self.send(index, request.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        for entry in pending {
            Self::receive(entry).await?.into_ack(name)?;
        }
        debug!(request = name, workers = self.workers.len(), "broadcast complete");
        Ok(())
    }

    /// Sends the request to the next worker in round-robin order.
    pub async fn dispatch_one(&self, request: WorkerRequest) -> Result<WorkerResponse, DispatchError> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let pending = self.send(index, request)?;
        Self::receive(pending).await
    }

    /// Splits `cells` across the pool, one slice per worker.
    ///
    /// `merge` receives each response with its slice offset, in slice order.
    /// Any slice failing fails the whole batch.
    pub async fn dispatch_batch<M, F>(
        &self,
        cells: &CellBatch,
        make_request: M,
        mut merge: F,
    ) -> Result<(), DispatchError>
    where
        M: Fn(CellBatch) -> WorkerRequest,
        F: FnMut(usize, WorkerResponse) -> Result<(), DispatchError>,
    {
        let ranges = batch_ranges(cells.len(), self.workers.len());
        if ranges.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        let mut pending = Vec::with_capacity(ranges.len());
        for (index, range) in ranges.iter().enumerate() {
            let request = make_request(cells.slice(range.clone()));
            pending.push((range.start, self.send(index, request)?));
        }

        let mut failure = None;
        for (offset, entry) in pending {
            let result = Self::receive(entry).await;
            if failure.is_some() {
                continue;
            }
            match result.and_then(|response| merge(offset, response)) {
                Ok(()) => {}
                Err(err) => {
                    warn!(offset, error = %err, "batch slice failed");
                    failure = Some(err);
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.batches.record(started.elapsed(), cells.len());
        }
        Ok(())
    }

    /// Closes every worker channel and waits for the tasks to finish.
    pub async fn shutdown(self) {
        let requests = self.stats.lock().map(|stats| stats.requests.total()).unwrap_or(0);
        for handle in self.workers {
            let WorkerHandle { id, tx, join } = handle;
            drop(tx);
            if let Err(err) = join.await {
                warn!(worker = id, error = %err, "worker did not stop cleanly");
            }
        }
        info!(requests, "dispatcher stopped");
    }
}
