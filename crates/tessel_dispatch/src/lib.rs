//! Tessel Dispatch Layer
//!
//! A pool of worker tasks that run grid geometry, topology and backend
//! requests off the caller's path. Each worker owns its own geometry
//! manager; requests and responses are closed enums and every reply is
//! checked at the dispatch boundary.

pub mod dispatcher;
pub mod protocol;
pub mod readiness;
mod worker;

use tessel_core::ConfigError;
use tessel_services::BackendError;
use thiserror::Error;

pub use dispatcher::{batch_ranges, Dispatcher};
pub use protocol::{WorkerRequest, WorkerResponse};
pub use readiness::{wait_until_ready, ReadinessError, ReadinessPolicy};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("worker {worker} is gone")]
    WorkerGone { worker: usize },

    #[error("{request} request answered with a {response} response")]
    UnexpectedResponse {
        request: &'static str,
        response: &'static str,
    },

    #[error("worker task failed: {0}")]
    TaskFailed(String),

    #[error("worker has no grid manager; broadcast a context first")]
    NoManager,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
