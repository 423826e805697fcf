use tessel_core::{BatchError, CacheError, CellKey, ConfigError};
use tessel_dispatch::{DispatchError, ReadinessError};
use tessel_services::{BackendError, SchemaError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Dispatch(DispatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    NotReady(#[from] ReadinessError),

    #[error("operation aborted (cache epoch {started} is now {current})")]
    Aborted { started: u64, current: u64 },

    #[error("cannot add {requested} cells: cache holds {len} of {capacity}")]
    CapacityExceeded {
        requested: usize,
        len: usize,
        capacity: usize,
    },

    #[error("cell {key} is already cached")]
    DuplicateCell { key: CellKey },

    #[error("malformed cell batch: {0}")]
    MalformedBatch(#[from] BatchError),
}

impl From<DispatchError> for GridError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Backend(err) => GridError::Backend(err),
            DispatchError::Config(err) => GridError::Config(err),
            other => GridError::Dispatch(other),
        }
    }
}

impl From<CacheError> for GridError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::CapacityExceeded {
                requested,
                len,
                capacity,
            } => GridError::CapacityExceeded {
                requested,
                len,
                capacity,
            },
            CacheError::DuplicateCell { key } => GridError::DuplicateCell { key },
            CacheError::Batch(err) => GridError::MalformedBatch(err),
        }
    }
}
