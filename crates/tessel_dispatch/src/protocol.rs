//! Worker request/response protocol.

use tessel_core::{CellBatch, GridContext, StructuredVertices, TopologyInfo};
use tessel_services::{Route, SaveInfo};

use crate::DispatchError;

/// Every operation a worker understands.
#[derive(Debug, Clone)]
pub enum WorkerRequest {
    /// Rebuild the worker's geometry manager.
    SetContext(GridContext),
    ActiveCells { route: Route },
    RenderVertices(CellBatch),
    ParseTopology(CellBatch),
    Subdivide { cells: CellBatch, route: Route },
    Merge { cells: CellBatch, route: Route },
    MarkDeleted { cells: CellBatch, route: Route },
    Recover { cells: CellBatch, route: Route },
    CellsByFeature { path: String, route: Route },
    Save { route: Route },
}

impl WorkerRequest {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerRequest::SetContext(_) => "set_context",
            WorkerRequest::ActiveCells { .. } => "active_cells",
            WorkerRequest::RenderVertices(_) => "render_vertices",
            WorkerRequest::ParseTopology(_) => "parse_topology",
            WorkerRequest::Subdivide { .. } => "subdivide",
            WorkerRequest::Merge { .. } => "merge",
            WorkerRequest::MarkDeleted { .. } => "mark_deleted",
            WorkerRequest::Recover { .. } => "recover",
            WorkerRequest::CellsByFeature { .. } => "cells_by_feature",
            WorkerRequest::Save { .. } => "save",
        }
    }
}

#[derive(Debug, Clone)]
pub enum WorkerResponse {
    Ack,
    Cells(CellBatch),
    Vertices(StructuredVertices),
    Topology(TopologyInfo),
    Saved(SaveInfo),
}

impl WorkerResponse {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerResponse::Ack => "ack",
            WorkerResponse::Cells(_) => "cells",
            WorkerResponse::Vertices(_) => "vertices",
            WorkerResponse::Topology(_) => "topology",
            WorkerResponse::Saved(_) => "saved",
        }
    }

    fn unexpected(self, request: &'static str) -> DispatchError {
        DispatchError::UnexpectedResponse {
            request,
            response: self.name(),
        }
    }

    pub fn into_ack(self, request: &'static str) -> Result<(), DispatchError> {
        match self {
            WorkerResponse::Ack => Ok(()),
            other => Err(other.unexpected(request)),
        }
    }

    pub fn into_cells(self, request: &'static str) -> Result<CellBatch, DispatchError> {
        match self {
            WorkerResponse::Cells(cells) => Ok(cells),
            other => Err(other.unexpected(request)),
        }
    }

    pub fn into_vertices(self, request: &'static str) -> Result<StructuredVertices, DispatchError> {
        match self {
            WorkerResponse::Vertices(vertices) => Ok(vertices),
            other => Err(other.unexpected(request)),
        }
    }

    pub fn into_topology(self, request: &'static str) -> Result<TopologyInfo, DispatchError> {
        match self {
            WorkerResponse::Topology(topology) => Ok(topology),
            other => Err(other.unexpected(request)),
        }
    }

    pub fn into_saved(self, request: &'static str) -> Result<SaveInfo, DispatchError> {
        match self {
            WorkerResponse::Saved(info) => Ok(info),
            other => Err(other.unexpected(request)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_response_is_an_error() {
        let err = WorkerResponse::Ack.into_cells("subdivide").unwrap_err();
        assert!(matches!(
            err,
            DispatchError::UnexpectedResponse {
                request: "subdivide",
                response: "ack"
            }
        ));
        assert!(WorkerResponse::Ack.into_ack("set_context").is_ok());
    }
}
