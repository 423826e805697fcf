//! Tessel Editor
//!
//! Caller-side grid state: the flat cell cache and its hash index, kept in
//! step with an authoritative backend, with render data computed on the
//! worker pool.

pub mod error;
pub mod grid;
pub mod info;
pub mod session;

pub use error::GridError;
pub use grid::{AbortHandle, GridCore, GridOptions};
pub use info::{CellBaseInfo, MergeOutcome};
pub use session::{patch_context, EditorSession, MergeApplied, SubdivideApplied};
