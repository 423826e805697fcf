//! Tessel Services Layer
//!
//! Collaborator boundaries for the grid engine: the authoritative grid
//! backend, the schema/patch store, and runtime settings. In-process
//! implementations back tests and the command-line tool.

pub mod backend;
pub mod memory;
pub mod schema;
pub mod settings;
pub mod store;

pub use backend::{BackendError, GridBackend, Route, SaveInfo};
pub use memory::MemoryBackend;
pub use schema::{GridSchema, PatchMeta, SchemaError};
pub use settings::{Settings, SettingsError};
pub use store::{MemoryStore, SchemaStore};
