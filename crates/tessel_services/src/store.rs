//! Schema and patch persistence boundary.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::BackendError;
use crate::schema::{GridSchema, PatchMeta};

#[async_trait]
pub trait SchemaStore: Send + Sync {
    async fn create_schema(&self, schema: GridSchema) -> Result<(), BackendError>;

    async fn schema(&self, name: &str) -> Result<GridSchema, BackendError>;

    async fn list_schemas(&self) -> Result<Vec<GridSchema>, BackendError>;

    async fn update_schema(&self, schema: GridSchema) -> Result<(), BackendError>;

    /// Deletes a schema together with its patches.
    async fn delete_schema(&self, name: &str) -> Result<(), BackendError>;

    async fn create_patch(&self, schema: &str, patch: PatchMeta) -> Result<(), BackendError>;

    async fn patch(&self, schema: &str, name: &str) -> Result<PatchMeta, BackendError>;

    async fn list_patches(&self, schema: &str) -> Result<Vec<PatchMeta>, BackendError>;

    async fn delete_patch(&self, schema: &str, name: &str) -> Result<(), BackendError>;

    /// Starred schemas, filtered from the full list by default.
    async fn starred_schemas(&self) -> Result<Vec<GridSchema>, BackendError> {
        let schemas = self.list_schemas().await?;
        Ok(schemas.into_iter().filter(|s| s.starred).collect())
    }
}

struct SchemaEntry {
    schema: GridSchema,
    patches: BTreeMap<String, PatchMeta>,
}

/// In-memory adapter for tests and the command-line tool.
#[derive(Default)]
pub struct MemoryStore {
    schemas: Mutex<BTreeMap<String, SchemaEntry>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

fn unknown_schema(name: &str) -> BackendError {
    BackendError::UnknownSchema(name.to_string())
}

#[async_trait]
impl SchemaStore for MemoryStore {
    async fn create_schema(&self, schema: GridSchema) -> Result<(), BackendError> {
        schema.validate()?;
        let mut guard = self.schemas.lock().await;
        if guard.contains_key(&schema.name) {
            return Err(BackendError::Conflict(schema.name));
        }
        debug!(name = %schema.name, "created schema");
        guard.insert(
            schema.name.clone(),
            SchemaEntry {
                schema,
                patches: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn schema(&self, name: &str) -> Result<GridSchema, BackendError> {
        let guard = self.schemas.lock().await;
        guard
            .get(name)
            .map(|entry| entry.schema.clone())
            .ok_or_else(|| unknown_schema(name))
    }

    async fn list_schemas(&self) -> Result<Vec<GridSchema>, BackendError> {
        let guard = self.schemas.lock().await;
        Ok(guard.values().map(|entry| entry.schema.clone()).collect())
    }

    async fn update_schema(&self, schema: GridSchema) -> Result<(), BackendError> {
        schema.validate()?;
        let mut guard = self.schemas.lock().await;
        let entry = guard
            .get_mut(&schema.name)
            .ok_or_else(|| unknown_schema(&schema.name))?;
        entry.schema = schema;
        Ok(())
    }

    async fn delete_schema(&self, name: &str) -> Result<(), BackendError> {
        let mut guard = self.schemas.lock().await;
        guard.remove(name).map(|_| ()).ok_or_else(|| unknown_schema(name))
    }

    async fn create_patch(&self, schema: &str, patch: PatchMeta) -> Result<(), BackendError> {
        patch.validate()?;
        let mut guard = self.schemas.lock().await;
        let entry = guard.get_mut(schema).ok_or_else(|| unknown_schema(schema))?;
        if entry.patches.contains_key(&patch.name) {
            return Err(BackendError::Conflict(format!("{schema}/{}", patch.name)));
        }
        debug!(schema, patch = %patch.name, "created patch");
        entry.patches.insert(patch.name.clone(), patch);
        Ok(())
    }

    async fn patch(&self, schema: &str, name: &str) -> Result<PatchMeta, BackendError> {
        let guard = self.schemas.lock().await;
        let entry = guard.get(schema).ok_or_else(|| unknown_schema(schema))?;
        entry
            .patches
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::UnknownPatch {
                schema: schema.to_string(),
                patch: name.to_string(),
            })
    }

    async fn list_patches(&self, schema: &str) -> Result<Vec<PatchMeta>, BackendError> {
        let guard = self.schemas.lock().await;
        let entry = guard.get(schema).ok_or_else(|| unknown_schema(schema))?;
        Ok(entry.patches.values().cloned().collect())
    }

    async fn delete_patch(&self, schema: &str, name: &str) -> Result<(), BackendError> {
        let mut guard = self.schemas.lock().await;
        let entry = guard.get_mut(schema).ok_or_else(|| unknown_schema(schema))?;
        entry
            .patches
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BackendError::UnknownPatch {
                schema: schema.to_string(),
                patch: name.to_string(),
            })
    }
}
