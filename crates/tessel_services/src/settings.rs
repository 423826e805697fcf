//! Settings management

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::Route;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub workers: WorkerSettings,
    pub cache: CacheSettings,
    pub backend: BackendSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Worker count; `None` uses the available parallelism.
    pub count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Most cells the flat cache will hold.
    pub max_cells: usize,
    /// Cells per render-vertex batch during initialization.
    pub vertex_batch: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub route: Route,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: WorkerSettings::default(),
            cache: CacheSettings::default(),
            backend: BackendSettings::default(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self { count: None }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_cells: 4_194_304,
            vertex_batch: 1_000_000,
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self { route: Route::Local }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Configured worker count, or the platform's available parallelism.
    pub fn worker_count(&self) -> usize {
        self.workers.count.filter(|&n| n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
