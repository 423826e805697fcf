//! Cell identity and flat cell batches.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `(level, global_id)` packed into one word: `level << 32 | global_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey(u64);

impl CellKey {
    #[inline]
    pub const fn new(level: u8, global_id: u32) -> Self {
        Self(((level as u64) << 32) | global_id as u64)
    }

    #[inline]
    pub const fn level(self) -> u8 {
        (self.0 >> 32) as u8
    }

    #[inline]
    pub const fn global_id(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.level(), self.global_id())
    }
}

/// A batch whose arrays disagree or that names a level outside the grid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("batch has {levels} levels but {actual} {field}")]
    LengthMismatch {
        field: &'static str,
        levels: usize,
        actual: usize,
    },

    #[error("row {row} names level {level}, but the grid has {level_count} levels")]
    UnknownLevel { row: usize, level: u8, level_count: usize },
}

/// Parallel `levels` / `global_ids` arrays, optionally with deleted flags.
/// This is the shape cells take on every boundary: backend replies, worker
/// requests, and cache snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellBatch {
    pub levels: Vec<u8>,
    pub global_ids: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<Vec<bool>>,
}

impl CellBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            levels: Vec::with_capacity(capacity),
            global_ids: Vec::with_capacity(capacity),
            deleted: None,
        }
    }

    /// Builds a batch from parallel arrays.
    ///
    /// Panics if the arrays differ in length.
    pub fn from_parts(levels: Vec<u8>, global_ids: Vec<u32>) -> Self {
        assert_eq!(
            levels.len(),
            global_ids.len(),
            "levels and global ids must have the same length"
        );
        Self {
            levels,
            global_ids,
            deleted: None,
        }
    }

    pub fn from_keys(keys: impl IntoIterator<Item = CellKey>) -> Self {
        let mut batch = Self::new();
        for key in keys {
            batch.push(key.level(), key.global_id());
        }
        batch
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn push(&mut self, level: u8, global_id: u32) {
        self.levels.push(level);
        self.global_ids.push(global_id);
        if let Some(deleted) = &mut self.deleted {
            deleted.push(false);
        }
    }

    pub fn key(&self, i: usize) -> CellKey {
        CellKey::new(self.levels[i], self.global_ids[i])
    }

    pub fn keys(&self) -> impl Iterator<Item = CellKey> + '_ {
        self.levels
            .iter()
            .zip(&self.global_ids)
            .map(|(&level, &global_id)| CellKey::new(level, global_id))
    }

    /// Deleted flag of row `i`; rows without flags are active.
    pub fn is_deleted(&self, i: usize) -> bool {
        self.deleted
            .as_ref()
            .and_then(|flags| flags.get(i).copied())
            .unwrap_or(false)
    }

    /// Checks that the arrays have one entry per row.
    pub fn check_shape(&self) -> Result<(), BatchError> {
        let levels = self.levels.len();
        let mut fields = vec![("global ids", self.global_ids.len())];
        if let Some(deleted) = &self.deleted {
            fields.push(("deleted flags", deleted.len()));
        }
        match fields.into_iter().find(|&(_, actual)| actual != levels) {
            Some((field, actual)) => Err(BatchError::LengthMismatch { field, levels, actual }),
            None => Ok(()),
        }
    }

    /// [`check_shape`](Self::check_shape), plus every level below `level_count`.
    pub fn validate(&self, level_count: usize) -> Result<(), BatchError> {
        self.check_shape()?;
        match self.levels.iter().position(|&level| level as usize >= level_count) {
            Some(row) => Err(BatchError::UnknownLevel {
                row,
                level: self.levels[row],
                level_count,
            }),
            None => Ok(()),
        }
    }

    /// Contiguous sub-batch, flags included.
    ///
    /// Panics if `range` is out of bounds; call [`check_shape`](Self::check_shape)
    /// first on untrusted batches.
    pub fn slice(&self, range: std::ops::Range<usize>) -> CellBatch {
        CellBatch {
            levels: self.levels[range.clone()].to_vec(),
            global_ids: self.global_ids[range.clone()].to_vec(),
            deleted: self.deleted.as_ref().map(|flags| flags[range].to_vec()),
        }
    }
}

/// Diagnostic snapshot of one cached cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellCheck {
    pub storage_id: u32,
    pub level: u8,
    pub global_id: u32,
    pub local_id: u32,
    pub deleted: bool,
}
