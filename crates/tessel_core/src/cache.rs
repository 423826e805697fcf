//! Flat struct-of-arrays cell cache.
//!
//! Slots `0..len` hold the live cells; `len` is the next storage id. Every
//! live slot has exactly one index entry and no entry points at or past
//! `len`. Removal compacts the slot space by moving tail cells into the
//! freed slots, so storage ids are dense but not stable identities.

use std::ops::Range;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cell::{BatchError, CellBatch, CellKey};
use crate::index::CellIndex;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("appending {requested} cells to {len} would exceed the cache capacity of {capacity}")]
    CapacityExceeded {
        requested: usize,
        len: usize,
        capacity: usize,
    },

    #[error("cell {key} is already cached")]
    DuplicateCell { key: CellKey },

    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// A cell moved from slot `from` into slot `to` during compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMove {
    pub from: u32,
    pub to: u32,
}

/// Result of a batch removal: the cell formerly at `replaced[i]` now lives
/// at `removed[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compaction {
    pub replaced: Vec<u32>,
    pub removed: Vec<u32>,
}

impl Compaction {
    pub fn len(&self) -> usize {
        self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }

    pub fn moves(&self) -> impl Iterator<Item = SlotMove> + '_ {
        self.replaced
            .iter()
            .zip(&self.removed)
            .map(|(&from, &to)| SlotMove { from, to })
    }
}

pub struct CellCache {
    levels: Vec<u8>,
    global_ids: Vec<u32>,
    deleted: Vec<bool>,
    index: CellIndex,
    capacity: usize,
}

impl CellCache {
    /// Cache bounded to `capacity` cells; the arrays grow on demand.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            levels: Vec::new(),
            global_ids: Vec::new(),
            deleted: Vec::new(),
            index: CellIndex::new(),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// First unused storage slot.
    #[inline]
    pub fn next_storage_id(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn clear(&mut self) {
        self.levels.clear();
        self.global_ids.clear();
        self.deleted.clear();
        self.index.clear();
    }

    pub fn levels(&self) -> &[u8] {
        &self.levels
    }

    pub fn global_ids(&self) -> &[u32] {
        &self.global_ids
    }

    pub fn deleted_flags(&self) -> &[bool] {
        &self.deleted
    }

    /// Errors unless `additional` more cells fit.
    pub fn ensure_room(&self, additional: usize) -> Result<(), CacheError> {
        if self.len() + additional > self.capacity {
            return Err(CacheError::CapacityExceeded {
                requested: additional,
                len: self.len(),
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Appends a batch at the next storage id and indexes it. Nothing is
    /// written if the batch is malformed, does not fit or names an already
    /// cached cell.
    pub fn append(&mut self, batch: &CellBatch) -> Result<Range<u32>, CacheError> {
        batch.check_shape()?;
        self.ensure_room(batch.len())?;
        let mut seen = FxHashSet::with_capacity_and_hasher(batch.len(), Default::default());
        if let Some(key) = batch
            .keys()
            .find(|&key| self.index.contains(key) || !seen.insert(key))
        {
            return Err(CacheError::DuplicateCell { key });
        }

        let start = self.next_storage_id();
        self.levels.reserve(batch.len());
        self.global_ids.reserve(batch.len());
        self.deleted.reserve(batch.len());
        for (i, key) in batch.keys().enumerate() {
            let storage_id = start + i as u32;
            self.levels.push(key.level());
            self.global_ids.push(key.global_id());
            self.deleted.push(batch.is_deleted(i));
            self.index.update(key, storage_id);
        }
        debug!(start, count = batch.len(), "appended cells");
        Ok(start..self.next_storage_id())
    }

    #[inline]
    fn assert_live(&self, storage_id: u32) {
        assert!(
            (storage_id as usize) < self.len(),
            "storage id {storage_id} out of range (next storage id {})",
            self.len()
        );
    }

    /// Identity of the cell in `storage_id`.
    ///
    /// Panics if the slot is not live.
    pub fn key(&self, storage_id: u32) -> CellKey {
        self.assert_live(storage_id);
        let i = storage_id as usize;
        CellKey::new(self.levels[i], self.global_ids[i])
    }

    pub fn is_deleted(&self, storage_id: u32) -> bool {
        self.assert_live(storage_id);
        self.deleted[storage_id as usize]
    }

    /// Sets the soft-delete flag, returning the previous value.
    pub fn set_deleted(&mut self, storage_id: u32, deleted: bool) -> bool {
        self.assert_live(storage_id);
        std::mem::replace(&mut self.deleted[storage_id as usize], deleted)
    }

    #[inline]
    pub fn storage_id(&self, key: CellKey) -> Option<u32> {
        self.index.get(key)
    }

    fn move_slot(&mut self, from: usize, to: usize) {
        self.levels[to] = self.levels[from];
        self.global_ids[to] = self.global_ids[from];
        self.deleted[to] = self.deleted[from];
        self.index
            .update(CellKey::new(self.levels[to], self.global_ids[to]), to as u32);
    }

    fn truncate(&mut self, len: usize) {
        self.levels.truncate(len);
        self.global_ids.truncate(len);
        self.deleted.truncate(len);
    }

    /// Removes one slot by swapping the last cell into it. Returns the move,
    /// or `None` when the slot was last or not live.
    pub fn remove_one(&mut self, storage_id: u32) -> Option<SlotMove> {
        let target = storage_id as usize;
        if target >= self.len() {
            debug!(storage_id, "ignoring removal of unused slot");
            return None;
        }
        let last = self.len() - 1;
        self.index.remove(self.key(storage_id));

        let moved = if target != last {
            self.move_slot(last, target);
            Some(SlotMove {
                from: last as u32,
                to: storage_id,
            })
        } else {
            None
        };
        self.truncate(last);
        moved
    }

    /// Removes every listed slot and compacts. Duplicates and ids past the
    /// end are ignored. Freed slots below the new length are refilled in
    /// ascending order from the surviving tail cells in descending order;
    /// `fix_index(from, to)` is called for each move. A removed slot is
    /// never used as a source. Returns the new length.
    pub fn compact_with(&mut self, storage_ids: &[u32], mut fix_index: impl FnMut(u32, u32)) -> u32 {
        let len = self.len();
        let mut targets: Vec<u32> = storage_ids
            .iter()
            .copied()
            .filter(|&id| (id as usize) < len)
            .collect();
        if targets.is_empty() {
            return len as u32;
        }
        targets.sort_unstable();
        targets.dedup();

        for &target in &targets {
            let key = self.key(target);
            self.index.remove(key);
        }

        let new_len = len - targets.len();
        let holes = targets.iter().copied().take_while(|&t| (t as usize) < new_len);
        let mut sources = (new_len..len)
            .rev()
            .filter(|&s| targets.binary_search(&(s as u32)).is_err());

        for hole in holes {
            // Tail survivors and holes below the new length are equal in number.
            let Some(source) = sources.next() else { break };
            self.move_slot(source, hole as usize);
            fix_index(source as u32, hole);
        }

        self.truncate(new_len);
        debug!(removed = targets.len(), next_storage_id = new_len, "compacted cell cache");
        new_len as u32
    }

    /// [`compact_with`](Self::compact_with) collecting the moves.
    pub fn remove_many(&mut self, storage_ids: &[u32]) -> Compaction {
        let mut compaction = Compaction::default();
        self.compact_with(storage_ids, |from, to| {
            compaction.replaced.push(from);
            compaction.removed.push(to);
        });
        compaction
    }

    /// Copy of the live cells with their deleted flags, in storage order.
    pub fn snapshot(&self) -> CellBatch {
        CellBatch {
            levels: self.levels.clone(),
            global_ids: self.global_ids.clone(),
            deleted: Some(self.deleted.clone()),
        }
    }

    /// Checks the slot/index invariant. Intended for tests and debug builds.
    pub fn is_consistent(&self) -> bool {
        if self.index.len() != self.len() {
            return false;
        }
        if self.global_ids.len() != self.len() || self.deleted.len() != self.len() {
            return false;
        }
        self.index.iter().all(|(key, slot)| {
            let i = slot as usize;
            i < self.len() && self.levels[i] == key.level() && self.global_ids[i] == key.global_id()
        })
    }
}

impl Default for CellCache {
    fn default() -> Self {
        Self::with_capacity(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_of(n: u32) -> CellCache {
        let mut cache = CellCache::with_capacity(1024);
        let batch = CellBatch::from_parts(vec![1; n as usize], (0..n).collect());
        cache.append(&batch).unwrap();
        cache
    }

    #[test]
    fn append_assigns_consecutive_slots() {
        let mut cache = cache_of(3);
        let range = cache
            .append(&CellBatch::from_parts(vec![2, 2], vec![7, 8]))
            .unwrap();
        assert_eq!(range, 3..5);
        assert_eq!(cache.storage_id(CellKey::new(2, 8)), Some(4));
        assert!(cache.is_consistent());
    }

    #[test]
    fn append_rejects_duplicates_and_overflow() {
        let mut cache = cache_of(3);
        let err = cache
            .append(&CellBatch::from_parts(vec![1], vec![2]))
            .unwrap_err();
        assert_eq!(err, CacheError::DuplicateCell { key: CellKey::new(1, 2) });
        assert_eq!(cache.len(), 3);

        let mut small = CellCache::with_capacity(2);
        assert!(matches!(
            small.append(&CellBatch::from_parts(vec![1, 1, 1], vec![0, 1, 2])),
            Err(CacheError::CapacityExceeded { requested: 3, .. })
        ));
        assert!(small.is_empty());
    }

    #[test]
    fn append_rejects_short_flags_without_writing() {
        let mut cache = cache_of(3);
        let mut batch = CellBatch::from_parts(vec![1, 1], vec![10, 11]);
        batch.deleted = Some(vec![false]);
        assert!(matches!(cache.append(&batch), Err(CacheError::Batch(_))));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.deleted_flags().len(), 3);
        assert_eq!(cache.storage_id(CellKey::new(1, 10)), None);
        assert!(cache.is_consistent());
    }

    #[test]
    fn remove_one_swaps_last_into_slot() {
        let mut cache = cache_of(5);
        assert_eq!(cache.remove_one(1), Some(SlotMove { from: 4, to: 1 }));
        assert_eq!(cache.key(1), CellKey::new(1, 4));
        assert_eq!(cache.storage_id(CellKey::new(1, 4)), Some(1));
        assert_eq!(cache.storage_id(CellKey::new(1, 1)), None);
        assert_eq!(cache.remove_one(3), None);
        assert_eq!(cache.remove_one(10), None);
        assert_eq!(cache.next_storage_id(), 3);
        assert!(cache.is_consistent());
    }

    #[test]
    fn batch_removal_never_sources_from_removed_slot() {
        let mut cache = cache_of(6);
        let compaction = cache.remove_many(&[2, 5]);
        assert_eq!(cache.next_storage_id(), 4);
        assert_eq!(compaction.replaced, vec![4]);
        assert_eq!(compaction.removed, vec![2]);
        assert_eq!(cache.key(2), CellKey::new(1, 4));
        assert!(cache.is_consistent());
    }

    #[test]
    fn batch_removal_handles_duplicates_and_out_of_range() {
        let mut cache = cache_of(6);
        let compaction = cache.remove_many(&[0, 0, 9, 1]);
        assert_eq!(cache.next_storage_id(), 4);
        assert_eq!(compaction.replaced, vec![5, 4]);
        assert_eq!(compaction.removed, vec![0, 1]);
        let mut survivors: Vec<u32> = cache.global_ids().to_vec();
        survivors.sort_unstable();
        assert_eq!(survivors, vec![2, 3, 4, 5]);
        assert!(cache.is_consistent());
    }

    #[test]
    fn removing_everything_empties_cache() {
        let mut cache = cache_of(4);
        let compaction = cache.remove_many(&[3, 2, 1, 0]);
        assert!(compaction.is_empty());
        assert!(cache.is_empty());
        assert!(cache.is_consistent());
    }

    #[test]
    fn deleted_flags_move_with_cells() {
        let mut cache = cache_of(4);
        cache.set_deleted(3, true);
        cache.remove_many(&[0]);
        assert!(cache.is_deleted(0));
        assert_eq!(cache.key(0), CellKey::new(1, 3));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn key_of_unused_slot_panics() {
        cache_of(2).key(2);
    }
}
