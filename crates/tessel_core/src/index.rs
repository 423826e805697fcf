//! Hash index from cell identity to storage slot.

use rustc_hash::FxHashMap;

use crate::cell::CellKey;

/// Maps `(level, global_id)` to the dense storage slot holding the cell.
#[derive(Debug, Default, Clone)]
pub struct CellIndex {
    slots: FxHashMap<CellKey, u32>,
}

impl CellIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    /// Points `key` at `storage_id`, returning the previous slot.
    #[inline]
    pub fn update(&mut self, key: CellKey, storage_id: u32) -> Option<u32> {
        self.slots.insert(key, storage_id)
    }

    #[inline]
    pub fn get(&self, key: CellKey) -> Option<u32> {
        self.slots.get(&key).copied()
    }

    #[inline]
    pub fn contains(&self, key: CellKey) -> bool {
        self.slots.contains_key(&key)
    }

    #[inline]
    pub fn remove(&mut self, key: CellKey) -> Option<u32> {
        self.slots.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellKey, u32)> + '_ {
        self.slots.iter().map(|(&key, &slot)| (key, slot))
    }
}
