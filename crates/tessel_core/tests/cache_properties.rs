use proptest::prelude::*;
use std::collections::HashSet;
use tessel_core::{CellBatch, CellCache, CellKey};

#[derive(Clone, Debug)]
enum Op {
    Append { count: u8 },
    RemoveOne { idx: u16 },
    RemoveMany { idxs: Vec<u16> },
    MarkDeleted { idx: u16 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u8..16).prop_map(|count| Op::Append { count }),
        any::<u16>().prop_map(|idx| Op::RemoveOne { idx }),
        prop::collection::vec(any::<u16>(), 0..12).prop_map(|idxs| Op::RemoveMany { idxs }),
        any::<u16>().prop_map(|idx| Op::MarkDeleted { idx }),
    ]
}

/// Model: the set of live cells plus which of them are flagged deleted.
#[derive(Default)]
struct ModelState {
    live: HashSet<CellKey>,
    deleted: HashSet<CellKey>,
    next_gid: u32,
}

// Indices may point past the end so the ignore path is exercised too.
fn pick(idx: u16, len: usize) -> u32 {
    (idx as usize % (len + 2)) as u32
}

fn apply_op(cache: &mut CellCache, state: &mut ModelState, op: Op) {
    match op {
        Op::Append { count } => {
            let mut batch = CellBatch::new();
            for _ in 0..count {
                batch.push(3, state.next_gid);
                state.next_gid += 1;
            }
            if cache.append(&batch).is_ok() {
                state.live.extend(batch.keys());
            }
        }
        Op::RemoveOne { idx } => {
            let id = pick(idx, cache.len());
            if (id as usize) < cache.len() {
                let key = cache.key(id);
                state.live.remove(&key);
                state.deleted.remove(&key);
            }
            let len_before = cache.len();
            let moved = cache.remove_one(id);
            if let Some(m) = moved {
                assert_eq!(m.from as usize, len_before - 1);
                assert_eq!(m.to, id);
            }
        }
        Op::RemoveMany { idxs } => {
            let ids: Vec<u32> = idxs.iter().map(|&i| pick(i, cache.len())).collect();
            let mut targets: HashSet<u32> = HashSet::new();
            for &id in &ids {
                if (id as usize) < cache.len() {
                    targets.insert(id);
                    let key = cache.key(id);
                    state.live.remove(&key);
                    state.deleted.remove(&key);
                }
            }
            let len_before = cache.len();
            let compaction = cache.remove_many(&ids);
            let new_len = len_before - targets.len();
            assert_eq!(cache.len(), new_len);
            for m in compaction.moves() {
                assert!(!targets.contains(&m.from), "removed slot {} used as a source", m.from);
                assert!(m.from as usize >= new_len);
                assert!((m.to as usize) < new_len);
                assert!(targets.contains(&m.to));
            }
        }
        Op::MarkDeleted { idx } => {
            let id = pick(idx, cache.len());
            if (id as usize) < cache.len() {
                cache.set_deleted(id, true);
                state.deleted.insert(cache.key(id));
            }
        }
    }
}

fn assert_invariants(cache: &CellCache, state: &ModelState) {
    assert!(cache.is_consistent());
    assert_eq!(cache.len(), state.live.len());
    for id in 0..cache.next_storage_id() {
        let key = cache.key(id);
        assert!(state.live.contains(&key), "slot {id} holds dead cell {key}");
        assert_eq!(cache.storage_id(key), Some(id));
        assert_eq!(cache.is_deleted(id), state.deleted.contains(&key));
    }
}

fn sequence_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 1..40)
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 2_000, .. ProptestConfig::default() })]
    #[test]
    fn slot_index_consistency(seq in sequence_strategy()) {
        let mut cache = CellCache::with_capacity(256);
        let mut state = ModelState::default();
        for op in seq {
            apply_op(&mut cache, &mut state, op);
            assert_invariants(&cache, &state);
        }
    }
}
