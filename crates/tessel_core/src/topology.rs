//! Shared-edge topology across mixed-resolution cells.
//!
//! Parsing runs in two phases. Phase 1 finds, for every cell and side, the
//! materialized cells across that side: the same-level neighbour if it
//! exists, otherwise the finer cells along the facing strip of that
//! position (found by descending its children with an explicit stack).
//! Coarser neighbours are not searched for; the coarse cell finds the fine
//! one and the pair is registered on both. Phase 2 walks each side and
//! emits boundary edges for uncovered spans and one shared edge per
//! neighbour. Edge keys use reduced fractions of the domain extent so both
//! cells of a shared edge produce the same key.

use std::cmp::Ordering;
use std::fmt;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Serialize, Serializer};
use tessel_metrics::SystemProfiler;
use tracing::{debug, warn};

use crate::cell::{CellBatch, CellKey};
use crate::context::SubdivideRule;
use crate::level::LevelTable;
use crate::math::gcd;

/// Side codes, also the index into per-cell edge sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    North = 0,
    West = 1,
    South = 2,
    East = 3,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::North, Side::West, Side::South, Side::East];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::North => Side::South,
            Side::West => Side::East,
            Side::South => Side::North,
            Side::East => Side::West,
        }
    }

    /// North and south edges run horizontally.
    #[inline]
    pub fn direction(self) -> Direction {
        match self {
            Side::North | Side::South => Direction::Horizontal,
            Side::West | Side::East => Direction::Vertical,
        }
    }

    /// Whether the child at `local_id` lies on the strip of its parent that
    /// faces a cell looking across this side.
    #[inline]
    fn faces(self, local_id: u32, rule: SubdivideRule) -> bool {
        match self {
            Side::North => local_id < rule.sub_x,
            Side::West => local_id % rule.sub_x == rule.sub_x - 1,
            Side::South => local_id >= rule.sub_x * (rule.sub_y - 1),
            Side::East => local_id % rule.sub_x == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Horizontal,
    Vertical,
}

impl Direction {
    fn code(self) -> char {
        match self {
            Direction::Horizontal => 'h',
            Direction::Vertical => 'v',
        }
    }
}

/// Non-negative reduced fraction of the domain extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    num: u32,
    den: u32,
}

impl Fraction {
    pub fn new(num: u32, den: u32) -> Self {
        debug_assert!(den > 0);
        let g = gcd(num as u64, den as u64).max(1) as u32;
        Self {
            num: num / g,
            den: den / g,
        }
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn den(&self) -> u32 {
        self.den
    }

    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.num as u64 * other.den as u64).cmp(&(other.num as u64 * self.den as u64))
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Canonical edge identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub direction: Direction,
    pub start: Fraction,
    pub end: Fraction,
    pub shared: Fraction,
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}-{}-{}-{}-{}-{}",
            self.direction.code(),
            self.start.num,
            self.start.den,
            self.end.num,
            self.end.den,
            self.shared.num,
            self.shared.den
        )
    }
}

impl Serialize for EdgeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parsed topology, indexed by edge and by cell storage order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyInfo {
    pub edge_keys: Vec<EdgeKey>,
    /// Adjacent storage ids per edge: one for boundary edges, two for shared.
    pub edge_cells: Vec<Vec<u32>>,
    /// Per cell, sorted edge indices per side (see [`Side`]).
    pub cell_edges: Vec<[Vec<u32>; 4]>,
}

impl TopologyInfo {
    pub fn edge_count(&self) -> usize {
        self.edge_keys.len()
    }

    pub fn edges_of(&self, storage_id: u32, side: Side) -> &[u32] {
        &self.cell_edges[storage_id as usize][side.index()]
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    level: u8,
    global_id: u32,
    x_min: Fraction,
    x_max: Fraction,
    y_min: Fraction,
    y_max: Fraction,
}

impl Node {
    fn new(levels: &LevelTable, level: u8, global_id: u32) -> Option<Self> {
        let info = levels.info(level).filter(|info| info.contains(global_id))?;
        let (u, v) = info.uv(global_id);
        Some(Self {
            level,
            global_id,
            x_min: Fraction::new(u, info.width),
            x_max: Fraction::new(u + 1, info.width),
            y_min: Fraction::new(v, info.height),
            y_max: Fraction::new(v + 1, info.height),
        })
    }

    fn span(&self, direction: Direction) -> (Fraction, Fraction) {
        match direction {
            Direction::Horizontal => (self.x_min, self.x_max),
            Direction::Vertical => (self.y_min, self.y_max),
        }
    }

    fn shared(&self, side: Side) -> Fraction {
        match side {
            Side::North => self.y_max,
            Side::South => self.y_min,
            Side::West => self.x_min,
            Side::East => self.x_max,
        }
    }
}

type Lookup = FxHashMap<CellKey, u32>;

fn has_cached_ancestor(levels: &LevelTable, lookup: &Lookup, mut level: u8, mut global_id: u32) -> bool {
    while level > 0 {
        global_id = levels.parent_global_id(level, global_id);
        level -= 1;
        if lookup.contains_key(&CellKey::new(level, global_id)) {
            return true;
        }
    }
    false
}

/// Phase 1 for one cell and side: cached cells at the same or finer level
/// across `side`.
fn discover(levels: &LevelTable, lookup: &Lookup, node: &Node, side: Side) -> Vec<u32> {
    let Some(info) = levels.info(node.level) else {
        return Vec::new();
    };
    let (u, v) = info.uv(node.global_id);
    let across = match side {
        Side::North => (v + 1 < info.height).then(|| (u, v + 1)),
        Side::South => v.checked_sub(1).map(|v| (u, v)),
        Side::West => u.checked_sub(1).map(|u| (u, v)),
        Side::East => (u + 1 < info.width).then(|| (u + 1, v)),
    };
    let Some((nu, nv)) = across else {
        return Vec::new();
    };

    let neighbour = info.global_id(nu, nv);
    if let Some(&storage_id) = lookup.get(&CellKey::new(node.level, neighbour)) {
        return vec![storage_id];
    }
    if has_cached_ancestor(levels, lookup, node.level, neighbour) {
        return Vec::new();
    }

    let mut found = Vec::new();
    let mut stack = vec![(node.level, neighbour)];
    while let Some((level, global_id)) = stack.pop() {
        let (Some(rule), Some(children)) = (levels.rule(level), levels.children_iter(level, global_id)) else {
            continue;
        };
        for (local_id, child) in children {
            if !side.faces(local_id, rule) {
                continue;
            }
            match lookup.get(&CellKey::new(level + 1, child)) {
                Some(&storage_id) => found.push(storage_id),
                None => stack.push((level + 1, child)),
            }
        }
    }
    found
}

#[derive(Default)]
struct EdgeTable {
    key_index: FxHashMap<EdgeKey, u32>,
    keys: Vec<EdgeKey>,
    cells: Vec<Vec<u32>>,
}

impl EdgeTable {
    /// Index of `key`, creating it with adjacency `[a, b?]` on first sight.
    fn edge(&mut self, key: EdgeKey, a: u32, b: Option<u32>) -> u32 {
        if let Some(&index) = self.key_index.get(&key) {
            return index;
        }
        let index = self.keys.len() as u32;
        self.key_index.insert(key, index);
        self.keys.push(key);
        self.cells.push(std::iter::once(a).chain(b).collect());
        index
    }
}

struct EdgeBuilder<'a> {
    nodes: &'a [Option<Node>],
    table: EdgeTable,
    cell_edges: Vec<[Vec<u32>; 4]>,
}

impl EdgeBuilder<'_> {
    fn link(&mut self, side: Side, a: u32, b: Option<u32>, start: Fraction, end: Fraction, shared: Fraction) {
        let key = EdgeKey {
            direction: side.direction(),
            start,
            end,
            shared,
        };
        let edge = self.table.edge(key, a, b);
        self.cell_edges[a as usize][side.index()].push(edge);
        if let Some(b) = b {
            self.cell_edges[b as usize][side.opposite().index()].push(edge);
        }
    }

    /// Phase 2 for one cell and side.
    fn side_edges(&mut self, storage_id: u32, node: &Node, side: Side, neighbours: &[u32]) {
        let direction = side.direction();
        let (start, end) = node.span(direction);
        let shared = node.shared(side);

        let mut spans: Vec<(Fraction, Fraction, u32, u8)> = neighbours
            .iter()
            .filter_map(|&id| {
                let n = self.nodes[id as usize].as_ref()?;
                let (s, e) = n.span(direction);
                Some((s, e, id, n.level))
            })
            .collect();

        if spans.is_empty() {
            self.link(side, storage_id, None, start, end, shared);
            return;
        }
        if spans.len() == 1 && spans[0].3 < node.level {
            self.link(side, storage_id, Some(spans[0].2), start, end, shared);
            return;
        }

        spans.sort_unstable_by(|a, b| a.0.cmp(&b.0).then(a.2.cmp(&b.2)));

        if start != spans[0].0 {
            self.link(side, storage_id, None, start, spans[0].0, shared);
        }
        for i in 0..spans.len() {
            let (s, e, id, _) = spans[i];
            self.link(side, storage_id, Some(id), s, e, shared);
            if let Some(&(next_start, ..)) = spans.get(i + 1) {
                if e != next_start {
                    self.link(side, storage_id, None, e, next_start, shared);
                }
            }
        }
        let last_end = spans[spans.len() - 1].1;
        if last_end != end {
            self.link(side, storage_id, None, last_end, end, shared);
        }
    }
}

/// Parses the topology of `cells`, whose position is their storage id.
pub fn parse(levels: &LevelTable, cells: &CellBatch) -> TopologyInfo {
    let mut profiler = SystemProfiler::new();
    let n = cells.len();

    let nodes: Vec<Option<Node>> = cells
        .keys()
        .map(|key| Node::new(levels, key.level(), key.global_id()))
        .collect();
    let invalid = nodes.iter().filter(|node| node.is_none()).count();
    if invalid > 0 {
        warn!(invalid, "cells outside the level table are left isolated");
    }

    let lookup: Lookup = cells
        .keys()
        .enumerate()
        .map(|(storage_id, key)| (key, storage_id as u32))
        .collect();

    let neighbours = profiler.time_phase("topology.neighbours", || {
        let directed: Vec<[Vec<u32>; 4]> = nodes
            .par_iter()
            .map(|node| match node {
                Some(node) => Side::ALL.map(|side| discover(levels, &lookup, node, side)),
                None => Default::default(),
            })
            .collect();

        let mut neighbours: Vec<[Vec<u32>; 4]> = vec![Default::default(); n];
        for (storage_id, found) in directed.into_iter().enumerate() {
            for side in Side::ALL {
                for &other in &found[side.index()] {
                    neighbours[storage_id][side.index()].push(other);
                    neighbours[other as usize][side.opposite().index()].push(storage_id as u32);
                }
            }
        }
        for sides in &mut neighbours {
            for list in sides.iter_mut() {
                list.sort_unstable();
                list.dedup();
            }
        }
        neighbours
    });

    let mut builder = EdgeBuilder {
        nodes: &nodes,
        table: EdgeTable::default(),
        cell_edges: vec![Default::default(); n],
    };
    profiler.time_phase("topology.edges", || {
        for (storage_id, node) in nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            for side in [Side::North, Side::South, Side::West, Side::East] {
                builder.side_edges(storage_id as u32, node, side, &neighbours[storage_id][side.index()]);
            }
        }
        for sides in &mut builder.cell_edges {
            for list in sides.iter_mut() {
                list.sort_unstable();
                list.dedup();
            }
        }
    });

    debug!(
        cells = n,
        edges = builder.table.keys.len(),
        neighbours_ms = profiler.phase_ms("topology.neighbours"),
        edges_ms = profiler.phase_ms("topology.edges"),
        "parsed topology"
    );

    TopologyInfo {
        edge_keys: builder.table.keys,
        edge_cells: builder.table.cells,
        cell_edges: builder.cell_edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(rules: &[[u32; 2]]) -> LevelTable {
        let rules: Vec<SubdivideRule> = rules.iter().copied().map(SubdivideRule::from).collect();
        LevelTable::try_new(&rules).unwrap()
    }

    fn assert_symmetric(topology: &TopologyInfo) {
        for (edge, cells) in topology.edge_cells.iter().enumerate() {
            let edge = edge as u32;
            match cells.as_slice() {
                [a] => {
                    let sides = Side::ALL
                        .iter()
                        .filter(|s| topology.edges_of(*a, **s).contains(&edge))
                        .count();
                    assert_eq!(sides, 1, "boundary edge {edge} on {sides} sides");
                }
                [a, b] => {
                    let side_a = Side::ALL
                        .into_iter()
                        .find(|s| topology.edges_of(*a, *s).contains(&edge))
                        .expect("edge missing on first cell");
                    assert!(
                        topology.edges_of(*b, side_a.opposite()).contains(&edge),
                        "edge {edge} not on opposite side of cell {b}"
                    );
                }
                other => panic!("edge {edge} has {} cells", other.len()),
            }
        }
    }

    #[test]
    fn fractions_reduce_and_order() {
        assert_eq!(Fraction::new(2, 4), Fraction::new(1, 2));
        assert!(Fraction::new(1, 3) < Fraction::new(1, 2));
        assert_eq!(Fraction::new(0, 7), Fraction::new(0, 1));
    }

    #[test]
    fn uniform_two_by_two() {
        let levels = levels(&[[2, 2]]);
        let cells = CellBatch::from_parts(vec![1; 4], vec![0, 1, 2, 3]);
        let topology = parse(&levels, &cells);

        // 12 unit edges: 8 on the boundary, 4 interior.
        assert_eq!(topology.edge_count(), 12);
        let shared = topology.edge_cells.iter().filter(|c| c.len() == 2).count();
        assert_eq!(shared, 4);
        for storage_id in 0..4 {
            for side in Side::ALL {
                assert_eq!(topology.edges_of(storage_id, side).len(), 1);
            }
        }
        assert_symmetric(&topology);
    }

    #[test]
    fn hanging_node_between_levels() {
        // Level 1 is 2 x 1. Cell 0 stays coarse, cell 1 is split into 2 x 2.
        let levels = levels(&[[2, 1], [2, 2]]);
        // Level 2 is 4 x 2; children of level-1 cell 1 are 2, 3, 6, 7.
        let cells = CellBatch::from_parts(vec![1, 2, 2, 2, 2], vec![0, 2, 3, 6, 7]);
        let topology = parse(&levels, &cells);

        // The coarse cell has two east edges, one per fine neighbour.
        let east = topology.edges_of(0, Side::East);
        assert_eq!(east.len(), 2);
        let mut adjacent: Vec<u32> = east
            .iter()
            .map(|&e| {
                let cells = &topology.edge_cells[e as usize];
                assert_eq!(cells.len(), 2);
                cells.iter().copied().find(|&c| c != 0).unwrap()
            })
            .collect();
        adjacent.sort_unstable();
        // Storage ids 1 (gid 2) and 3 (gid 6) are the west column.
        assert_eq!(adjacent, vec![1, 3]);

        // Each fine west-column cell has exactly one west edge, shared with 0.
        for fine in [1u32, 3] {
            let west = topology.edges_of(fine, Side::West);
            assert_eq!(west.len(), 1);
            assert!(topology.edge_cells[west[0] as usize].contains(&0));
        }
        assert_symmetric(&topology);
    }

    #[test]
    fn coarse_side_and_fine_side_agree_on_keys() {
        let levels = levels(&[[2, 1], [2, 2]]);
        let cells = CellBatch::from_parts(vec![2, 2, 2, 2, 1], vec![2, 3, 6, 7, 0]);
        let topology = parse(&levels, &cells);
        let keys: Vec<String> = topology.edge_keys.iter().map(|k| k.to_string()).collect();
        let mut unique = keys.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), keys.len());
        // Vertical edge at x = 1/2 from y = 0 to y = 1/2.
        assert!(keys.contains(&"v0-1-1-2-1-2".to_string()));
        assert_symmetric(&topology);
    }

    #[test]
    fn gap_edges_where_no_cells_exist() {
        // Only the two bottom cells of a 2 x 2 grid.
        let levels = levels(&[[2, 2]]);
        let cells = CellBatch::from_parts(vec![1, 1], vec![0, 1]);
        let topology = parse(&levels, &cells);
        for storage_id in 0..2 {
            let north = topology.edges_of(storage_id, Side::North);
            assert_eq!(north.len(), 1);
            assert_eq!(topology.edge_cells[north[0] as usize], vec![storage_id]);
        }
        assert_eq!(topology.edges_of(0, Side::East), topology.edges_of(1, Side::West));
        assert_symmetric(&topology);
    }
}
