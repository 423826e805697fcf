//! Level geometry table.
//!
//! Level 0 is the whole domain (`1 x 1`). Rule `i` splits each level-`i`
//! cell into `sub_x * sub_y` level-`i + 1` cells, so with `n` rules the
//! table has `n + 1` levels and the deepest one cannot be subdivided.
//! Global ids are row-major: `global_id = v * width + u`.

use crate::context::{ConfigError, SubdivideRule};

/// Cell counts of one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelInfo {
    pub width: u32,
    pub height: u32,
}

impl LevelInfo {
    #[inline]
    pub fn cell_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Column and row of a global id.
    #[inline]
    pub fn uv(&self, global_id: u32) -> (u32, u32) {
        (global_id % self.width, global_id / self.width)
    }

    #[inline]
    pub fn global_id(&self, u: u32, v: u32) -> u32 {
        v * self.width + u
    }

    #[inline]
    pub fn contains(&self, global_id: u32) -> bool {
        (global_id as u64) < self.cell_count()
    }
}

/// Immutable per-level geometry derived from the subdivision rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTable {
    infos: Vec<LevelInfo>,
    rules: Vec<SubdivideRule>,
}

impl LevelTable {
    /// Largest rule count whose deepest level still fits a `u8`.
    pub const MAX_RULES: usize = u8::MAX as usize;

    pub fn try_new(rules: &[SubdivideRule]) -> Result<Self, ConfigError> {
        if rules.is_empty() {
            return Err(ConfigError::MissingRules);
        }
        if rules.len() > Self::MAX_RULES {
            return Err(ConfigError::TooManyLevels {
                rules: rules.len(),
                max: Self::MAX_RULES,
            });
        }

        let mut infos = Vec::with_capacity(rules.len() + 1);
        infos.push(LevelInfo { width: 1, height: 1 });

        let (mut width, mut height) = (1u64, 1u64);
        for (index, rule) in rules.iter().enumerate() {
            if rule.sub_x == 0 || rule.sub_y == 0 {
                return Err(ConfigError::ZeroRule {
                    index,
                    sub_x: rule.sub_x,
                    sub_y: rule.sub_y,
                });
            }
            width *= rule.sub_x as u64;
            height *= rule.sub_y as u64;
            let cells = width.saturating_mul(height);
            if cells > u32::MAX as u64 {
                return Err(ConfigError::LevelTooLarge { level: index + 1, cells });
            }
            infos.push(LevelInfo {
                width: width as u32,
                height: height as u32,
            });
        }

        Ok(Self {
            infos,
            rules: rules.to_vec(),
        })
    }

    /// Number of levels, including level 0.
    #[inline]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    #[inline]
    pub fn max_level(&self) -> u8 {
        (self.infos.len() - 1) as u8
    }

    #[inline]
    pub fn info(&self, level: u8) -> Option<LevelInfo> {
        self.infos.get(level as usize).copied()
    }

    pub fn infos(&self) -> &[LevelInfo] {
        &self.infos
    }

    /// Rule that splits `level` into `level + 1`; `None` for the deepest level.
    #[inline]
    pub fn rule(&self, level: u8) -> Option<SubdivideRule> {
        self.rules.get(level as usize).copied()
    }

    pub fn rules(&self) -> &[SubdivideRule] {
        &self.rules
    }

    /// True when `(level, global_id)` names a cell of this table.
    pub fn contains(&self, level: u8, global_id: u32) -> bool {
        self.info(level).map_or(false, |info| info.contains(global_id))
    }

    /// Position of a cell inside its parent's block, row-major. Level 0 is 0.
    ///
    /// Panics if `level` is not part of the table.
    pub fn local_id(&self, level: u8, global_id: u32) -> u32 {
        if level == 0 {
            return 0;
        }
        let (u, v) = self.infos[level as usize].uv(global_id);
        let rule = self.rules[level as usize - 1];
        (v % rule.sub_y) * rule.sub_x + (u % rule.sub_x)
    }

    /// Global id of the parent cell at `level - 1`. Level 0 is 0.
    ///
    /// Panics if `level` is not part of the table.
    pub fn parent_global_id(&self, level: u8, global_id: u32) -> u32 {
        if level == 0 {
            return 0;
        }
        let (u, v) = self.infos[level as usize].uv(global_id);
        let rule = self.rules[level as usize - 1];
        let parent = self.infos[level as usize - 1];
        parent.global_id(u / rule.sub_x, v / rule.sub_y)
    }

    /// Row-major children of a cell at `level + 1`, paired with their local ids.
    /// `None` for the deepest level or a level outside the table.
    pub fn children_iter(&self, level: u8, global_id: u32) -> Option<impl Iterator<Item = (u32, u32)>> {
        let rule = self.rule(level)?;
        let info = self.info(level)?;
        let (u, v) = info.uv(global_id);
        let child_width = info.width * rule.sub_x;
        Some((0..rule.child_count()).map(move |local_id| {
            let sub_u = local_id % rule.sub_x;
            let sub_v = local_id / rule.sub_x;
            let child = (v * rule.sub_y + sub_v) * child_width + (u * rule.sub_x + sub_u);
            (local_id, child)
        }))
    }

    /// Row-major child global ids; `None` for the deepest or an unknown level.
    pub fn children(&self, level: u8, global_id: u32) -> Option<Vec<u32>> {
        Some(self.children_iter(level, global_id)?.map(|(_, child)| child).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rules: &[[u32; 2]]) -> LevelTable {
        let rules: Vec<SubdivideRule> = rules.iter().copied().map(SubdivideRule::from).collect();
        LevelTable::try_new(&rules).unwrap()
    }

    #[test]
    fn widths_follow_rules() {
        let levels = table(&[[478, 310], [2, 2], [3, 1]]);
        assert_eq!(levels.len(), 4);
        assert_eq!(levels.info(0), Some(LevelInfo { width: 1, height: 1 }));
        for i in 1..levels.len() {
            let prev = levels.infos()[i - 1];
            let rule = levels.rules()[i - 1];
            let info = levels.infos()[i];
            assert_eq!(info.width, prev.width * rule.sub_x);
            assert_eq!(info.height, prev.height * rule.sub_y);
        }
        assert_eq!(levels.info(3), Some(LevelInfo { width: 478 * 6, height: 310 * 2 }));
    }

    #[test]
    fn local_id_and_uv_of_scenario_cell() {
        let levels = table(&[[10, 10]]);
        assert_eq!(levels.info(1).unwrap().uv(23), (3, 2));
        // Single parent block: the row-major block position equals the global id.
        assert_eq!(levels.local_id(1, 23), 2 * 10 + 3);
        assert_eq!(levels.local_id(0, 0), 0);

        let levels = table(&[[10, 10], [2, 2]]);
        // u = 7, v = 5 at width 20: bottom-right of its 2x2 block.
        assert_eq!(levels.local_id(2, 5 * 20 + 7), 3);
    }

    #[test]
    fn merge_parent_children() {
        let levels = table(&[[2, 2], [2, 2]]);
        assert_eq!(levels.children(0, 0), Some(vec![0, 1, 2, 3]));
        assert_eq!(levels.children(1, 3), Some(vec![10, 11, 14, 15]));
        assert_eq!(levels.children(2, 0), None);
        assert_eq!(levels.children(9, 0), None);
    }

    #[test]
    fn children_round_trip_through_parent() {
        let levels = table(&[[3, 2], [2, 3], [4, 4]]);
        for level in 0..levels.max_level() {
            let info = levels.info(level).unwrap();
            for gid in 0..info.cell_count() as u32 {
                let children: Vec<(u32, u32)> = levels.children_iter(level, gid).unwrap().collect();
                let rule = levels.rule(level).unwrap();
                assert_eq!(children.len() as u32, rule.child_count());
                for (local_id, child) in children {
                    assert_eq!(levels.parent_global_id(level + 1, child), gid);
                    assert_eq!(levels.local_id(level + 1, child), local_id);
                }
            }
        }
    }

    #[test]
    fn rejects_oversized_levels() {
        let rules = vec![SubdivideRule::new(65_535, 65_535), SubdivideRule::new(2, 1)];
        assert!(matches!(
            LevelTable::try_new(&rules),
            Err(ConfigError::LevelTooLarge { level: 2, .. })
        ));
    }
}
