//! Named counters for tracking dispatched operations

use std::collections::HashMap;

/// Counts keyed by static operation names.
#[derive(Debug, Default)]
pub struct Counter {
    counts: HashMap<&'static str, usize>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, name: &'static str, value: usize) {
        *self.counts.entry(name).or_insert(0) += value;
    }

    pub fn get(&self, name: &str) -> usize {
        self.counts.get(name).copied().unwrap_or(0)
    }

    /// Sum over every name.
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_per_name() {
        let mut counter = Counter::new();
        counter.increment("subdivide", 1);
        counter.increment("subdivide", 2);
        counter.increment("merge", 1);
        assert_eq!(counter.get("subdivide"), 3);
        assert_eq!(counter.get("merge"), 1);
        assert_eq!(counter.get("recover"), 0);
        assert_eq!(counter.total(), 4);
    }
}
