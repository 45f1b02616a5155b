//! Per-storage-group series accounting.

use std::collections::HashMap;

/// Number of series per storage group plus the running maximum across all
/// groups. The maximum is recomputed whenever a decrement or removal touches
/// the group currently holding it.
#[derive(Debug, Default)]
pub(crate) struct SeriesCounters {
    per_group: HashMap<String, i64>,
    max: i64,
}

impl SeriesCounters {
    pub(crate) fn register(&mut self, storage_group: &str) {
        self.per_group.insert(storage_group.to_string(), 0);
    }

    pub(crate) fn increment(&mut self, storage_group: &str) {
        let count = self.per_group.entry(storage_group.to_string()).or_insert(0);
        *count += 1;
        if *count > self.max {
            self.max = *count;
        }
    }

    pub(crate) fn decrement(&mut self, storage_group: &str) {
        if let Some(count) = self.per_group.get_mut(storage_group) {
            let before = *count;
            *count -= 1;
            if before == self.max {
                self.recompute_max();
            }
        }
    }

    /// Drop the group entirely; returns the count it held.
    pub(crate) fn remove(&mut self, storage_group: &str) -> i64 {
        let removed = self.per_group.remove(storage_group).unwrap_or(0);
        if removed == self.max {
            self.recompute_max();
        }
        removed
    }

    pub(crate) fn count(&self, storage_group: &str) -> Option<i64> {
        self.per_group.get(storage_group).copied()
    }

    pub(crate) fn max(&self) -> i64 {
        self.max
    }

    /// Replace all counts, e.g. after log replay.
    pub(crate) fn rebuild(&mut self, counts: impl IntoIterator<Item = (String, i64)>) {
        self.per_group = counts.into_iter().collect();
        self.recompute_max();
    }

    fn recompute_max(&mut self) {
        self.max = self.per_group.values().copied().max().unwrap_or(0);
    }
}
