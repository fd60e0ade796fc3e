//! Running indication for dispatch groups

use std::collections::BTreeSet;

use crate::bank::GroupKey;

/// Set of dispatch groups that have delayed work pending.
#[derive(Debug, Default)]
pub struct RunningTracker {
    groups: BTreeSet<GroupKey>,
}

impl RunningTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the group was not already running.
    pub fn mark(&mut self, group: GroupKey) -> bool {
        self.groups.insert(group)
    }

    /// Returns `true` if the group was running.
    pub fn clear(&mut self, group: &GroupKey) -> bool {
        self.groups.remove(group)
    }

    pub fn contains(&self, group: &GroupKey) -> bool {
        self.groups.contains(group)
    }

    /// Empty the set, returning the groups that were running.
    pub fn drain(&mut self) -> Vec<GroupKey> {
        std::mem::take(&mut self.groups).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupKey> {
        self.groups.iter()
    }
}
