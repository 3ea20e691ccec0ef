use std::collections::BTreeSet;

use crate::listing::Snapshot;

/// Keys that appeared and disappeared between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl ListingDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub fn compute_diff(old: &Snapshot, new: &Snapshot) -> ListingDiff {
    ListingDiff {
        added: new
            .keys()
            .filter(|key| !old.contains_key(key))
            .cloned()
            .collect(),
        removed: old
            .keys()
            .filter(|key| !new.contains_key(key))
            .cloned()
            .collect(),
    }
}
