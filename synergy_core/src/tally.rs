use std::collections::BTreeMap;

use synergy_schema::{GameplayTag, TagSet};

/// Per-archetype contribution counts.
///
/// Counts how many registered instances of one archetype currently carry each
/// category. Only 0 -> 1 and 1 -> 0 transitions affect the roster-wide count,
/// so duplicate units of the same kind contribute a category once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchetypeTally {
    counts: BTreeMap<GameplayTag, u32>,
}

impl ArchetypeTally {
    /// Add one contributing instance per tag; returns the tags that went 0 -> 1.
    pub fn increase_all<'a, I>(&mut self, tags: I) -> TagSet
    where
        I: IntoIterator<Item = &'a GameplayTag>,
    {
        let mut gained = TagSet::new();
        for tag in tags {
            let count = self.counts.entry(tag.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                gained.insert(tag.clone());
            }
        }
        gained
    }

    /// Remove one contributing instance per tag; returns the tags that hit zero.
    /// Tags the tally never saw are ignored.
    pub fn decrease_all<'a, I>(&mut self, tags: I) -> TagSet
    where
        I: IntoIterator<Item = &'a GameplayTag>,
    {
        let mut lost = TagSet::new();
        for tag in tags {
            let Some(count) = self.counts.get_mut(tag) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.counts.remove(tag);
                lost.insert(tag.clone());
            }
        }
        lost
    }

    pub fn active_tags(&self) -> TagSet {
        self.counts.keys().cloned().collect()
    }

    pub fn contributions(&self, tag: &GameplayTag) -> u32 {
        self.counts.get(tag).copied().unwrap_or(0)
    }

    /// Forget every contribution; returns the tags that were active.
    pub fn reset(&mut self) -> TagSet {
        std::mem::take(&mut self.counts).into_keys().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
