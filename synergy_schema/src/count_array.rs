use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{FnvHasher, GameplayTag};

/// One replicated `(category, count)` pair.
///
/// `replication_id` is assigned once when the entry is created and never
/// reused; `replication_key` is bumped every time the entry changes so the
/// delta builder can tell which entries need retransmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynergyCountEntry {
    pub replication_id: u64,
    pub replication_key: u32,
    pub tag: GameplayTag,
    pub count: i32,
}

/// Authority-side replicated collection of synergy counts.
///
/// Entries stay sorted by `replication_id` (new entries are appended with a
/// fresh, larger id and removals preserve order), which lets observers
/// reproduce the exact ordering from deltas alone.
#[derive(Debug, Clone, Default)]
pub struct SynergyCountArray {
    entries: Vec<SynergyCountEntry>,
    next_replication_id: u64,
    array_replication_key: u32,
}

impl SynergyCountArray {
    pub fn entries(&self) -> &[SynergyCountEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn array_replication_key(&self) -> u32 {
        self.array_replication_key
    }

    pub fn count(&self, tag: &GameplayTag) -> Option<i32> {
        self.entries
            .iter()
            .find(|entry| &entry.tag == tag)
            .map(|entry| entry.count)
    }

    pub fn to_map(&self) -> BTreeMap<GameplayTag, i32> {
        self.entries
            .iter()
            .map(|entry| (entry.tag.clone(), entry.count))
            .collect()
    }

    /// Upsert a single entry. Returns `true` when the collection changed.
    pub fn set_count(&mut self, tag: &GameplayTag, count: i32) -> bool {
        if !tag.is_valid() {
            return false;
        }

        if let Some(entry) = self.entries.iter_mut().find(|entry| &entry.tag == tag) {
            if entry.count == count {
                return false;
            }
            entry.count = count;
            entry.replication_key = entry.replication_key.wrapping_add(1);
            self.mark_array_dirty();
            return true;
        }

        // Ids are never reused, so entries stay sorted by id.
        self.next_replication_id += 1;
        self.entries.push(SynergyCountEntry {
            replication_id: self.next_replication_id,
            replication_key: 1,
            tag: tag.clone(),
            count,
        });
        self.mark_array_dirty();
        true
    }

    pub fn remove_by_tag(&mut self, tag: &GameplayTag) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| &entry.tag != tag);
        let removed = self.entries.len() != before;
        if removed {
            self.mark_array_dirty();
        }
        removed
    }

    /// Remove every entry whose tag appears in `tags`. Returns how many went.
    pub fn remove_by_tags<'a, I>(&mut self, tags: I) -> usize
    where
        I: IntoIterator<Item = &'a GameplayTag>,
    {
        let doomed: BTreeSet<&GameplayTag> = tags.into_iter().collect();
        if doomed.is_empty() {
            return 0;
        }
        let before = self.entries.len();
        self.entries.retain(|entry| !doomed.contains(&entry.tag));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.mark_array_dirty();
        }
        removed
    }

    /// Reconcile the collection with `map` in one pass: every key is upserted
    /// and every entry whose tag is missing from `map` is removed.
    pub fn update_to_map(&mut self, map: &BTreeMap<GameplayTag, i32>) -> bool {
        let mut changed = false;
        for (tag, count) in map {
            changed |= self.set_count(tag, *count);
        }

        let stale: Vec<GameplayTag> = self
            .entries
            .iter()
            .filter(|entry| !map.contains_key(&entry.tag))
            .map(|entry| entry.tag.clone())
            .collect();
        if !stale.is_empty() {
            changed |= self.remove_by_tags(&stale) > 0;
        }
        changed
    }

    pub fn baseline(&self) -> ReplicationBaseline {
        ReplicationBaseline {
            array_key: Some(self.array_replication_key),
            item_keys: self
                .entries
                .iter()
                .map(|entry| (entry.replication_id, entry.replication_key))
                .collect(),
        }
    }

    /// Build the frame an observer holding `baseline` needs to catch up.
    pub fn delta_since(&self, baseline: &ReplicationBaseline, tick: u64) -> SynergyCountFrame {
        let mut frame = SynergyCountFrame {
            tick,
            full: false,
            array_replication_key: self.array_replication_key,
            changed: Vec::new(),
            removed: Vec::new(),
            hash: hash_entries(&self.entries),
        };

        if baseline.array_key == Some(self.array_replication_key) {
            return frame;
        }

        frame.changed = self
            .entries
            .iter()
            .filter(|entry| {
                baseline.item_keys.get(&entry.replication_id) != Some(&entry.replication_key)
            })
            .cloned()
            .collect();
        frame.removed = baseline
            .item_keys
            .keys()
            .filter(|id| self.position_of(**id).is_none())
            .copied()
            .collect();
        frame
    }

    /// A frame carrying every entry, for observers without a baseline.
    pub fn full_frame(&self, tick: u64) -> SynergyCountFrame {
        SynergyCountFrame {
            tick,
            full: true,
            array_replication_key: self.array_replication_key,
            changed: self.entries.clone(),
            removed: Vec::new(),
            hash: hash_entries(&self.entries),
        }
    }

    fn position_of(&self, replication_id: u64) -> Option<usize> {
        self.entries
            .binary_search_by_key(&replication_id, |entry| entry.replication_id)
            .ok()
    }

    fn mark_array_dirty(&mut self) {
        self.array_replication_key = self.array_replication_key.wrapping_add(1);
    }
}

/// Replication keys an observer was last sent, per entry id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationBaseline {
    array_key: Option<u32>,
    item_keys: BTreeMap<u64, u32>,
}

impl ReplicationBaseline {
    pub fn is_empty(&self) -> bool {
        self.item_keys.is_empty()
    }
}

/// Wire unit for synergy count replication.
///
/// A `full` frame replaces the observer's collection; otherwise `changed`
/// entries are upserted by id and `removed` ids are dropped. `hash` covers
/// the authority's complete entry list after the frame is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynergyCountFrame {
    pub tick: u64,
    pub full: bool,
    pub array_replication_key: u32,
    pub changed: Vec<SynergyCountEntry>,
    pub removed: Vec<u64>,
    pub hash: u64,
}

impl SynergyCountFrame {
    pub fn is_empty(&self) -> bool {
        !self.full && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Observer-side copy of the replicated collection. Read-only apart from
/// [`SynergyCountMirror::apply`].
#[derive(Debug, Clone, Default)]
pub struct SynergyCountMirror {
    entries: Vec<SynergyCountEntry>,
    array_replication_key: u32,
}

impl SynergyCountMirror {
    pub fn entries(&self) -> &[SynergyCountEntry] {
        &self.entries
    }

    pub fn array_replication_key(&self) -> u32 {
        self.array_replication_key
    }

    pub fn count(&self, tag: &GameplayTag) -> Option<i32> {
        self.entries
            .iter()
            .find(|entry| &entry.tag == tag)
            .map(|entry| entry.count)
    }

    pub fn to_map(&self) -> BTreeMap<GameplayTag, i32> {
        self.entries
            .iter()
            .map(|entry| (entry.tag.clone(), entry.count))
            .collect()
    }

    pub fn hash(&self) -> u64 {
        hash_entries(&self.entries)
    }

    /// Apply a frame. Returns `true` when the visible entries changed.
    pub fn apply(&mut self, frame: &SynergyCountFrame) -> bool {
        let mut changed = false;
        if frame.full && !self.entries.is_empty() {
            self.entries.clear();
            changed = true;
        }

        if !frame.removed.is_empty() {
            let before = self.entries.len();
            self.entries
                .retain(|entry| !frame.removed.contains(&entry.replication_id));
            changed |= self.entries.len() != before;
        }

        for incoming in &frame.changed {
            match self
                .entries
                .binary_search_by_key(&incoming.replication_id, |entry| entry.replication_id)
            {
                Ok(index) => {
                    let existing = &mut self.entries[index];
                    if existing.tag != incoming.tag || existing.count != incoming.count {
                        changed = true;
                    }
                    *existing = incoming.clone();
                }
                Err(index) => {
                    self.entries.insert(index, incoming.clone());
                    changed = true;
                }
            }
        }

        self.array_replication_key = frame.array_replication_key;
        changed
    }
}

/// Stable hash over the `(tag, count)` pairs in order.
pub fn hash_entries(entries: &[SynergyCountEntry]) -> u64 {
    let mut hasher = FnvHasher::new();
    for entry in entries {
        hasher.write_bytes(entry.tag.as_str().as_bytes());
        hasher.write_bytes(&[0xff]);
        hasher.write_bytes(&entry.count.to_le_bytes());
    }
    hasher.finish()
}
