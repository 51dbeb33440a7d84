use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered set of tags. Ordering keeps iteration deterministic across runs.
pub type TagSet = BTreeSet<GameplayTag>;

/// Hierarchical, dot-separated identifier (`Synergy.Fire`, `Game.State.Combat.Active`).
///
/// Equality is exact. [`GameplayTag::matches`] implements the hierarchical
/// "is-a" test used when scanning a unit's tags for synergy categories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameplayTag(String);

impl GameplayTag {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.len() == name.len() {
            Self(name)
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A tag is valid when it is non-empty and has no empty segments.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0.split('.').all(|segment| !segment.is_empty())
    }

    /// `true` when `self` equals `parent` or sits anywhere below it.
    pub fn matches(&self, parent: &GameplayTag) -> bool {
        if !self.is_valid() || !parent.is_valid() {
            return false;
        }
        match self.0.strip_prefix(parent.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('.'),
            None => false,
        }
    }

    pub fn parent(&self) -> Option<GameplayTag> {
        self.0
            .rsplit_once('.')
            .map(|(head, _)| GameplayTag(head.to_string()))
    }

    pub fn depth(&self) -> usize {
        if self.0.is_empty() {
            0
        } else {
            self.0.split('.').count()
        }
    }
}

impl fmt::Display for GameplayTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameplayTag {
    fn from(value: &str) -> Self {
        GameplayTag::new(value)
    }
}

impl From<String> for GameplayTag {
    fn from(value: String) -> Self {
        GameplayTag::new(value)
    }
}

/// Collect the tags from `tags` that fall under `namespace`.
pub fn tags_under<'a, I>(tags: I, namespace: &GameplayTag) -> TagSet
where
    I: IntoIterator<Item = &'a GameplayTag>,
{
    tags.into_iter()
        .filter(|tag| tag.matches(namespace))
        .cloned()
        .collect()
}
