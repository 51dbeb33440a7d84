//! Synergy definition table.
//!
//! Loaded from `synergy_definitions.json` with support for an environment
//! variable override. Malformed definitions are logged and skipped; the rest
//! of the table stays usable.

use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};
use synergy_schema::GameplayTag;
use thiserror::Error;

pub const BUILTIN_SYNERGY_DEFINITIONS: &str = include_str!("data/synergy_definitions.json");

/// Behaviour used when a definition does not name one.
pub const STANDARD_BEHAVIOR: &str = "standard";

/// Rule selecting which roster members receive a tier's grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientPolicy {
    RandomAmongOwners,
    #[default]
    AllOwners,
    RandomAmongAllies,
    AllAllies,
    /// Recipients are chosen by the definition's behaviour.
    Custom,
}

impl RecipientPolicy {
    pub fn is_random(self) -> bool {
        matches!(
            self,
            RecipientPolicy::RandomAmongOwners | RecipientPolicy::RandomAmongAllies
        )
    }

    /// Owner policies only consider members that carry the category tag.
    pub fn requires_ownership(self) -> bool {
        matches!(
            self,
            RecipientPolicy::AllOwners | RecipientPolicy::RandomAmongOwners
        )
    }

    /// Random picks are only drawn while a combat phase is active.
    pub fn is_phase_scoped(self) -> bool {
        self.is_random()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SynergyTier {
    pub threshold: i32,
    pub recipient_policy: RecipientPolicy,
    pub pick_count: Option<u32>,
}

impl SynergyTier {
    /// Number of random picks; validated to be at least one for random policies.
    pub fn pick_count(&self) -> usize {
        self.pick_count.unwrap_or(1).max(1) as usize
    }
}

/// Continuous stat modifier applied to each recipient.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSpec {
    pub effect: Option<String>,
    pub stat: Option<String>,
    pub magnitude_per_level: f32,
}

impl EffectSpec {
    pub fn is_valid(&self) -> bool {
        self.effect
            .as_deref()
            .map(|effect| !effect.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Action (ability) granted to each recipient for the duration of a combat phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionGrant {
    pub ability_tag: Option<GameplayTag>,
    pub ability: Option<String>,
}

impl ActionGrant {
    pub fn is_valid(&self) -> bool {
        let tag_ok = self
            .ability_tag
            .as_ref()
            .map(GameplayTag::is_valid)
            .unwrap_or(false);
        let ability_ok = self
            .ability
            .as_deref()
            .map(|ability| !ability.trim().is_empty())
            .unwrap_or(false);
        tag_ok && ability_ok
    }
}

/// Raw, unvalidated definition as it appears in the JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SynergyDefinitionEntry {
    pub tag: Option<GameplayTag>,
    pub display_name: Option<String>,
    pub behavior: Option<String>,
    pub tiers: Vec<SynergyTier>,
    pub effects: Vec<EffectSpec>,
    pub actions: Vec<ActionGrant>,
    pub activation_cue: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SynergyDefinitionFile {
    pub version: u32,
    pub definitions: Vec<SynergyDefinitionEntry>,
}

/// Validated, immutable category definition.
#[derive(Debug, Clone, PartialEq)]
pub struct SynergyDefinition {
    pub tag: GameplayTag,
    pub display_name: String,
    pub behavior: String,
    pub tiers: Vec<SynergyTier>,
    pub effects: Vec<EffectSpec>,
    pub actions: Vec<ActionGrant>,
    pub activation_cue: Option<String>,
}

impl SynergyDefinition {
    /// Highest tier whose threshold is satisfied by `count`.
    pub fn resolve_tier(&self, count: i32) -> Option<usize> {
        self.tiers.iter().rposition(|tier| count >= tier.threshold)
    }

    pub fn tier(&self, index: usize) -> Option<&SynergyTier> {
        self.tiers.get(index)
    }

    pub fn thresholds(&self) -> Vec<i32> {
        self.tiers.iter().map(|tier| tier.threshold).collect()
    }

    fn from_entry(entry: SynergyDefinitionEntry) -> Result<Self, DefinitionIssue> {
        let tag = match entry.tag {
            Some(tag) if tag.is_valid() => tag,
            _ => return Err(DefinitionIssue::MissingTag),
        };
        if entry.tiers.is_empty() {
            return Err(DefinitionIssue::EmptyTiers { tag });
        }

        let mut previous: Option<i32> = None;
        for (index, tier) in entry.tiers.iter().enumerate() {
            if tier.threshold < 1 {
                return Err(DefinitionIssue::ThresholdBelowOne { tag, index });
            }
            if let Some(prev) = previous {
                if tier.threshold <= prev {
                    return Err(DefinitionIssue::ThresholdsNotIncreasing { tag, index });
                }
            }
            if tier.recipient_policy.is_random() && tier.pick_count.unwrap_or(0) < 1 {
                return Err(DefinitionIssue::MissingPickCount { tag, index });
            }
            previous = Some(tier.threshold);
        }

        let display_name = entry
            .display_name
            .unwrap_or_else(|| tag.as_str().rsplit('.').next().unwrap_or_default().to_string());
        let behavior = entry
            .behavior
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| STANDARD_BEHAVIOR.to_string());

        Ok(Self {
            tag,
            display_name,
            behavior,
            tiers: entry.tiers,
            effects: entry.effects,
            actions: entry.actions,
            activation_cue: entry.activation_cue,
        })
    }
}

/// Reason a definition was dropped from the table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionIssue {
    #[error("definition has no valid tag")]
    MissingTag,
    #[error("duplicate synergy tag {tag}")]
    DuplicateTag { tag: GameplayTag },
    #[error("synergy {tag} defines no tiers")]
    EmptyTiers { tag: GameplayTag },
    #[error("synergy {tag} tier {index} has a threshold below 1")]
    ThresholdBelowOne { tag: GameplayTag, index: usize },
    #[error("synergy {tag} tier {index} does not raise the threshold")]
    ThresholdsNotIncreasing { tag: GameplayTag, index: usize },
    #[error("synergy {tag} tier {index} uses a random policy without a pick count")]
    MissingPickCount { tag: GameplayTag, index: usize },
    #[error("synergy {tag} names unknown behaviour {behavior:?}")]
    UnknownBehavior { tag: GameplayTag, behavior: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionRejection {
    pub index: usize,
    pub issue: DefinitionIssue,
}

#[derive(Debug, Error)]
pub enum SynergyDefinitionError {
    #[error("failed to parse synergy definitions: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read synergy definitions from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Read-only table of validated definitions keyed by category tag.
#[derive(Debug, Clone, Default)]
pub struct SynergyDefinitionSet {
    definitions: BTreeMap<GameplayTag, Arc<SynergyDefinition>>,
    /// Position of each accepted definition in its source file.
    source_index: BTreeMap<GameplayTag, usize>,
    rejected: Vec<DefinitionRejection>,
}

impl SynergyDefinitionSet {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            Self::from_json_str(BUILTIN_SYNERGY_DEFINITIONS)
                .expect("builtin synergy definitions should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, SynergyDefinitionError> {
        let file: SynergyDefinitionFile = serde_json::from_str(json)?;
        Ok(Self::from_entries(file.definitions))
    }

    pub fn from_file(path: &Path) -> Result<Self, SynergyDefinitionError> {
        let contents = fs::read_to_string(path).map_err(|source| SynergyDefinitionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Validate entries one by one; invalid ones are logged and skipped.
    pub fn from_entries(entries: Vec<SynergyDefinitionEntry>) -> Self {
        let mut set = Self::default();
        for (index, entry) in entries.into_iter().enumerate() {
            let outcome = SynergyDefinition::from_entry(entry).and_then(|definition| {
                if set.definitions.contains_key(&definition.tag) {
                    Err(DefinitionIssue::DuplicateTag {
                        tag: definition.tag,
                    })
                } else {
                    Ok(definition)
                }
            });

            match outcome {
                Ok(definition) => {
                    set.source_index.insert(definition.tag.clone(), index);
                    set.definitions
                        .insert(definition.tag.clone(), Arc::new(definition));
                }
                Err(issue) => {
                    tracing::warn!(
                        target: "synergy::config",
                        index,
                        issue = %issue,
                        "definitions.entry_skipped"
                    );
                    set.rejected.push(DefinitionRejection { index, issue });
                }
            }
        }
        set
    }

    /// Drop definitions whose behaviour `is_known` rejects, recording each
    /// as a rejection. Returns `None` when every behaviour is known.
    pub fn without_unknown_behaviors<F>(&self, is_known: F) -> Option<Self>
    where
        F: Fn(&str) -> bool,
    {
        if self
            .definitions
            .values()
            .all(|definition| is_known(definition.behavior.as_str()))
        {
            return None;
        }

        let mut set = self.clone();
        set.definitions.retain(|tag, definition| {
            if is_known(definition.behavior.as_str()) {
                return true;
            }
            let index = self.source_index.get(tag).copied().unwrap_or_default();
            let issue = DefinitionIssue::UnknownBehavior {
                tag: tag.clone(),
                behavior: definition.behavior.clone(),
            };
            tracing::warn!(
                target: "synergy::config",
                index,
                issue = %issue,
                "definitions.entry_skipped"
            );
            set.rejected.push(DefinitionRejection { index, issue });
            false
        });
        let kept = &set.definitions;
        set.source_index.retain(|tag, _| kept.contains_key(tag));
        set.rejected.sort_by_key(|rejection| rejection.index);
        Some(set)
    }

    pub fn get(&self, tag: &GameplayTag) -> Option<&Arc<SynergyDefinition>> {
        self.definitions.get(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SynergyDefinition>> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn rejected(&self) -> &[DefinitionRejection] {
        &self.rejected
    }

    /// Thresholds for `tag`, empty when the category is undefined.
    pub fn thresholds(&self, tag: &GameplayTag) -> Vec<i32> {
        self.get(tag)
            .map(|definition| definition.thresholds())
            .unwrap_or_default()
    }

    pub fn tier_index(&self, tag: &GameplayTag, count: i32) -> Option<usize> {
        self.get(tag)
            .and_then(|definition| definition.resolve_tier(count))
    }
}

/// Handle for accessing the definition table.
#[derive(Resource, Debug, Clone)]
pub struct SynergyDefinitionsHandle(pub Arc<SynergyDefinitionSet>);

impl SynergyDefinitionsHandle {
    pub fn new(definitions: Arc<SynergyDefinitionSet>) -> Self {
        Self(definitions)
    }

    pub fn get(&self) -> Arc<SynergyDefinitionSet> {
        Arc::clone(&self.0)
    }
}

/// Where the active definition table came from.
#[derive(Resource, Debug, Clone)]
pub struct SynergyDefinitionsMetadata {
    path: Option<PathBuf>,
}

impl SynergyDefinitionsMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

/// Load definitions from `SYNERGY_DEFINITIONS_PATH` or the crate's data file,
/// falling back to the builtin table.
pub fn load_synergy_definitions_from_env(
) -> (Arc<SynergyDefinitionSet>, SynergyDefinitionsMetadata) {
    let override_path = env::var("SYNERGY_DEFINITIONS_PATH").ok().map(PathBuf::from);
    let path = override_path.unwrap_or_else(|| {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/data/synergy_definitions.json")
    });

    match SynergyDefinitionSet::from_file(&path) {
        Ok(definitions) => {
            tracing::info!(
                target: "synergy::config",
                path = %path.display(),
                definitions = definitions.len(),
                rejected = definitions.rejected().len(),
                "definitions.loaded=file"
            );
            return (
                Arc::new(definitions),
                SynergyDefinitionsMetadata::new(Some(path)),
            );
        }
        Err(err) => {
            tracing::warn!(
                target: "synergy::config",
                path = %path.display(),
                error = %err,
                "definitions.load_failed"
            );
        }
    }

    let definitions = SynergyDefinitionSet::builtin();
    tracing::info!(
        target: "synergy::config",
        definitions = definitions.len(),
        "definitions.loaded=builtin"
    );
    (definitions, SynergyDefinitionsMetadata::new(None))
}
