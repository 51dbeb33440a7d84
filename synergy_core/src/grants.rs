use std::collections::BTreeMap;

use bevy::prelude::*;
use synergy_schema::GameplayTag;

use crate::definitions::{ActionGrant, EffectSpec};
use crate::roster::MemberId;

/// Opaque handle returned by a [`GrantSink`]; revocable exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GrantHandle(u64);

impl GrantHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Applies and removes derived game effects on roster members.
///
/// Implementations must treat a handle as invalid once it has been revoked;
/// revoking an invalid handle returns `false` and has no other effect.
pub trait GrantSink {
    fn grant_continuous_effect(
        &mut self,
        holder: MemberId,
        payload: &EffectSpec,
        level: u32,
    ) -> Option<GrantHandle>;

    fn revoke_continuous_effect(&mut self, holder: MemberId, handle: GrantHandle) -> bool;

    fn grant_action(
        &mut self,
        holder: MemberId,
        payload: &ActionGrant,
        level: u32,
    ) -> Option<GrantHandle>;

    fn revoke_action(&mut self, holder: MemberId, handle: GrantHandle) -> bool;
}

/// Active grants of one kind, keyed by holder.
///
/// A holder is present iff it currently has at least one live handle from the
/// owning handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantLedger {
    holders: BTreeMap<MemberId, Vec<GrantHandle>>,
}

impl GrantLedger {
    /// Record `handles` for `holder`. Returns `false` without touching the
    /// ledger when the holder already has grants or `handles` is empty.
    pub fn insert(&mut self, holder: MemberId, handles: Vec<GrantHandle>) -> bool {
        if handles.is_empty() || self.holders.contains_key(&holder) {
            return false;
        }
        self.holders.insert(holder, handles);
        true
    }

    pub fn take(&mut self, holder: MemberId) -> Option<Vec<GrantHandle>> {
        self.holders.remove(&holder)
    }

    pub fn drain(&mut self) -> Vec<(MemberId, Vec<GrantHandle>)> {
        std::mem::take(&mut self.holders).into_iter().collect()
    }

    pub fn contains(&self, holder: MemberId) -> bool {
        self.holders.contains_key(&holder)
    }

    pub fn holders(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.holders.keys().copied()
    }

    pub fn handles(&self, holder: MemberId) -> &[GrantHandle] {
        self.holders
            .get(&holder)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveEffect {
    pub holder: MemberId,
    pub effect: String,
    pub stat: Option<String>,
    pub level: u32,
    pub magnitude: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveAction {
    pub holder: MemberId,
    pub ability_tag: GameplayTag,
    pub ability: String,
    pub level: u32,
}

/// In-process grant sink: records granted effects and actions per unit.
#[derive(Resource, Debug, Default)]
pub struct UnitAbilityGrants {
    next_handle: u64,
    effects: BTreeMap<GrantHandle, ActiveEffect>,
    actions: BTreeMap<GrantHandle, ActiveAction>,
    stale_revocations: u64,
}

impl UnitAbilityGrants {
    fn allocate(&mut self) -> GrantHandle {
        self.next_handle += 1;
        GrantHandle(self.next_handle)
    }

    pub fn effect(&self, handle: GrantHandle) -> Option<&ActiveEffect> {
        self.effects.get(&handle)
    }

    pub fn effects_for(&self, holder: MemberId) -> impl Iterator<Item = &ActiveEffect> + '_ {
        self.effects
            .values()
            .filter(move |effect| effect.holder == holder)
    }

    pub fn actions_for(&self, holder: MemberId) -> impl Iterator<Item = &ActiveAction> + '_ {
        self.actions
            .values()
            .filter(move |action| action.holder == holder)
    }

    /// Summed magnitude of every active effect modifying `stat` on `holder`.
    pub fn stat_bonus(&self, holder: MemberId, stat: &str) -> f32 {
        self.effects_for(holder)
            .filter(|effect| effect.stat.as_deref() == Some(stat))
            .map(|effect| effect.magnitude)
            .sum()
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn stale_revocations(&self) -> u64 {
        self.stale_revocations
    }
}

impl GrantSink for UnitAbilityGrants {
    fn grant_continuous_effect(
        &mut self,
        holder: MemberId,
        payload: &EffectSpec,
        level: u32,
    ) -> Option<GrantHandle> {
        let effect = payload.effect.as_deref()?.trim();
        if effect.is_empty() {
            return None;
        }
        let record = ActiveEffect {
            holder,
            effect: effect.to_string(),
            stat: payload.stat.clone(),
            level,
            magnitude: payload.magnitude_per_level * level as f32,
        };
        let handle = self.allocate();
        self.effects.insert(handle, record);
        Some(handle)
    }

    fn revoke_continuous_effect(&mut self, holder: MemberId, handle: GrantHandle) -> bool {
        match self.effects.get(&handle) {
            Some(effect) if effect.holder == holder => {
                self.effects.remove(&handle);
                true
            }
            _ => {
                tracing::trace!(
                    target: "synergy::handler",
                    holder = holder.0,
                    handle = handle.raw(),
                    "grants.stale_effect_revoke"
                );
                self.stale_revocations += 1;
                false
            }
        }
    }

    fn grant_action(
        &mut self,
        holder: MemberId,
        payload: &ActionGrant,
        level: u32,
    ) -> Option<GrantHandle> {
        if !payload.is_valid() {
            return None;
        }
        let ability_tag = payload.ability_tag.clone()?;
        let ability = payload.ability.clone()?;
        let handle = self.allocate();
        self.actions.insert(
            handle,
            ActiveAction {
                holder,
                ability_tag,
                ability,
                level,
            },
        );
        Some(handle)
    }

    fn revoke_action(&mut self, holder: MemberId, handle: GrantHandle) -> bool {
        match self.actions.get(&handle) {
            Some(action) if action.holder == holder => {
                self.actions.remove(&handle);
                true
            }
            _ => {
                tracing::trace!(
                    target: "synergy::handler",
                    holder = holder.0,
                    handle = handle.raw(),
                    "grants.stale_action_revoke"
                );
                self.stale_revocations += 1;
                false
            }
        }
    }
}
