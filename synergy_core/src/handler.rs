//! Per-category tier resolution, recipient selection and grant bookkeeping.

use std::{collections::BTreeMap, fmt, sync::Arc};

use bevy::prelude::Resource;
use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use synergy_schema::{stable_hash, GameplayTag};

use crate::definitions::{
    RecipientPolicy, SynergyDefinition, SynergyDefinitionSet, SynergyTier, STANDARD_BEHAVIOR,
};
use crate::grants::{GrantLedger, GrantSink};
use crate::roster::{MemberId, MemberSnapshot};

/// Everything a handler needs to (re)apply its category.
#[derive(Debug, Clone, Copy)]
pub struct SynergyApplyParams<'a> {
    pub tag: &'a GameplayTag,
    pub count: i32,
    /// Live roster members, ordered by id.
    pub members: &'a [MemberSnapshot],
    pub authority: bool,
    pub combat_active: bool,
}

impl<'a> SynergyApplyParams<'a> {
    pub fn owners(&self) -> impl Iterator<Item = &'a MemberSnapshot> + 'a {
        let tag = self.tag;
        self.members.iter().filter(move |member| member.owns(tag))
    }
}

/// Category-specific behaviour plugged into a [`SynergyHandler`].
pub trait SynergyBehavior: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Tier the handler should treat as active.
    fn active_tier(
        &self,
        definition: &SynergyDefinition,
        params: &SynergyApplyParams<'_>,
    ) -> Option<usize> {
        definition.resolve_tier(params.count)
    }

    /// Recipients for tiers using [`RecipientPolicy::Custom`].
    fn custom_recipients(
        &self,
        _definition: &SynergyDefinition,
        _tier: &SynergyTier,
        _params: &SynergyApplyParams<'_>,
        _rng: &mut SmallRng,
    ) -> Vec<MemberId> {
        Vec::new()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StandardBehavior;

impl SynergyBehavior for StandardBehavior {
    fn name(&self) -> &str {
        STANDARD_BEHAVIOR
    }
}

/// Custom recipients are the first `pick_count` owners in roster order.
#[derive(Debug, Default, Clone, Copy)]
pub struct VanguardBehavior;

impl SynergyBehavior for VanguardBehavior {
    fn name(&self) -> &str {
        "vanguard"
    }

    fn custom_recipients(
        &self,
        _definition: &SynergyDefinition,
        tier: &SynergyTier,
        params: &SynergyApplyParams<'_>,
        _rng: &mut SmallRng,
    ) -> Vec<MemberId> {
        params
            .owners()
            .take(tier.pick_count())
            .map(|member| member.id)
            .collect()
    }
}

/// Named behaviours available to definitions.
#[derive(Resource, Debug, Clone)]
pub struct SynergyBehaviorRegistry {
    behaviors: BTreeMap<String, Arc<dyn SynergyBehavior>>,
}

impl Default for SynergyBehaviorRegistry {
    fn default() -> Self {
        let mut registry = Self {
            behaviors: BTreeMap::new(),
        };
        registry.register(Arc::new(StandardBehavior));
        registry.register(Arc::new(VanguardBehavior));
        registry
    }
}

impl SynergyBehaviorRegistry {
    /// Register a behaviour, replacing any previous one with the same name.
    pub fn register(&mut self, behavior: Arc<dyn SynergyBehavior>) {
        self.behaviors
            .insert(behavior.name().to_ascii_lowercase(), behavior);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SynergyBehavior>> {
        self.behaviors.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.behaviors.keys().map(String::as_str)
    }

    /// Definitions naming an unregistered behaviour are treated as
    /// configuration errors and removed from the table.
    pub fn retain_known(
        &self,
        definitions: Arc<SynergyDefinitionSet>,
    ) -> Arc<SynergyDefinitionSet> {
        match definitions.without_unknown_behaviors(|name| self.get(name).is_some()) {
            Some(filtered) => Arc::new(filtered),
            None => definitions,
        }
    }
}

/// Owns the grant ledgers for one category.
#[derive(Debug)]
pub struct SynergyHandler {
    definition: Arc<SynergyDefinition>,
    behavior: Arc<dyn SynergyBehavior>,
    cached_tier: Option<usize>,
    effect_grants: GrantLedger,
    action_grants: GrantLedger,
    rng: SmallRng,
}

impl SynergyHandler {
    pub fn new(
        definition: Arc<SynergyDefinition>,
        behavior: Arc<dyn SynergyBehavior>,
        seed: u64,
    ) -> Self {
        let rng = SmallRng::seed_from_u64(seed ^ stable_hash(definition.tag.as_str()));
        Self {
            definition,
            behavior,
            cached_tier: None,
            effect_grants: GrantLedger::default(),
            action_grants: GrantLedger::default(),
            rng,
        }
    }

    pub fn tag(&self) -> &GameplayTag {
        &self.definition.tag
    }

    pub fn definition(&self) -> &Arc<SynergyDefinition> {
        &self.definition
    }

    pub fn behavior_name(&self) -> &str {
        self.behavior.name()
    }

    pub fn cached_tier(&self) -> Option<usize> {
        self.cached_tier
    }

    pub fn effect_grants(&self) -> &GrantLedger {
        &self.effect_grants
    }

    pub fn action_grants(&self) -> &GrantLedger {
        &self.action_grants
    }

    /// Resolve the tier for `params.count` and bring continuous-effect grants
    /// in line with it.
    ///
    /// Random-subset tiers are deferred until a combat phase is active and
    /// redraw their recipients on every call while it is.
    pub fn apply(&mut self, params: &SynergyApplyParams<'_>, sink: &mut dyn GrantSink) {
        if !params.authority {
            return;
        }
        self.apply_effects(params, sink);
    }

    /// Combat started: grant phase-scoped effects and every action payload.
    pub fn phase_active_grant(
        &mut self,
        params: &SynergyApplyParams<'_>,
        sink: &mut dyn GrantSink,
    ) {
        if !params.authority {
            return;
        }
        self.revoke_actions(sink);

        let active = SynergyApplyParams {
            combat_active: true,
            ..*params
        };
        let Some((index, recipients)) = self.apply_effects(&active, sink) else {
            return;
        };
        self.grant_actions(&recipients, index, sink);
    }

    /// Combat ended: drop every action grant and any phase-scoped effects.
    pub fn phase_end_revoke(&mut self, authority: bool, sink: &mut dyn GrantSink) {
        if !authority {
            return;
        }
        self.revoke_actions(sink);
        if self.cached_policy().is_some_and(RecipientPolicy::is_phase_scoped) {
            self.revoke_effects(sink);
        }
    }

    /// Revoke everything `holder` received from this handler. Returns `true`
    /// when the holder had any grant.
    pub fn revoke_holder(&mut self, holder: MemberId, sink: &mut dyn GrantSink) -> bool {
        let mut had_grant = false;
        if let Some(handles) = self.effect_grants.take(holder) {
            had_grant = true;
            for handle in handles {
                sink.revoke_continuous_effect(holder, handle);
            }
        }
        if let Some(handles) = self.action_grants.take(holder) {
            had_grant = true;
            for handle in handles {
                sink.revoke_action(holder, handle);
            }
        }
        had_grant
    }

    /// Revoke every grant and forget the cached tier.
    pub fn reset_all(&mut self, sink: &mut dyn GrantSink) {
        self.revoke_effects(sink);
        self.revoke_actions(sink);
        self.cached_tier = None;
    }

    /// Owners to play activation feedback on, with the active tier index.
    pub fn pulse_recipients(
        &self,
        params: &SynergyApplyParams<'_>,
    ) -> Option<(usize, Vec<MemberId>)> {
        let index = self.behavior.active_tier(&self.definition, params)?;
        let owners: Vec<MemberId> = params.owners().map(|member| member.id).collect();
        if owners.is_empty() {
            return None;
        }
        Some((index, owners))
    }

    /// Policy of the cached tier, if any tier is active.
    pub fn cached_policy(&self) -> Option<RecipientPolicy> {
        self.cached_tier
            .and_then(|index| self.definition.tier(index))
            .map(|tier| tier.recipient_policy)
    }

    /// Returns the active tier and its recipients when effects were (re)applied.
    fn apply_effects(
        &mut self,
        params: &SynergyApplyParams<'_>,
        sink: &mut dyn GrantSink,
    ) -> Option<(usize, Vec<MemberId>)> {
        let resolved = self.behavior.active_tier(&self.definition, params);
        if resolved != self.cached_tier {
            tracing::trace!(
                target: "synergy::handler",
                tag = %self.definition.tag,
                from = ?self.cached_tier,
                to = ?resolved,
                count = params.count,
                "handler.tier_changed"
            );
            self.revoke_effects(sink);
            self.cached_tier = resolved;
        }

        let index = resolved?;
        let tier = *self.definition.tier(index)?;

        if tier.recipient_policy.is_random() {
            if !params.combat_active {
                tracing::trace!(
                    target: "synergy::handler",
                    tag = %self.definition.tag,
                    tier = index,
                    "handler.grant_deferred"
                );
                return None;
            }
            self.revoke_effects(sink);
        }

        let recipients = self.select_recipients(&tier, params);
        if !tier.recipient_policy.is_random() {
            self.prune_ineligible(&recipients, sink);
        }
        self.grant_effects(&recipients, index, sink);
        Some((index, recipients))
    }

    fn select_recipients(
        &mut self,
        tier: &SynergyTier,
        params: &SynergyApplyParams<'_>,
    ) -> Vec<MemberId> {
        let candidates: Vec<MemberId> = match tier.recipient_policy {
            RecipientPolicy::AllOwners | RecipientPolicy::RandomAmongOwners => {
                params.owners().map(|member| member.id).collect()
            }
            RecipientPolicy::AllAllies | RecipientPolicy::RandomAmongAllies => {
                params.members.iter().map(|member| member.id).collect()
            }
            RecipientPolicy::Custom => {
                let mut picked =
                    self.behavior
                        .custom_recipients(&self.definition, tier, params, &mut self.rng);
                picked.sort_unstable();
                picked.dedup();
                return picked;
            }
        };

        if !tier.recipient_policy.is_random() {
            return candidates;
        }
        let pick = tier.pick_count().min(candidates.len());
        let mut picked: Vec<MemberId> = candidates
            .choose_multiple(&mut self.rng, pick)
            .copied()
            .collect();
        picked.sort_unstable();
        picked
    }

    fn prune_ineligible(&mut self, recipients: &[MemberId], sink: &mut dyn GrantSink) {
        let stale: Vec<MemberId> = self
            .effect_grants
            .holders()
            .filter(|holder| !recipients.contains(holder))
            .collect();
        for holder in stale {
            if let Some(handles) = self.effect_grants.take(holder) {
                for handle in handles {
                    sink.revoke_continuous_effect(holder, handle);
                }
            }
        }
    }

    fn grant_effects(&mut self, recipients: &[MemberId], index: usize, sink: &mut dyn GrantSink) {
        let level = index as u32 + 1;
        for &holder in recipients {
            if self.effect_grants.contains(holder) {
                continue;
            }
            let handles: Vec<_> = self
                .definition
                .effects
                .iter()
                .filter(|payload| payload.is_valid())
                .filter_map(|payload| sink.grant_continuous_effect(holder, payload, level))
                .collect();
            if self.effect_grants.insert(holder, handles) {
                tracing::trace!(
                    target: "synergy::handler",
                    tag = %self.definition.tag,
                    holder = holder.0,
                    level,
                    "handler.effect_granted"
                );
            }
        }
    }

    fn grant_actions(&mut self, recipients: &[MemberId], index: usize, sink: &mut dyn GrantSink) {
        let level = index as u32 + 1;
        for &holder in recipients {
            if self.action_grants.contains(holder) {
                continue;
            }
            let handles: Vec<_> = self
                .definition
                .actions
                .iter()
                .filter(|payload| payload.is_valid())
                .filter_map(|payload| sink.grant_action(holder, payload, level))
                .collect();
            self.action_grants.insert(holder, handles);
        }
    }

    fn revoke_effects(&mut self, sink: &mut dyn GrantSink) {
        for (holder, handles) in self.effect_grants.drain() {
            for handle in handles {
                sink.revoke_continuous_effect(holder, handle);
            }
        }
    }

    fn revoke_actions(&mut self, sink: &mut dyn GrantSink) {
        for (holder, handles) in self.action_grants.drain() {
            for handle in handles {
                sink.revoke_action(holder, handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{ActionGrant, EffectSpec, SynergyDefinitionEntry, SynergyDefinitionSet};
    use crate::grants::UnitAbilityGrants;
    use synergy_schema::TagSet;

    fn definition(tag: &str, tiers: Vec<SynergyTier>) -> Arc<SynergyDefinition> {
        let set = SynergyDefinitionSet::from_entries(vec![SynergyDefinitionEntry {
            tag: Some(GameplayTag::new(tag)),
            tiers,
            effects: vec![EffectSpec {
                effect: Some(format!("Effect.{tag}")),
                stat: Some("power".into()),
                magnitude_per_level: 1.0,
            }],
            actions: vec![ActionGrant {
                ability_tag: Some(GameplayTag::new("Unit.Ability.Test")),
                ability: Some("Ability.Test".into()),
            }],
            ..Default::default()
        }]);
        Arc::clone(set.get(&GameplayTag::new(tag)).expect("definition is valid"))
    }

    fn tier(threshold: i32, policy: RecipientPolicy, pick: Option<u32>) -> SynergyTier {
        SynergyTier {
            threshold,
            recipient_policy: policy,
            pick_count: pick,
        }
    }

    fn member(id: u64, tags: &[&str]) -> MemberSnapshot {
        MemberSnapshot {
            id: MemberId(id),
            archetype: GameplayTag::new(format!("Unit.Kind.K{id}")),
            category_tags: tags.iter().map(|t| GameplayTag::new(*t)).collect::<TagSet>(),
        }
    }

    fn params<'a>(
        tag: &'a GameplayTag,
        count: i32,
        members: &'a [MemberSnapshot],
        combat_active: bool,
    ) -> SynergyApplyParams<'a> {
        SynergyApplyParams {
            tag,
            count,
            members,
            authority: true,
            combat_active,
        }
    }

    fn handler(definition: Arc<SynergyDefinition>) -> SynergyHandler {
        SynergyHandler::new(definition, Arc::new(StandardBehavior), 7)
    }

    #[test]
    fn all_owners_grants_once_per_holder() {
        let def = definition("Synergy.Fire", vec![tier(2, RecipientPolicy::AllOwners, None)]);
        let tag = def.tag.clone();
        let mut handler = handler(def);
        let mut sink = UnitAbilityGrants::default();
        let members = vec![
            member(1, &["Synergy.Fire"]),
            member(2, &["Synergy.Fire"]),
            member(3, &[]),
        ];

        handler.apply(&params(&tag, 2, &members, false), &mut sink);
        handler.apply(&params(&tag, 2, &members, false), &mut sink);

        let holders: Vec<_> = handler.effect_grants().holders().collect();
        assert_eq!(holders, vec![MemberId(1), MemberId(2)]);
        assert_eq!(sink.effect_count(), 2);
    }

    #[test]
    fn observers_never_grant() {
        let def = definition("Synergy.Fire", vec![tier(1, RecipientPolicy::AllAllies, None)]);
        let tag = def.tag.clone();
        let mut handler = handler(def);
        let mut sink = UnitAbilityGrants::default();
        let members = vec![member(1, &["Synergy.Fire"])];
        let mut observer = params(&tag, 1, &members, true);
        observer.authority = false;

        handler.apply(&observer, &mut sink);
        handler.phase_active_grant(&observer, &mut sink);
        assert_eq!(sink.effect_count() + sink.action_count(), 0);
        assert_eq!(handler.cached_tier(), None);
    }

    #[test]
    fn random_tier_waits_for_combat_and_ends_with_it() {
        let def = definition(
            "Synergy.Assassin",
            vec![tier(2, RecipientPolicy::RandomAmongOwners, Some(1))],
        );
        let tag = def.tag.clone();
        let mut handler = handler(def);
        let mut sink = UnitAbilityGrants::default();
        let members = vec![
            member(1, &["Synergy.Assassin"]),
            member(2, &["Synergy.Assassin"]),
        ];

        handler.apply(&params(&tag, 2, &members, false), &mut sink);
        assert_eq!(handler.cached_tier(), Some(0));
        assert!(handler.effect_grants().is_empty());

        handler.phase_active_grant(&params(&tag, 2, &members, false), &mut sink);
        assert_eq!(handler.effect_grants().len(), 1);
        assert_eq!(handler.action_grants().len(), 1);
        let effect_holder: Vec<_> = handler.effect_grants().holders().collect();
        let action_holder: Vec<_> = handler.action_grants().holders().collect();
        assert_eq!(effect_holder, action_holder);

        handler.phase_end_revoke(true, &mut sink);
        assert!(handler.effect_grants().is_empty());
        assert!(handler.action_grants().is_empty());
        assert_eq!(sink.effect_count() + sink.action_count(), 0);
        assert_eq!(sink.stale_revocations(), 0);
    }

    #[test]
    fn random_pick_is_capped_by_candidates() {
        let def = definition(
            "Synergy.Mystic",
            vec![tier(1, RecipientPolicy::RandomAmongAllies, Some(5))],
        );
        let tag = def.tag.clone();
        let mut handler = handler(def);
        let mut sink = UnitAbilityGrants::default();
        let members = vec![member(1, &["Synergy.Mystic"]), member(2, &[])];

        handler.apply(&params(&tag, 1, &members, true), &mut sink);
        assert_eq!(handler.effect_grants().len(), 2);
    }

    #[test]
    fn phase_end_keeps_any_time_effects() {
        let def = definition("Synergy.Guardian", vec![tier(1, RecipientPolicy::AllAllies, None)]);
        let tag = def.tag.clone();
        let mut handler = handler(def);
        let mut sink = UnitAbilityGrants::default();
        let members = vec![member(1, &["Synergy.Guardian"]), member(2, &[])];

        handler.apply(&params(&tag, 1, &members, false), &mut sink);
        handler.phase_active_grant(&params(&tag, 1, &members, true), &mut sink);
        assert_eq!(sink.action_count(), 2);

        handler.phase_end_revoke(true, &mut sink);
        assert_eq!(handler.effect_grants().len(), 2);
        assert_eq!(sink.action_count(), 0);
    }

    #[test]
    fn losing_the_category_prunes_owner_grants() {
        let def = definition("Synergy.Fire", vec![tier(1, RecipientPolicy::AllOwners, None)]);
        let tag = def.tag.clone();
        let mut handler = handler(def);
        let mut sink = UnitAbilityGrants::default();

        let before = vec![member(1, &["Synergy.Fire"]), member(2, &["Synergy.Fire"])];
        handler.apply(&params(&tag, 2, &before, false), &mut sink);
        let after = vec![member(1, &["Synergy.Fire"]), member(2, &[])];
        handler.apply(&params(&tag, 1, &after, false), &mut sink);

        let holders: Vec<_> = handler.effect_grants().holders().collect();
        assert_eq!(holders, vec![MemberId(1)]);
        assert_eq!(sink.effect_count(), 1);
    }

    #[test]
    fn vanguard_behavior_picks_first_owners() {
        let def = definition("Synergy.Vanguard", vec![tier(1, RecipientPolicy::Custom, Some(2))]);
        let tag = def.tag.clone();
        let mut handler = SynergyHandler::new(def, Arc::new(VanguardBehavior), 1);
        let mut sink = UnitAbilityGrants::default();
        let members = vec![
            member(4, &["Synergy.Vanguard"]),
            member(5, &[]),
            member(6, &["Synergy.Vanguard"]),
            member(9, &["Synergy.Vanguard"]),
        ];

        handler.apply(&params(&tag, 3, &members, false), &mut sink);
        let holders: Vec<_> = handler.effect_grants().holders().collect();
        assert_eq!(holders, vec![MemberId(4), MemberId(6)]);
    }

    #[test]
    fn registry_resolves_builtin_names() {
        let registry = SynergyBehaviorRegistry::default();
        assert!(registry.get("Standard").is_some());
        assert!(registry.get("vanguard").is_some());
        assert!(registry.get("berserk").is_none());
    }
}
