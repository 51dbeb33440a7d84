//! Authority-side aggregation of roster members into synergy counts.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use bevy::prelude::*;
use synergy_schema::{GameplayTag, SynergyCountArray, TagSet};

use crate::config::{NetRole, SynergyConfig};
use crate::definitions::SynergyDefinitionSet;
use crate::grants::GrantSink;
use crate::handler::{SynergyApplyParams, SynergyBehaviorRegistry, SynergyHandler};
use crate::replication::{build_display_list, SynergyDisplayEntry};
use crate::systems::SynergyActivationPulse;
use crate::tally::ArchetypeTally;

/// Distinct member kind; instances of one archetype share a tally.
pub type ArchetypeKey = GameplayTag;

/// Non-owning identity of a roster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(pub u64);

impl MemberId {
    pub fn from_entity(entity: Entity) -> Self {
        Self(entity.to_bits())
    }

    pub fn entity(self) -> Option<Entity> {
        Entity::try_from_bits(self.0).ok()
    }
}

/// Capability a unit exposes to take part in synergy counting.
pub trait SynergyMember {
    fn archetype_key(&self) -> Option<ArchetypeKey>;

    /// Tags the unit currently owns under `namespace`.
    fn current_category_tags(&self, namespace: &GameplayTag) -> TagSet;
}

/// Point-in-time view of a live member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub id: MemberId,
    pub archetype: ArchetypeKey,
    pub category_tags: TagSet,
}

impl MemberSnapshot {
    pub fn capture<M: SynergyMember + ?Sized>(
        id: MemberId,
        member: &M,
        namespace: &GameplayTag,
    ) -> Self {
        let archetype = member
            .archetype_key()
            .filter(GameplayTag::is_valid)
            .unwrap_or_else(|| GameplayTag::new(format!("Unit.Anonymous.{}", id.0)));
        let category_tags = member
            .current_category_tags(namespace)
            .into_iter()
            .filter(|tag| tag != namespace && tag.matches(namespace))
            .collect();
        Self {
            id,
            archetype,
            category_tags,
        }
    }

    pub fn owns(&self, tag: &GameplayTag) -> bool {
        self.category_tags.contains(tag)
    }
}

/// Resolves member ids to live members. `None` means the member is gone.
pub trait MemberDirectory {
    fn resolve(&self, id: MemberId, namespace: &GameplayTag) -> Option<MemberSnapshot>;
}

impl<M: SynergyMember> MemberDirectory for BTreeMap<MemberId, M> {
    fn resolve(&self, id: MemberId, namespace: &GameplayTag) -> Option<MemberSnapshot> {
        self.get(&id)
            .map(|member| MemberSnapshot::capture(id, member, namespace))
    }
}

#[derive(Debug, Clone)]
struct RegisteredMember {
    archetype: ArchetypeKey,
    /// Categories this member currently contributes to its archetype tally.
    category_tags: TagSet,
}

/// Roster-wide synergy state: counts, archetype tallies, handlers and the
/// replicated count snapshot.
#[derive(Resource, Debug)]
pub struct SynergyRoster {
    role: NetRole,
    namespace: GameplayTag,
    definitions: Arc<SynergyDefinitionSet>,
    handlers: BTreeMap<GameplayTag, SynergyHandler>,
    counts: BTreeMap<GameplayTag, i32>,
    tallies: BTreeMap<ArchetypeKey, ArchetypeTally>,
    members: BTreeMap<MemberId, RegisteredMember>,
    count_array: SynergyCountArray,
    combat_active: bool,
    pending_pulses: BTreeSet<GameplayTag>,
    snapshot_dirty: bool,
}

impl SynergyRoster {
    pub fn new(
        config: &SynergyConfig,
        definitions: Arc<SynergyDefinitionSet>,
        behaviors: &SynergyBehaviorRegistry,
    ) -> Self {
        let definitions = behaviors.retain_known(definitions);
        let mut handlers = BTreeMap::new();
        for definition in definitions.iter() {
            let Some(behavior) = behaviors.get(&definition.behavior) else {
                continue;
            };
            handlers.insert(
                definition.tag.clone(),
                SynergyHandler::new(Arc::clone(definition), behavior, config.rng_seed),
            );
        }

        Self {
            role: config.role,
            namespace: config.category_namespace.clone(),
            definitions,
            handlers,
            counts: BTreeMap::new(),
            tallies: BTreeMap::new(),
            members: BTreeMap::new(),
            count_array: SynergyCountArray::default(),
            combat_active: false,
            pending_pulses: BTreeSet::new(),
            snapshot_dirty: false,
        }
    }

    pub fn has_authority(&self) -> bool {
        self.role.has_authority()
    }

    pub fn role(&self) -> NetRole {
        self.role
    }

    pub fn namespace(&self) -> &GameplayTag {
        &self.namespace
    }

    pub fn definitions(&self) -> &Arc<SynergyDefinitionSet> {
        &self.definitions
    }

    pub fn combat_active(&self) -> bool {
        self.combat_active
    }

    /// Add a member to the roster. Ignored without authority, for members
    /// already registered, and for members the directory cannot resolve.
    pub fn register(
        &mut self,
        id: MemberId,
        directory: &dyn MemberDirectory,
        sink: &mut dyn GrantSink,
    ) -> bool {
        if !self.has_authority() || self.members.contains_key(&id) {
            return false;
        }
        let Some(snapshot) = directory.resolve(id, &self.namespace) else {
            return false;
        };
        self.prune_dead(directory, sink);

        let tally = self.tallies.entry(snapshot.archetype.clone()).or_default();
        let gained = tally.increase_all(&snapshot.category_tags);
        if tally.is_empty() {
            self.tallies.remove(&snapshot.archetype);
        }
        for tag in &gained {
            *self.counts.entry(tag.clone()).or_insert(0) += 1;
        }
        self.members.insert(
            id,
            RegisteredMember {
                archetype: snapshot.archetype.clone(),
                category_tags: snapshot.category_tags.clone(),
            },
        );

        tracing::debug!(
            target: "synergy::roster",
            member = id.0,
            archetype = %snapshot.archetype,
            categories = snapshot.category_tags.len(),
            gained = gained.len(),
            "roster.registered"
        );

        let mut touched = snapshot.category_tags.clone();
        touched.extend(self.roster_wide_categories());
        self.apply_categories(touched, directory, sink);
        self.pending_pulses
            .extend(snapshot.category_tags.iter().cloned());
        self.sync_snapshot();
        true
    }

    /// Remove a member, revoking every grant it holds from any handler.
    pub fn unregister(
        &mut self,
        id: MemberId,
        directory: &dyn MemberDirectory,
        sink: &mut dyn GrantSink,
    ) -> bool {
        if !self.has_authority() || !self.members.contains_key(&id) {
            return false;
        }
        self.retire(id, directory, sink);
        self.prune_dead(directory, sink);
        self.sync_snapshot();
        true
    }

    /// A registered member's owned tags changed; recount its archetype.
    pub fn on_member_category_tags_changed(
        &mut self,
        id: MemberId,
        directory: &dyn MemberDirectory,
        sink: &mut dyn GrantSink,
    ) -> bool {
        if !self.has_authority() {
            return false;
        }
        let Some(archetype) = self.members.get(&id).map(|member| member.archetype.clone()) else {
            return false;
        };
        self.prune_dead(directory, sink);
        self.recount_for_archetype(&archetype, directory, sink);
        true
    }

    /// Roll back and rebuild every contribution of `archetype` from the live
    /// tags of its registered instances.
    pub fn recount_for_archetype(
        &mut self,
        archetype: &ArchetypeKey,
        directory: &dyn MemberDirectory,
        sink: &mut dyn GrantSink,
    ) {
        if !self.has_authority() {
            return;
        }

        let previous = self
            .tallies
            .remove(archetype)
            .map(|mut tally| tally.reset())
            .unwrap_or_default();
        for tag in &previous {
            self.decrement(tag);
        }

        let mut tally = ArchetypeTally::default();
        let mut gained = TagSet::new();
        let ids: Vec<MemberId> = self
            .members
            .iter()
            .filter(|(_, member)| &member.archetype == archetype)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            let current = directory
                .resolve(id, &self.namespace)
                .map(|snapshot| snapshot.category_tags);
            let Some(member) = self.members.get_mut(&id) else {
                continue;
            };
            if let Some(tags) = current {
                member.category_tags = tags;
            }
            gained.extend(tally.increase_all(&member.category_tags));
        }
        for tag in &gained {
            *self.counts.entry(tag.clone()).or_insert(0) += 1;
        }
        if !tally.is_empty() {
            self.tallies.insert(archetype.clone(), tally);
        }

        tracing::debug!(
            target: "synergy::roster",
            archetype = %archetype,
            lost = previous.difference(&gained).count(),
            gained = gained.difference(&previous).count(),
            "roster.recounted"
        );

        let touched: TagSet = previous.union(&gained).cloned().collect();
        self.pending_pulses
            .extend(gained.difference(&previous).cloned());
        self.apply_categories(touched, directory, sink);
        self.sync_snapshot();
    }

    /// Unregister members the directory can no longer resolve.
    pub fn prune_dead(
        &mut self,
        directory: &dyn MemberDirectory,
        sink: &mut dyn GrantSink,
    ) -> usize {
        if !self.has_authority() {
            return 0;
        }
        let dead: Vec<MemberId> = self
            .members
            .keys()
            .copied()
            .filter(|id| directory.resolve(*id, &self.namespace).is_none())
            .collect();
        for id in &dead {
            tracing::debug!(target: "synergy::roster", member = id.0, "roster.pruned_dead");
            self.retire(*id, directory, sink);
        }
        if !dead.is_empty() {
            self.sync_snapshot();
        }
        dead.len()
    }

    /// Feed a game-state tag; only transitions into or out of the combat
    /// state (or any of its child tags) reach the handlers.
    pub fn on_game_state_changed(
        &mut self,
        state: &GameplayTag,
        combat_active_state: &GameplayTag,
        directory: &dyn MemberDirectory,
        sink: &mut dyn GrantSink,
    ) {
        if !self.has_authority() {
            return;
        }
        let entering = state.matches(combat_active_state);
        if entering && !self.combat_active {
            self.on_combat_phase_active(directory, sink);
        } else if !entering && self.combat_active {
            self.on_combat_phase_end(sink);
        }
    }

    pub fn on_combat_phase_active(
        &mut self,
        directory: &dyn MemberDirectory,
        sink: &mut dyn GrantSink,
    ) {
        if !self.has_authority() {
            return;
        }
        self.prune_dead(directory, sink);
        self.combat_active = true;
        let members = self.live_members(directory);
        for (tag, handler) in self.handlers.iter_mut() {
            let params = SynergyApplyParams {
                tag,
                count: self.counts.get(tag).copied().unwrap_or(0),
                members: &members,
                authority: true,
                combat_active: true,
            };
            handler.phase_active_grant(&params, sink);
        }
        tracing::debug!(target: "synergy::roster", members = members.len(), "roster.combat_active");
    }

    pub fn on_combat_phase_end(&mut self, sink: &mut dyn GrantSink) {
        if !self.has_authority() {
            return;
        }
        self.combat_active = false;
        for handler in self.handlers.values_mut() {
            handler.phase_end_revoke(true, sink);
        }
        tracing::debug!(target: "synergy::roster", "roster.combat_ended");
    }

    /// Revoke every grant of every handler and forget cached tiers.
    pub fn reset(&mut self, sink: &mut dyn GrantSink) {
        if !self.has_authority() {
            return;
        }
        for handler in self.handlers.values_mut() {
            handler.reset_all(sink);
        }
        tracing::debug!(target: "synergy::roster", "roster.reset");
    }

    /// Pulses scheduled by registrations since the last drain, one per
    /// category at an active tier.
    pub fn drain_activation_pulses(
        &mut self,
        directory: &dyn MemberDirectory,
    ) -> Vec<SynergyActivationPulse> {
        let pending = std::mem::take(&mut self.pending_pulses);
        if !self.has_authority() || pending.is_empty() {
            return Vec::new();
        }
        let members = self.live_members(directory);
        let mut pulses = Vec::new();
        for tag in pending {
            let Some(handler) = self.handlers.get(&tag) else {
                continue;
            };
            let params = SynergyApplyParams {
                tag: &tag,
                count: self.counts.get(&tag).copied().unwrap_or(0),
                members: &members,
                authority: true,
                combat_active: self.combat_active,
            };
            let Some((tier_index, recipients)) = handler.pulse_recipients(&params) else {
                continue;
            };
            pulses.push(SynergyActivationPulse {
                tier_index,
                recipients,
                cue: handler.definition().activation_cue.clone(),
                tag,
            });
        }
        pulses
    }

    pub fn pending_pulse_count(&self) -> usize {
        self.pending_pulses.len()
    }

    /// Replicated `(tag, count)` pairs in replication order.
    pub fn snapshot(&self) -> Vec<(GameplayTag, i32)> {
        self.count_array
            .entries()
            .iter()
            .map(|entry| (entry.tag.clone(), entry.count))
            .collect()
    }

    pub fn count(&self, tag: &GameplayTag) -> i32 {
        self.counts.get(tag).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &BTreeMap<GameplayTag, i32> {
        &self.counts
    }

    pub fn thresholds(&self, tag: &GameplayTag) -> Vec<i32> {
        self.definitions.thresholds(tag)
    }

    pub fn tier_index(&self, tag: &GameplayTag, count: i32) -> Option<usize> {
        self.definitions.tier_index(tag, count)
    }

    pub fn display_list(&self) -> Vec<SynergyDisplayEntry> {
        build_display_list(self.count_array.entries(), &self.definitions)
    }

    pub fn count_array(&self) -> &SynergyCountArray {
        &self.count_array
    }

    /// Returns whether the snapshot changed since the last call.
    pub fn take_snapshot_dirty(&mut self) -> bool {
        std::mem::take(&mut self.snapshot_dirty)
    }

    pub fn is_registered(&self, id: MemberId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.members.keys().copied()
    }

    pub fn archetype_of(&self, id: MemberId) -> Option<&ArchetypeKey> {
        self.members.get(&id).map(|member| &member.archetype)
    }

    pub fn tally(&self, archetype: &ArchetypeKey) -> Option<&ArchetypeTally> {
        self.tallies.get(archetype)
    }

    pub fn handler(&self, tag: &GameplayTag) -> Option<&SynergyHandler> {
        self.handlers.get(tag)
    }

    pub fn handlers(&self) -> impl Iterator<Item = &SynergyHandler> {
        self.handlers.values()
    }

    /// Recompute tallies and counts from the cached member contributions and
    /// compare them with the live state and the replicated snapshot.
    pub fn is_consistent(&self) -> bool {
        let mut tallies: BTreeMap<ArchetypeKey, ArchetypeTally> = BTreeMap::new();
        for member in self.members.values() {
            tallies
                .entry(member.archetype.clone())
                .or_default()
                .increase_all(&member.category_tags);
        }
        tallies.retain(|_, tally| !tally.is_empty());
        if tallies != self.tallies {
            return false;
        }

        let mut counts: BTreeMap<GameplayTag, i32> = BTreeMap::new();
        for tally in tallies.values() {
            for tag in tally.active_tags() {
                *counts.entry(tag).or_insert(0) += 1;
            }
        }
        if counts != self.counts || self.count_array.to_map() != self.counts {
            return false;
        }

        self.handlers.values().all(|handler| {
            handler
                .effect_grants()
                .holders()
                .chain(handler.action_grants().holders())
                .all(|holder| self.members.contains_key(&holder))
        })
    }

    fn retire(&mut self, id: MemberId, directory: &dyn MemberDirectory, sink: &mut dyn GrantSink) {
        let Some(member) = self.members.remove(&id) else {
            return;
        };

        let mut touched: TagSet = member.category_tags.clone();
        for (tag, handler) in self.handlers.iter_mut() {
            if handler.revoke_holder(id, sink) {
                touched.insert(tag.clone());
            }
        }

        touched.extend(self.roster_wide_categories());

        let lost = match self.tallies.get_mut(&member.archetype) {
            Some(tally) => {
                let lost = tally.decrease_all(&member.category_tags);
                if tally.is_empty() {
                    self.tallies.remove(&member.archetype);
                }
                lost
            }
            None => TagSet::new(),
        };
        for tag in &lost {
            self.decrement(tag);
        }

        tracing::debug!(
            target: "synergy::roster",
            member = id.0,
            archetype = %member.archetype,
            lost = lost.len(),
            "roster.unregistered"
        );

        self.apply_categories(touched, directory, sink);
    }

    /// Categories whose active tier selects from the whole roster, so any
    /// roster change can alter their recipients.
    fn roster_wide_categories(&self) -> Vec<GameplayTag> {
        self.handlers
            .iter()
            .filter(|(_, handler)| {
                handler
                    .cached_policy()
                    .is_some_and(|policy| !policy.requires_ownership())
            })
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    fn decrement(&mut self, tag: &GameplayTag) {
        if let Some(count) = self.counts.get_mut(tag) {
            *count -= 1;
            if *count <= 0 {
                self.counts.remove(tag);
            }
        }
    }

    fn live_members(&self, directory: &dyn MemberDirectory) -> Vec<MemberSnapshot> {
        self.members
            .keys()
            .filter_map(|id| directory.resolve(*id, &self.namespace))
            .collect()
    }

    fn apply_categories(
        &mut self,
        tags: TagSet,
        directory: &dyn MemberDirectory,
        sink: &mut dyn GrantSink,
    ) {
        if tags.is_empty() {
            return;
        }
        let members = self.live_members(directory);
        for tag in &tags {
            let Some(handler) = self.handlers.get_mut(tag) else {
                continue;
            };
            let params = SynergyApplyParams {
                tag,
                count: self.counts.get(tag).copied().unwrap_or(0),
                members: &members,
                authority: true,
                combat_active: self.combat_active,
            };
            handler.apply(&params, sink);
        }
    }

    fn sync_snapshot(&mut self) {
        if self.count_array.update_to_map(&self.counts) {
            self.snapshot_dirty = true;
        }
    }
}
