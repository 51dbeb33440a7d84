use bevy::prelude::*;
use synergy_schema::GameplayTag;

use crate::{
    config::{SynergyConfig, SynergyTick},
    definitions::SynergyDefinitionsHandle,
    grants::UnitAbilityGrants,
    members::{EcsMemberDirectory, MemberQuery, OwnedGameplayTags},
    replication::{
        ObservedSynergyCounts, SynergyDisplayEntry, SynergyFrameInbox, SynergyReplicationHistory,
    },
    roster::{MemberId, SynergyRoster},
};

/// Roster notifications, delivered in send order within a tick.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynergyRosterEvent {
    Register(Entity),
    Unregister(Entity),
    /// Teardown notification; handled like an unregister.
    MemberDestroyed(Entity),
    CategoryTagsChanged(Entity),
}

/// External game-state signal.
#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct GameStateChanged {
    pub state: GameplayTag,
}

/// One-shot activation feedback, emitted the tick after registration.
#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct SynergyActivationPulse {
    pub tag: GameplayTag,
    pub tier_index: usize,
    pub recipients: Vec<MemberId>,
    pub cue: Option<String>,
}

/// Fired whenever the visible counts change, on either side of replication.
#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct SynergyCountsChanged {
    pub tick: u64,
    pub entries: Vec<SynergyDisplayEntry>,
}

pub fn flush_activation_pulses(
    mut roster: ResMut<SynergyRoster>,
    members: MemberQuery,
    mut pulses: EventWriter<SynergyActivationPulse>,
) {
    if roster.pending_pulse_count() == 0 {
        return;
    }
    let directory = EcsMemberDirectory::new(&members);
    for pulse in roster.drain_activation_pulses(&directory) {
        tracing::debug!(
            target: "synergy::roster",
            tag = %pulse.tag,
            tier = pulse.tier_index,
            recipients = pulse.recipients.len(),
            "roster.activation_pulse"
        );
        pulses.send(pulse);
    }
}

pub fn notify_member_tag_changes(
    roster: Res<SynergyRoster>,
    changed: Query<Entity, Changed<OwnedGameplayTags>>,
    mut events: EventWriter<SynergyRosterEvent>,
) {
    if !roster.has_authority() {
        return;
    }
    for entity in changed.iter() {
        if roster.is_registered(MemberId::from_entity(entity)) {
            events.send(SynergyRosterEvent::CategoryTagsChanged(entity));
        }
    }
}

pub fn process_roster_events(
    mut events: EventReader<SynergyRosterEvent>,
    mut roster: ResMut<SynergyRoster>,
    mut grants: ResMut<UnitAbilityGrants>,
    members: MemberQuery,
) {
    let directory = EcsMemberDirectory::new(&members);
    for event in events.read() {
        match *event {
            SynergyRosterEvent::Register(entity) => {
                roster.register(MemberId::from_entity(entity), &directory, &mut *grants);
            }
            SynergyRosterEvent::Unregister(entity)
            | SynergyRosterEvent::MemberDestroyed(entity) => {
                roster.unregister(MemberId::from_entity(entity), &directory, &mut *grants);
            }
            SynergyRosterEvent::CategoryTagsChanged(entity) => {
                roster.on_member_category_tags_changed(
                    MemberId::from_entity(entity),
                    &directory,
                    &mut *grants,
                );
            }
        }
    }
}

pub fn observe_game_state(
    mut events: EventReader<GameStateChanged>,
    config: Res<SynergyConfig>,
    mut roster: ResMut<SynergyRoster>,
    mut grants: ResMut<UnitAbilityGrants>,
    members: MemberQuery,
) {
    let directory = EcsMemberDirectory::new(&members);
    for event in events.read() {
        roster.on_game_state_changed(
            &event.state,
            &config.combat_active_state,
            &directory,
            &mut *grants,
        );
    }
}

/// Sweep members whose entities were despawned without an unregister.
pub fn prune_departed_members(
    mut roster: ResMut<SynergyRoster>,
    mut grants: ResMut<UnitAbilityGrants>,
    members: MemberQuery,
) {
    if !roster.has_authority() || roster.member_count() == 0 {
        return;
    }
    let directory = EcsMemberDirectory::new(&members);
    roster.prune_dead(&directory, &mut *grants);
}

pub fn capture_synergy_replication(
    tick: Res<SynergyTick>,
    mut roster: ResMut<SynergyRoster>,
    mut history: ResMut<SynergyReplicationHistory>,
    mut changed: EventWriter<SynergyCountsChanged>,
) {
    if !roster.has_authority() {
        return;
    }
    if roster.take_snapshot_dirty() {
        changed.send(SynergyCountsChanged {
            tick: tick.0,
            entries: roster.display_list(),
        });
    }
    history.capture(roster.count_array(), tick.0);
}

pub fn ingest_synergy_frames(
    tick: Res<SynergyTick>,
    definitions: Res<SynergyDefinitionsHandle>,
    mut inbox: ResMut<SynergyFrameInbox>,
    mut observed: ResMut<ObservedSynergyCounts>,
    mut changed: EventWriter<SynergyCountsChanged>,
) {
    if inbox.is_empty() {
        return;
    }
    let mut any_changed = false;
    for bytes in inbox.drain() {
        match observed.ingest_bytes(&bytes) {
            Ok(frame_changed) => any_changed |= frame_changed,
            Err(err) => tracing::warn!(
                target: "synergy::replication",
                error = %err,
                "replication.frame_rejected"
            ),
        }
    }
    if any_changed {
        changed.send(SynergyCountsChanged {
            tick: tick.0,
            entries: observed.display_list(&definitions.0),
        });
    }
}

pub fn advance_tick(mut tick: ResMut<SynergyTick>) {
    tick.0 += 1;
}
