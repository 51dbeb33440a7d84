use bevy::prelude::*;

use crate::{
    config::SynergyTick, grants::UnitAbilityGrants, replication::SynergyReplicationHistory,
    roster::SynergyRoster,
};

#[derive(Resource, Default, Debug, Clone, PartialEq, Eq)]
pub struct SynergyMetrics {
    pub tick: u64,
    pub registered_members: usize,
    pub active_categories: usize,
    /// Categories currently at or above their first threshold.
    pub tiered_categories: usize,
    pub active_effect_grants: usize,
    pub active_action_grants: usize,
    pub stale_revocations: u64,
    pub combat_active: bool,
    pub frames_sent: u64,
}

pub fn collect_synergy_metrics(
    tick: Res<SynergyTick>,
    roster: Res<SynergyRoster>,
    grants: Res<UnitAbilityGrants>,
    history: Res<SynergyReplicationHistory>,
    mut metrics: ResMut<SynergyMetrics>,
) {
    metrics.tick = tick.0;
    metrics.registered_members = roster.member_count();
    metrics.active_categories = roster.counts().len();
    metrics.tiered_categories = roster
        .counts()
        .iter()
        .filter(|(tag, count)| roster.tier_index(tag, **count).is_some())
        .count();
    metrics.active_effect_grants = grants.effect_count();
    metrics.active_action_grants = grants.action_count();
    metrics.stale_revocations = grants.stale_revocations();
    metrics.combat_active = roster.combat_active();
    metrics.frames_sent = history.frames_sent();
}
