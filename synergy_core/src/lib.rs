//! Synergy roster for the headless match server.
//!
//! Counts roster members per synergy category, resolves activation tiers,
//! grants and revokes the derived effects, and replicates the counts to
//! observers. [`run_tick`] advances the chained systems configured by
//! [`build_synergy_app`].

pub mod config;
pub mod definitions;
pub mod grants;
pub mod handler;
pub mod members;
pub mod metrics;
pub mod replication;
pub mod roster;
mod systems;
mod tally;

use std::sync::Arc;

use bevy::prelude::*;

pub use config::{NetRole, SynergyConfig, SynergyTick};
pub use definitions::{
    load_synergy_definitions_from_env, ActionGrant, DefinitionIssue, EffectSpec, RecipientPolicy,
    SynergyDefinition, SynergyDefinitionError, SynergyDefinitionSet, SynergyDefinitionsHandle,
    SynergyDefinitionsMetadata, SynergyTier,
};
pub use grants::{GrantHandle, GrantLedger, GrantSink, UnitAbilityGrants};
pub use handler::{
    StandardBehavior, SynergyApplyParams, SynergyBehavior, SynergyBehaviorRegistry,
    SynergyHandler, VanguardBehavior,
};
pub use members::{EcsMemberDirectory, MemberQuery, OwnedGameplayTags, UnitArchetype, UnitProfile};
pub use metrics::SynergyMetrics;
pub use replication::{
    build_display_list, ObservedSynergyCounts, ReplicationError, SynergyDisplayEntry,
    SynergyFrameInbox, SynergyReplicationHistory,
};
pub use roster::{
    ArchetypeKey, MemberDirectory, MemberId, MemberSnapshot, SynergyMember, SynergyRoster,
};
pub use systems::{
    GameStateChanged, SynergyActivationPulse, SynergyCountsChanged, SynergyRosterEvent,
};
pub use tally::ArchetypeTally;

/// Construct a headless app from environment configuration and the
/// definition table found on disk (or the builtin one).
pub fn build_headless_app() -> App {
    let config = SynergyConfig::default().with_env_overrides();
    let (definitions, metadata) = load_synergy_definitions_from_env();
    let mut app = build_synergy_app(config, definitions, SynergyBehaviorRegistry::default());
    app.insert_resource(metadata);
    app
}

/// Construct a Bevy [`App`] running the synergy pipeline.
///
/// Per tick: last tick's activation pulses, tag-change detection, roster
/// events, game-state transitions, dead-member sweep, replication capture,
/// observer frame ingest, metrics, tick increment.
pub fn build_synergy_app(
    config: SynergyConfig,
    definitions: Arc<SynergyDefinitionSet>,
    behaviors: SynergyBehaviorRegistry,
) -> App {
    let mut app = App::new();

    let roster = SynergyRoster::new(&config, definitions, &behaviors);
    let definitions = Arc::clone(roster.definitions());
    tracing::info!(
        target: "synergy::roster",
        role = ?config.role,
        handlers = roster.handlers().count(),
        "roster.ready"
    );

    app.insert_resource(config)
        .insert_resource(SynergyTick::default())
        .insert_resource(SynergyDefinitionsHandle::new(definitions))
        .insert_resource(behaviors)
        .insert_resource(roster)
        .insert_resource(UnitAbilityGrants::default())
        .insert_resource(SynergyReplicationHistory::default())
        .insert_resource(SynergyFrameInbox::default())
        .insert_resource(ObservedSynergyCounts::default())
        .insert_resource(SynergyMetrics::default())
        .add_event::<SynergyRosterEvent>()
        .add_event::<GameStateChanged>()
        .add_event::<SynergyActivationPulse>()
        .add_event::<SynergyCountsChanged>()
        .add_plugins(MinimalPlugins)
        .add_systems(
            Update,
            (
                systems::flush_activation_pulses,
                systems::notify_member_tag_changes,
                systems::process_roster_events,
                systems::observe_game_state,
                systems::prune_departed_members,
                systems::capture_synergy_replication,
                systems::ingest_synergy_frames,
                metrics::collect_synergy_metrics,
                systems::advance_tick,
            )
                .chain(),
        );

    app
}

/// Execute a single roster tick.
pub fn run_tick(app: &mut App) {
    app.update();
}
