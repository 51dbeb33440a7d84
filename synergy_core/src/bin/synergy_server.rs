use bevy::prelude::*;
use tracing::{info, warn};

use synergy_core::{
    build_headless_app, run_tick, GameStateChanged, OwnedGameplayTags, SynergyConfig,
    SynergyMetrics, SynergyRoster, SynergyRosterEvent, UnitArchetype,
};
use synergy_schema::GameplayTag;

const DEMO_UNITS: &[(&str, &[&str])] = &[
    ("Unit.Kind.Imp", &["Synergy.Fire"]),
    ("Unit.Kind.Drake", &["Synergy.Fire", "Synergy.Guardian"]),
    ("Unit.Kind.Knight", &["Synergy.Guardian"]),
    ("Unit.Kind.Shade", &["Synergy.Assassin"]),
    ("Unit.Kind.Stalker", &["Synergy.Assassin", "Synergy.Mystic"]),
    ("Unit.Kind.Oracle", &["Synergy.Mystic"]),
    ("Unit.Kind.Seer", &["Synergy.Mystic", "Synergy.Fire"]),
];

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut app = build_headless_app();
    let config = app.world.resource::<SynergyConfig>().clone();
    if !config.role.has_authority() {
        warn!(
            target: "synergy::server",
            "demo roster requires authority; SYNERGY_NET_ROLE ignored"
        );
        return;
    }

    let mut spawned = Vec::new();
    for (kind, tags) in DEMO_UNITS {
        let entity = app
            .world
            .spawn((
                UnitArchetype(GameplayTag::new(*kind)),
                OwnedGameplayTags::from_names(tags.iter().copied()),
            ))
            .id();
        app.world.send_event(SynergyRosterEvent::Register(entity));
        spawned.push(entity);
    }
    run_tick(&mut app);
    report(&mut app, "registered");

    app.world.send_event(GameStateChanged {
        state: config.combat_active_state.clone(),
    });
    run_tick(&mut app);
    report(&mut app, "combat_active");

    if let Some(&fallen) = spawned.first() {
        app.world.despawn(fallen);
    }
    run_tick(&mut app);
    report(&mut app, "unit_fallen");

    app.world.send_event(GameStateChanged {
        state: GameplayTag::new("Game.State.Combat.End"),
    });
    run_tick(&mut app);
    report(&mut app, "combat_end");
}

fn report(app: &mut App, stage: &str) {
    let metrics = app.world.resource::<SynergyMetrics>().clone();
    let display = app.world.resource::<SynergyRoster>().display_list();
    info!(
        target: "synergy::server",
        stage,
        tick = metrics.tick,
        members = metrics.registered_members,
        effects = metrics.active_effect_grants,
        actions = metrics.active_action_grants,
        combat = metrics.combat_active,
        "demo.stage"
    );
    match serde_json::to_string_pretty(&display) {
        Ok(json) => println!("{stage}: {json}"),
        Err(err) => warn!(target: "synergy::server", error = %err, "demo.display_encode_failed"),
    }
}
