#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Once};

use bevy::ecs::event::{Event, Events, ManualEventReader};
use bevy::prelude::*;
use synergy_core::{
    build_synergy_app, MemberId, OwnedGameplayTags, SynergyBehaviorRegistry, SynergyConfig,
    SynergyDefinitionSet, SynergyRosterEvent, UnitArchetype,
};
use synergy_schema::GameplayTag;

static INIT: Once = Once::new();

pub fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("test_synergy_definitions.json")
}

pub fn ensure_test_definitions() {
    INIT.call_once(|| {
        let path = fixture_path();
        debug_assert!(
            path.exists(),
            "missing test synergy definitions at {}",
            path.display()
        );
        std::env::set_var("SYNERGY_DEFINITIONS_PATH", &path);
    });
}

pub fn fixture_definitions() -> Arc<SynergyDefinitionSet> {
    Arc::new(SynergyDefinitionSet::from_file(&fixture_path()).expect("fixture definitions load"))
}

pub fn authority_app() -> App {
    build_synergy_app(
        SynergyConfig::default(),
        fixture_definitions(),
        SynergyBehaviorRegistry::default(),
    )
}

pub fn observer_app() -> App {
    build_synergy_app(
        SynergyConfig::observer(),
        fixture_definitions(),
        SynergyBehaviorRegistry::default(),
    )
}

pub fn spawn_unit(app: &mut App, kind: &str, tags: &[&str]) -> Entity {
    app.world
        .spawn((
            UnitArchetype(GameplayTag::new(kind)),
            OwnedGameplayTags::from_names(tags.iter().copied()),
        ))
        .id()
}

/// Spawn a unit and queue its registration for the next tick.
pub fn enlist(app: &mut App, kind: &str, tags: &[&str]) -> Entity {
    let entity = spawn_unit(app, kind, tags);
    app.world.send_event(SynergyRosterEvent::Register(entity));
    entity
}

pub fn member(entity: Entity) -> MemberId {
    MemberId::from_entity(entity)
}

pub fn tag(name: &str) -> GameplayTag {
    GameplayTag::new(name)
}

/// Collects events of one type across ticks without seeing any twice.
pub struct EventCollector<E: Event> {
    reader: ManualEventReader<E>,
}

impl<E: Event + Clone> EventCollector<E> {
    pub fn new() -> Self {
        Self {
            reader: ManualEventReader::default(),
        }
    }

    pub fn drain(&mut self, app: &App) -> Vec<E> {
        let events = app.world.resource::<Events<E>>();
        self.reader.read(events).cloned().collect()
    }
}
