use bevy::prelude::*;
use synergy_schema::{tags_under, GameplayTag, TagSet};

use crate::roster::{ArchetypeKey, MemberDirectory, MemberId, MemberSnapshot, SynergyMember};

/// Distinct unit kind used for archetype tallies.
#[derive(Component, Debug, Clone, PartialEq, Eq)]
pub struct UnitArchetype(pub ArchetypeKey);

/// Every gameplay tag the unit currently owns.
#[derive(Component, Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedGameplayTags(pub TagSet);

impl OwnedGameplayTags {
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self(names.into_iter().map(GameplayTag::new).collect())
    }

    pub fn insert(&mut self, tag: GameplayTag) -> bool {
        self.0.insert(tag)
    }

    pub fn remove(&mut self, tag: &GameplayTag) -> bool {
        self.0.remove(tag)
    }
}

/// Plain-data member, handy outside of the ECS world.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitProfile {
    pub archetype: Option<ArchetypeKey>,
    pub tags: TagSet,
}

impl UnitProfile {
    pub fn new<I, T>(archetype: impl Into<GameplayTag>, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<GameplayTag>,
    {
        Self {
            archetype: Some(archetype.into()),
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

impl SynergyMember for UnitProfile {
    fn archetype_key(&self) -> Option<ArchetypeKey> {
        self.archetype.clone()
    }

    fn current_category_tags(&self, namespace: &GameplayTag) -> TagSet {
        tags_under(&self.tags, namespace)
    }
}

struct EcsMember<'a> {
    archetype: Option<&'a UnitArchetype>,
    tags: Option<&'a OwnedGameplayTags>,
}

impl SynergyMember for EcsMember<'_> {
    fn archetype_key(&self) -> Option<ArchetypeKey> {
        self.archetype.map(|archetype| archetype.0.clone())
    }

    fn current_category_tags(&self, namespace: &GameplayTag) -> TagSet {
        self.tags
            .map(|tags| tags_under(&tags.0, namespace))
            .unwrap_or_default()
    }
}

pub type MemberQuery<'w, 's> =
    Query<'w, 's, (Option<&'static UnitArchetype>, Option<&'static OwnedGameplayTags>)>;

/// Resolves members against live entities. Despawned entities resolve to
/// `None`; entities without tags contribute no categories.
pub struct EcsMemberDirectory<'q, 'w, 's> {
    query: &'q MemberQuery<'w, 's>,
}

impl<'q, 'w, 's> EcsMemberDirectory<'q, 'w, 's> {
    pub fn new(query: &'q MemberQuery<'w, 's>) -> Self {
        Self { query }
    }
}

impl MemberDirectory for EcsMemberDirectory<'_, '_, '_> {
    fn resolve(&self, id: MemberId, namespace: &GameplayTag) -> Option<MemberSnapshot> {
        let entity = id.entity()?;
        let (archetype, tags) = self.query.get(entity).ok()?;
        Some(MemberSnapshot::capture(
            id,
            &EcsMember { archetype, tags },
            namespace,
        ))
    }
}

#[cfg(test)]
mod tests {
    use bevy_ecs::system::RunSystemOnce;

    use super::*;

    #[test]
    fn directory_resolves_live_entities_only() {
        let mut world = World::new();
        let tagged = world
            .spawn((
                UnitArchetype(GameplayTag::new("Unit.Kind.Imp")),
                OwnedGameplayTags::from_names(["Synergy.Fire", "Unit.Flying"]),
            ))
            .id();
        let bare = world.spawn_empty().id();
        let gone = world.spawn_empty().id();
        world.despawn(gone);

        world.run_system_once(move |query: MemberQuery| {
            let directory = EcsMemberDirectory::new(&query);
            let namespace = GameplayTag::new("Synergy");

            let snapshot = directory
                .resolve(MemberId::from_entity(tagged), &namespace)
                .expect("tagged entity resolves");
            assert_eq!(snapshot.archetype.as_str(), "Unit.Kind.Imp");
            assert!(snapshot.owns(&GameplayTag::new("Synergy.Fire")));
            assert_eq!(snapshot.category_tags.len(), 1);

            let bare_snapshot = directory
                .resolve(MemberId::from_entity(bare), &namespace)
                .expect("bare entity resolves");
            assert!(bare_snapshot.category_tags.is_empty());
            assert!(bare_snapshot.archetype.as_str().starts_with("Unit.Anonymous."));

            assert!(directory
                .resolve(MemberId::from_entity(gone), &namespace)
                .is_none());
        });
    }

    #[test]
    fn namespace_root_is_not_a_category() {
        let profile = UnitProfile::new("Unit.Kind.Odd", ["Synergy", "Synergy.Fire"]);
        let snapshot = MemberSnapshot::capture(MemberId(3), &profile, &GameplayTag::new("Synergy"));
        let names: Vec<_> = snapshot.category_tags.iter().map(GameplayTag::as_str).collect();
        assert_eq!(names, vec!["Synergy.Fire"]);
    }
}
