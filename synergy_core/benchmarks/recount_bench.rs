use std::collections::BTreeMap;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use synergy_core::{
    MemberId, SynergyBehaviorRegistry, SynergyConfig, SynergyDefinitionSet, SynergyRoster,
    UnitAbilityGrants, UnitProfile,
};
use synergy_schema::GameplayTag;

const CATEGORIES: [&str; 4] = [
    "Synergy.Fire",
    "Synergy.Guardian",
    "Synergy.Assassin",
    "Synergy.Mystic",
];

type Fixture = (SynergyRoster, BTreeMap<MemberId, UnitProfile>, UnitAbilityGrants);

fn populated_roster(size: u64) -> Fixture {
    let mut roster = SynergyRoster::new(
        &SynergyConfig::default(),
        SynergyDefinitionSet::builtin(),
        &SynergyBehaviorRegistry::default(),
    );
    let mut directory = BTreeMap::new();
    let mut grants = UnitAbilityGrants::default();
    for id in 0..size {
        let kind = format!("Unit.Kind.K{}", id % 8);
        let tags = [
            CATEGORIES[(id % 4) as usize],
            CATEGORIES[((id / 4) % 4) as usize],
        ];
        directory.insert(MemberId(id), UnitProfile::new(kind.as_str(), tags));
        roster.register(MemberId(id), &directory, &mut grants);
    }
    (roster, directory, grants)
}

fn bench_recount(c: &mut Criterion) {
    let mut group = c.benchmark_group("recount");

    for size in [8u64, 32, 128, 512] {
        group.bench_with_input(BenchmarkId::new("archetype", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let (roster, mut directory, grants) = populated_roster(size);
                    let retagged = UnitProfile::new("Unit.Kind.K0", ["Synergy.Mystic"]);
                    directory.insert(MemberId(0), retagged);
                    (roster, directory, grants)
                },
                |(mut roster, directory, mut grants)| {
                    roster.recount_for_archetype(
                        &GameplayTag::new("Unit.Kind.K0"),
                        &directory,
                        &mut grants,
                    );
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(recount_benches, bench_recount);
criterion_main!(recount_benches);
