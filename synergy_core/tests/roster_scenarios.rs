use std::collections::BTreeMap;
use std::sync::Arc;

use synergy_core::{
    GrantHandle, MemberId, SynergyBehaviorRegistry, SynergyConfig, SynergyDefinitionSet,
    SynergyRoster, UnitAbilityGrants, UnitProfile,
};
use synergy_schema::GameplayTag;

const SCENARIO_DEFINITIONS: &str = r#"{
    "version": 1,
    "definitions": [
        {
            "tag": "Synergy.Fire",
            "tiers": [
                { "threshold": 2, "recipient_policy": "all_owners" },
                { "threshold": 4, "recipient_policy": "all_owners" }
            ],
            "effects": [ { "effect": "Effect.Ignite", "stat": "spell_power", "magnitude_per_level": 10.0 } ],
            "actions": [ { "ability_tag": "Unit.Ability.FireNova", "ability": "Ability.FireNova" } ]
        },
        {
            "tag": "Synergy.Assassin",
            "tiers": [ { "threshold": 2, "recipient_policy": "random_among_owners", "pick_count": 1 } ],
            "effects": [ { "effect": "Effect.Ambush", "stat": "crit", "magnitude_per_level": 1.0 } ]
        },
        {
            "tag": "Synergy.Guardian",
            "tiers": [ { "threshold": 1, "recipient_policy": "all_allies" } ],
            "effects": [ { "effect": "Effect.Bulwark", "stat": "armor", "magnitude_per_level": 5.0 } ]
        }
    ]
}"#;

type Directory = BTreeMap<MemberId, UnitProfile>;

struct Harness {
    roster: SynergyRoster,
    grants: UnitAbilityGrants,
    directory: Directory,
}

impl Harness {
    fn new() -> Self {
        let definitions =
            SynergyDefinitionSet::from_json_str(SCENARIO_DEFINITIONS).expect("scenario definitions");
        Self {
            roster: SynergyRoster::new(
                &SynergyConfig::default(),
                Arc::new(definitions),
                &SynergyBehaviorRegistry::default(),
            ),
            grants: UnitAbilityGrants::default(),
            directory: Directory::new(),
        }
    }

    fn add(&mut self, id: u64, kind: &str, tags: &[&str]) -> bool {
        self.directory
            .insert(MemberId(id), UnitProfile::new(kind, tags.iter().copied()));
        self.roster
            .register(MemberId(id), &self.directory, &mut self.grants)
    }

    fn remove(&mut self, id: u64) -> bool {
        let removed = self
            .roster
            .unregister(MemberId(id), &self.directory, &mut self.grants);
        self.directory.remove(&MemberId(id));
        removed
    }

    fn retag(&mut self, id: u64, tags: &[&str]) {
        if let Some(profile) = self.directory.get_mut(&MemberId(id)) {
            profile.tags = tags.iter().map(|tag| GameplayTag::new(*tag)).collect();
        }
        self.roster
            .on_member_category_tags_changed(MemberId(id), &self.directory, &mut self.grants);
    }

    fn combat(&mut self, active: bool) {
        if active {
            self.roster
                .on_combat_phase_active(&self.directory, &mut self.grants);
        } else {
            self.roster.on_combat_phase_end(&mut self.grants);
        }
    }

    fn effect_holders(&self, tag: &str) -> Vec<MemberId> {
        self.roster
            .handler(&GameplayTag::new(tag))
            .map(|handler| handler.effect_grants().holders().collect())
            .unwrap_or_default()
    }

    fn effect_handles(&self, tag: &str) -> Vec<GrantHandle> {
        let Some(handler) = self.roster.handler(&GameplayTag::new(tag)) else {
            return Vec::new();
        };
        handler
            .effect_grants()
            .holders()
            .flat_map(|holder| handler.effect_grants().handles(holder).to_vec())
            .collect()
    }

    fn count(&self, tag: &str) -> i32 {
        self.roster.count(&GameplayTag::new(tag))
    }

    /// Every live grant in the sink is accounted for by exactly one ledger entry.
    fn ledgers_match_sink(&self) -> bool {
        let recorded: usize = self
            .roster
            .handlers()
            .map(|handler| {
                let effects: usize = handler
                    .effect_grants()
                    .holders()
                    .map(|holder| handler.effect_grants().handles(holder).len())
                    .sum();
                let actions: usize = handler
                    .action_grants()
                    .holders()
                    .map(|holder| handler.action_grants().handles(holder).len())
                    .sum();
                effects + actions
            })
            .sum();
        recorded == self.grants.effect_count() + self.grants.action_count()
    }
}

#[test]
fn fire_tiers_progress_without_regrant_churn() {
    let mut h = Harness::new();
    h.add(1, "Unit.Kind.Imp", &["Synergy.Fire"]);
    h.add(2, "Unit.Kind.Drake", &["Synergy.Fire"]);
    assert_eq!(h.count("Synergy.Fire"), 2);
    assert_eq!(h.effect_holders("Synergy.Fire"), vec![MemberId(1), MemberId(2)]);
    let first_handles = h.effect_handles("Synergy.Fire");

    h.add(3, "Unit.Kind.Salamander", &["Synergy.Fire"]);
    assert_eq!(h.count("Synergy.Fire"), 3);
    let after_third = h.effect_handles("Synergy.Fire");
    assert_eq!(&after_third[..2], first_handles.as_slice());
    assert_eq!(h.effect_holders("Synergy.Fire").len(), 3);

    h.add(4, "Unit.Kind.Phoenix", &["Synergy.Fire"]);
    assert_eq!(h.count("Synergy.Fire"), 4);
    let tier_one = h
        .roster
        .handler(&GameplayTag::new("Synergy.Fire"))
        .and_then(|handler| handler.cached_tier());
    assert_eq!(tier_one, Some(1));
    for handle in &after_third {
        assert!(h.grants.effect(*handle).is_none(), "tier 0 grant survived");
    }
    assert_eq!(h.effect_holders("Synergy.Fire").len(), 4);
    for id in 1..=4 {
        assert_eq!(h.grants.stat_bonus(MemberId(id), "spell_power"), 20.0);
    }
    assert!(h.ledgers_match_sink());
}

#[test]
fn random_owner_tier_only_grants_during_combat() {
    let mut h = Harness::new();
    h.add(1, "Unit.Kind.Shade", &["Synergy.Assassin"]);
    h.add(2, "Unit.Kind.Stalker", &["Synergy.Assassin"]);
    assert!(h.effect_holders("Synergy.Assassin").is_empty());

    h.combat(true);
    let picked = h.effect_holders("Synergy.Assassin");
    assert_eq!(picked.len(), 1);
    assert!(picked[0] == MemberId(1) || picked[0] == MemberId(2));

    h.combat(false);
    assert!(h.effect_holders("Synergy.Assassin").is_empty());
    assert_eq!(h.grants.effect_count(), 0);
}

#[test]
fn combat_toggling_restores_pre_combat_grants() {
    let mut h = Harness::new();
    h.add(1, "Unit.Kind.Imp", &["Synergy.Fire", "Synergy.Assassin"]);
    h.add(2, "Unit.Kind.Drake", &["Synergy.Fire", "Synergy.Assassin"]);
    h.add(3, "Unit.Kind.Knight", &["Synergy.Guardian"]);

    let effects_before = h.grants.effect_count();
    let fire_before = h.effect_handles("Synergy.Fire");
    for _ in 0..5 {
        h.combat(true);
        assert_eq!(h.grants.action_count(), 2);
        h.combat(false);
        assert_eq!(h.grants.action_count(), 0);
    }
    assert_eq!(h.grants.effect_count(), effects_before);
    assert_eq!(h.effect_handles("Synergy.Fire"), fire_before);
    assert!(h.ledgers_match_sink());
}

#[test]
fn register_order_does_not_change_counts() {
    let units: [(u64, &str, &[&str]); 5] = [
        (1, "Unit.Kind.Imp", &["Synergy.Fire"]),
        (2, "Unit.Kind.Imp", &["Synergy.Fire", "Synergy.Guardian"]),
        (3, "Unit.Kind.Drake", &["Synergy.Fire"]),
        (4, "Unit.Kind.Shade", &["Synergy.Assassin", "Synergy.Guardian"]),
        (5, "Unit.Kind.Knight", &["Synergy.Guardian"]),
    ];
    let orders: [[usize; 5]; 4] = [
        [0, 1, 2, 3, 4],
        [4, 3, 2, 1, 0],
        [2, 0, 4, 1, 3],
        [1, 4, 0, 3, 2],
    ];

    let mut outcomes = Vec::new();
    for order in orders {
        let mut h = Harness::new();
        for index in order {
            let (id, kind, tags) = units[index];
            h.add(id, kind, tags);
        }
        // Churn that nets out to the same roster.
        h.remove(order[0] as u64 + 1);
        let (id, kind, tags) = units[order[0]];
        h.add(id, kind, tags);

        assert!(h.roster.is_consistent());
        assert!(h.ledgers_match_sink());
        outcomes.push(h.roster.counts().clone());
    }
    assert!(outcomes.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(outcomes[0].get(&GameplayTag::new("Synergy.Fire")), Some(&2));
    assert_eq!(outcomes[0].get(&GameplayTag::new("Synergy.Guardian")), Some(&3));
}

#[test]
fn register_then_unregister_restores_everything() {
    let mut h = Harness::new();
    h.add(1, "Unit.Kind.Imp", &["Synergy.Fire"]);
    h.add(2, "Unit.Kind.Knight", &["Synergy.Guardian"]);
    h.combat(true);

    let counts = h.roster.counts().clone();
    let fire = h.effect_holders("Synergy.Fire");
    let guardian = h.effect_holders("Synergy.Guardian");

    h.add(3, "Unit.Kind.Drake", &["Synergy.Fire"]);
    assert_eq!(h.effect_holders("Synergy.Fire").len(), 2);
    assert_eq!(h.effect_holders("Synergy.Guardian").len(), 3);
    h.remove(3);

    assert_eq!(h.roster.counts(), &counts);
    assert_eq!(h.effect_holders("Synergy.Fire"), fire);
    assert_eq!(h.effect_holders("Synergy.Guardian"), guardian);
    assert!(h.ledgers_match_sink());
}

#[test]
fn departing_member_loses_ally_grants() {
    let mut h = Harness::new();
    h.add(1, "Unit.Kind.Knight", &["Synergy.Guardian"]);
    h.add(2, "Unit.Kind.Imp", &[]);
    assert_eq!(h.grants.effects_for(MemberId(2)).count(), 1);

    h.remove(2);
    assert_eq!(h.grants.effects_for(MemberId(2)).count(), 0);
    assert_eq!(h.effect_holders("Synergy.Guardian"), vec![MemberId(1)]);
}

#[test]
fn recount_removes_only_the_lost_category() {
    let mut h = Harness::new();
    h.add(1, "Unit.Kind.Paladin", &["Synergy.Fire", "Synergy.Guardian"]);
    h.add(2, "Unit.Kind.Paladin", &["Synergy.Fire", "Synergy.Guardian"]);
    h.add(3, "Unit.Kind.Imp", &["Synergy.Fire"]);
    assert_eq!(h.count("Synergy.Fire"), 2);
    assert_eq!(h.count("Synergy.Guardian"), 1);

    h.retag(1, &["Synergy.Guardian"]);
    assert_eq!(h.count("Synergy.Fire"), 2, "another paladin still carries fire");
    assert_eq!(
        h.effect_holders("Synergy.Fire"),
        vec![MemberId(2), MemberId(3)]
    );

    h.retag(2, &["Synergy.Guardian"]);
    assert_eq!(h.count("Synergy.Fire"), 1);
    assert_eq!(h.count("Synergy.Guardian"), 1);
    assert!(h.effect_holders("Synergy.Fire").is_empty());
    assert!(h.roster.is_consistent());
}

#[test]
fn display_list_summary() {
    let mut h = Harness::new();
    h.add(1, "Unit.Kind.Imp", &["Synergy.Fire"]);
    h.add(2, "Unit.Kind.Drake", &["Synergy.Fire", "Synergy.Assassin"]);
    h.add(3, "Unit.Kind.Knight", &["Synergy.Guardian", "Synergy.Unlisted"]);

    let summary: Vec<String> = h
        .roster
        .display_list()
        .into_iter()
        .map(|entry| {
            let tier = entry
                .tier_index
                .map(|index| index.to_string())
                .unwrap_or_else(|| "-".to_string());
            format!("{}={} tier={} {:?}", entry.tag, entry.count, tier, entry.thresholds)
        })
        .collect();
    insta::assert_snapshot!(
        summary.join(" | "),
        @"Synergy.Fire=2 tier=0 [2, 4] | Synergy.Assassin=1 tier=- [2] | Synergy.Guardian=1 tier=0 [1] | Synergy.Unlisted=1 tier=- []"
    );
}
