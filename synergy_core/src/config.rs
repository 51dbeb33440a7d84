use std::env;

use bevy::prelude::*;
use synergy_schema::GameplayTag;

/// Which side of the replication boundary this process runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetRole {
    #[default]
    Authority,
    Observer,
}

impl NetRole {
    pub fn has_authority(self) -> bool {
        matches!(self, NetRole::Authority)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "authority" | "server" => Some(NetRole::Authority),
            "observer" | "client" => Some(NetRole::Observer),
            _ => None,
        }
    }
}

/// Global configuration for the synergy roster.
#[derive(Resource, Debug, Clone)]
pub struct SynergyConfig {
    pub role: NetRole,
    /// Owned tags under this namespace count as synergy categories.
    pub category_namespace: GameplayTag,
    /// Game-state tag that marks an active combat phase; any other state ends it.
    pub combat_active_state: GameplayTag,
    pub rng_seed: u64,
}

impl Default for SynergyConfig {
    fn default() -> Self {
        Self {
            role: NetRole::Authority,
            category_namespace: GameplayTag::new("Synergy"),
            combat_active_state: GameplayTag::new("Game.State.Combat.Active"),
            rng_seed: 0x5eed_0001,
        }
    }
}

impl SynergyConfig {
    pub fn observer() -> Self {
        Self {
            role: NetRole::Observer,
            ..Self::default()
        }
    }

    /// Apply `SYNERGY_NET_ROLE` and `SYNERGY_RNG_SEED` when present.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = env::var("SYNERGY_NET_ROLE") {
            match NetRole::parse(&raw) {
                Some(role) => self.role = role,
                None => tracing::warn!(
                    target: "synergy::config",
                    value = %raw,
                    "config.net_role_invalid"
                ),
            }
        }
        if let Ok(raw) = env::var("SYNERGY_RNG_SEED") {
            match raw.trim().parse::<u64>() {
                Ok(seed) => self.rng_seed = seed,
                Err(err) => tracing::warn!(
                    target: "synergy::config",
                    value = %raw,
                    error = %err,
                    "config.rng_seed_invalid"
                ),
            }
        }
        self
    }
}

/// Tracks total roster ticks elapsed.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynergyTick(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_accepts_aliases() {
        assert_eq!(NetRole::parse("Server"), Some(NetRole::Authority));
        assert_eq!(NetRole::parse(" client "), Some(NetRole::Observer));
        assert_eq!(NetRole::parse("spectator"), None);
    }

    #[test]
    fn default_config_is_authoritative() {
        let config = SynergyConfig::default();
        assert!(config.role.has_authority());
        assert!(!SynergyConfig::observer().role.has_authority());
        assert_eq!(config.category_namespace.as_str(), "Synergy");
    }
}
