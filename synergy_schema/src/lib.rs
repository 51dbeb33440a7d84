//! Wire contracts for synergy count replication.
//!
//! This crate is deliberately free of the Bevy runtime so observers, tools and
//! tests can decode frames without pulling in `synergy_core`.

mod count_array;
mod tag;

use std::hash::Hasher;

pub use count_array::{
    hash_entries, ReplicationBaseline, SynergyCountArray, SynergyCountEntry, SynergyCountFrame,
    SynergyCountMirror,
};
pub use tag::{tags_under, GameplayTag, TagSet};

/// Deterministic FNV-1a 64-bit hasher.
///
/// Frame hashes and per-category RNG seeds must agree between processes, so
/// the randomized `DefaultHasher` is not an option.
#[derive(Debug, Clone)]
pub struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }

    pub fn finish(&self) -> u64 {
        self.state
    }
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        self.write_bytes(bytes);
    }
}

/// Stable 64-bit hash of a string identifier.
pub fn stable_hash(value: &str) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write_bytes(value.as_bytes());
    hasher.finish()
}

pub fn encode_frame(frame: &SynergyCountFrame) -> bincode::Result<Vec<u8>> {
    bincode::serialize(frame)
}

pub fn decode_frame(data: &[u8]) -> bincode::Result<SynergyCountFrame> {
    bincode::deserialize(data)
}

pub fn encode_frame_json(frame: &SynergyCountFrame) -> serde_json::Result<String> {
    serde_json::to_string(frame)
}

pub fn decode_frame_json(data: &str) -> serde_json::Result<SynergyCountFrame> {
    serde_json::from_str(data)
}
