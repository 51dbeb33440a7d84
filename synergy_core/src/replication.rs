use std::collections::VecDeque;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use synergy_schema::{
    decode_frame, encode_frame, GameplayTag, ReplicationBaseline, SynergyCountArray,
    SynergyCountEntry, SynergyCountFrame, SynergyCountMirror,
};
use thiserror::Error;

use crate::definitions::SynergyDefinitionSet;

/// Presentation row derived from a replicated count and the local definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynergyDisplayEntry {
    pub tag: GameplayTag,
    pub count: i32,
    pub thresholds: Vec<i32>,
    pub tier_index: Option<usize>,
}

pub fn build_display_list(
    entries: &[SynergyCountEntry],
    definitions: &SynergyDefinitionSet,
) -> Vec<SynergyDisplayEntry> {
    entries
        .iter()
        .map(|entry| SynergyDisplayEntry {
            tag: entry.tag.clone(),
            count: entry.count,
            thresholds: definitions.thresholds(&entry.tag),
            tier_index: definitions.tier_index(&entry.tag, entry.count),
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("failed to decode synergy frame: {0}")]
    Decode(#[from] bincode::Error),
    #[error("stale synergy frame for tick {tick} (last applied {last})")]
    Stale { tick: u64, last: u64 },
    #[error("delta frame for tick {tick} ignored while awaiting a full frame")]
    AwaitingFullFrame { tick: u64 },
    #[error("synergy frame hash mismatch at tick {tick}: expected {expected:#x}, found {actual:#x}")]
    HashMismatch { tick: u64, expected: u64, actual: u64 },
}

/// Authority-side record of the frames produced for observers.
#[derive(Resource, Debug, Default)]
pub struct SynergyReplicationHistory {
    pub last_frame: Option<SynergyCountFrame>,
    pub encoded_delta: Option<Vec<u8>>,
    pub encoded_full: Option<Vec<u8>>,
    baseline: ReplicationBaseline,
    frames_sent: u64,
}

impl SynergyReplicationHistory {
    /// Build the delta since the last capture. Returns `None` when nothing
    /// changed; the previous encodings are kept in that case.
    pub fn capture(&mut self, array: &SynergyCountArray, tick: u64) -> Option<&SynergyCountFrame> {
        let first = self.last_frame.is_none();
        let frame = array.delta_since(&self.baseline, tick);
        if frame.is_empty() && !first {
            return None;
        }

        match encode_frame(&frame) {
            Ok(bytes) => self.encoded_delta = Some(bytes),
            Err(err) => {
                tracing::warn!(
                    target: "synergy::replication",
                    tick,
                    error = %err,
                    "replication.encode_failed"
                );
                return None;
            }
        }
        self.encoded_full = encode_frame(&array.full_frame(tick)).ok();

        tracing::trace!(
            target: "synergy::replication",
            tick,
            changed = frame.changed.len(),
            removed = frame.removed.len(),
            "replication.frame_captured"
        );
        self.baseline = array.baseline();
        self.frames_sent += 1;
        self.last_frame = Some(frame);
        self.last_frame.as_ref()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }
}

/// Encoded frames waiting to be applied on an observer.
#[derive(Resource, Debug, Default)]
pub struct SynergyFrameInbox {
    frames: VecDeque<Vec<u8>>,
}

impl SynergyFrameInbox {
    pub fn push(&mut self, bytes: Vec<u8>) {
        self.frames.push_back(bytes);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.frames.drain(..)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Observer-side, read-only view of the replicated counts.
#[derive(Resource, Debug, Default)]
pub struct ObservedSynergyCounts {
    mirror: SynergyCountMirror,
    last_tick: Option<u64>,
    needs_full_frame: bool,
}

impl ObservedSynergyCounts {
    pub fn mirror(&self) -> &SynergyCountMirror {
        &self.mirror
    }

    pub fn last_tick(&self) -> Option<u64> {
        self.last_tick
    }

    pub fn needs_full_frame(&self) -> bool {
        self.needs_full_frame
    }

    pub fn count(&self, tag: &GameplayTag) -> i32 {
        self.mirror.count(tag).unwrap_or(0)
    }

    pub fn display_list(&self, definitions: &SynergyDefinitionSet) -> Vec<SynergyDisplayEntry> {
        build_display_list(self.mirror.entries(), definitions)
    }

    pub fn ingest_bytes(&mut self, bytes: &[u8]) -> Result<bool, ReplicationError> {
        let frame = decode_frame(bytes)?;
        self.ingest(&frame)
    }

    /// Apply a frame. Returns whether the visible counts changed.
    pub fn ingest(&mut self, frame: &SynergyCountFrame) -> Result<bool, ReplicationError> {
        if let Some(last) = self.last_tick {
            if frame.tick < last {
                return Err(ReplicationError::Stale {
                    tick: frame.tick,
                    last,
                });
            }
        }
        if self.needs_full_frame && !frame.full {
            return Err(ReplicationError::AwaitingFullFrame { tick: frame.tick });
        }

        let changed = self.mirror.apply(frame);
        self.last_tick = Some(frame.tick);

        let actual = self.mirror.hash();
        if actual != frame.hash {
            self.needs_full_frame = true;
            return Err(ReplicationError::HashMismatch {
                tick: frame.tick,
                expected: frame.hash,
                actual,
            });
        }
        self.needs_full_frame = false;
        Ok(changed)
    }
}
