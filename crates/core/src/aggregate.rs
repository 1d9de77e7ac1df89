//! Aggregates: append-only, totally-ordered collections of admitted sources.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::counter::SeqNum;
use crate::keys::{AggregateKey, CollectionToken};
use crate::kv::StringMap;
use crate::source::SourceLog;

/// One commit in an aggregate's revision log.
///
/// `approximate` is the wall-clock time at the instant of commit; it carries
/// no ordering guarantee beyond what `seq_num` already provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClockEntry {
    pub seq_num: SeqNum,
    pub approximate: DateTime<Utc>,
}

/// Post-image of an aggregate.
///
/// Invariants:
/// - `log.len()` equals the total number of admitted sources;
/// - `log` is strictly ascending by `seq_num`;
/// - the `version_idx` values across all token groups are distinct and
///   together exhaust `0..log.len()`;
/// - within a token group, `version_idx` ascends and `key` values are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Aggregate {
    pub key: AggregateKey,
    #[serde(default)]
    pub attrs: StringMap,
    #[serde(default)]
    pub log: Vec<ClockEntry>,
    #[serde(default)]
    pub sources: BTreeMap<CollectionToken, Vec<SourceLog>>,
}

impl Aggregate {
    /// Fresh, empty aggregate (comes into existence on first admission).
    pub fn new(key: impl Into<AggregateKey>) -> Self {
        Self {
            key: key.into(),
            attrs: StringMap::new(),
            log: Vec::new(),
            sources: BTreeMap::new(),
        }
    }

    /// Total number of admitted sources across all collection tokens.
    pub fn source_count(&self) -> usize {
        self.sources.values().map(Vec::len).sum()
    }
}
