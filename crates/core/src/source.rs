//! Sources and their per-revision log entries.

use serde::{Deserialize, Serialize};

use crate::kv::{key_hash, StringMap};

/// An opaque key/value payload registered under an aggregate.
///
/// `keys` is the identity of the source; `attrs` is free-form payload that
/// does not participate in identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Source {
    #[serde(default)]
    pub keys: StringMap,
    #[serde(default)]
    pub attrs: StringMap,
}

impl Source {
    pub fn new(keys: StringMap, attrs: StringMap) -> Self {
        Self { keys, attrs }
    }

    /// Canonical identity: hex SHA-256 over the canonical bytes of `keys`.
    pub fn key_hash(&self) -> String {
        key_hash(&self.keys)
    }
}

/// A source as admitted into an aggregate, pinned to its defining revision.
///
/// Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceLog {
    /// Position of the defining revision in the aggregate's log.
    pub version_idx: u64,
    /// Equals `source.key_hash()`.
    pub key: String,
    pub source: Source,
}
