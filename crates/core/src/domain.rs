//! Domains: top-level tenancy for aggregates.

use serde::{Deserialize, Serialize};

use crate::keys::DomainKey;
use crate::kv::StringMap;

/// A domain owns aggregates by key convention only; the object itself does
/// not embed them. Domains are created once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Domain {
    pub key: DomainKey,
    #[serde(default)]
    pub attrs: StringMap,
}

impl Domain {
    pub fn new(key: impl Into<DomainKey>, attrs: StringMap) -> Self {
        Self {
            key: key.into(),
            attrs,
        }
    }
}
