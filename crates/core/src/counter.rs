//! Revision counter.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Totally-ordered revision number, dense and gap-free within an aggregate.
///
/// One engine-wide integral representation; the JSON boundary encodes it as a
/// zero-padded 16-digit lowercase hex string so the wire value stays opaque
/// and sorts lexicographically. The wide-column engine persists the raw
/// number in the store's native numeric attribute and converts at the row
/// boundary.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeqNum(pub u64);

impl SeqNum {
    pub const ZERO: SeqNum = SeqNum(0);

    pub fn value(self) -> u64 {
        self.0
    }

    /// Dense successor.
    pub fn next(self) -> SeqNum {
        SeqNum(self.0 + 1)
    }
}

impl core::fmt::Display for SeqNum {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for SeqNum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SeqNum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        u64::from_str_radix(&s, 16)
            .map(SeqNum)
            .map_err(|e| D::Error::custom(format!("invalid sequence number {s:?}: {e}")))
    }
}
