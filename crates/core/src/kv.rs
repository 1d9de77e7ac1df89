//! Canonical byte serialization of string maps.
//!
//! The canonical form is the authoritative identity of a source: entries
//! sorted ascending by key (byte-wise), each pair written as
//! `key 0x00 value 0x00`. It is stable under insertion order.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// String→string map used for source keys and attributes.
///
/// `BTreeMap` keeps entries in byte-ascending key order, which is exactly the
/// canonical order, and gives deterministic JSON projections.
pub type StringMap = BTreeMap<String, String>;

/// Serialize a map into its canonical null-terminated byte stream.
pub fn canonical_bytes(m: &StringMap) -> Vec<u8> {
    let mut out = Vec::new();
    for (key, value) in m {
        out.extend_from_slice(key.as_bytes());
        out.push(0);
        out.extend_from_slice(value.as_bytes());
        out.push(0);
    }
    out
}

/// Hex-encoded SHA-256 over the canonical bytes of a map.
pub fn key_hash(m: &StringMap) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(m));
    hex::encode(hasher.finalize())
}
