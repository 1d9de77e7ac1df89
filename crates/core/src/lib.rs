//! Core domain: keys, sources, aggregates, canonical identity.
//!
//! Everything in this crate is deterministic and IO-free; storage engines
//! live in `botlnek-store`.

pub mod aggregate;
pub mod counter;
pub mod domain;
pub mod keys;
pub mod kv;
pub mod source;

pub use aggregate::{Aggregate, ClockEntry};
pub use counter::SeqNum;
pub use domain::Domain;
pub use keys::{AggregateKey, CollectionToken, DomainKey};
pub use kv::{canonical_bytes, key_hash, StringMap};
pub use source::{Source, SourceLog};
