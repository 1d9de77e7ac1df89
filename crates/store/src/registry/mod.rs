//! Append-only source registry boundary.
//!
//! This module defines the engine contract plus the two backends: the
//! in-memory single-writer engine and the DynamoDB wide-column engine.

pub mod dynamodb;
pub mod in_memory;
pub mod r#trait;

pub use dynamodb::DynamoDbRegistry;
pub use in_memory::InMemoryRegistry;
pub use r#trait::{MutationEvent, SourceRegistry, StoreError};
