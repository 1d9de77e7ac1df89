use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use botlnek_core::{Aggregate, AggregateKey, CollectionToken, Domain, DomainKey, Source};

use crate::notifier::SubscriptionGuard;

/// Post-image notification published after every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MutationEvent {
    pub domain_key: DomainKey,
    pub aggregate: Aggregate,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend I/O or SDK failure.
    #[error("backend failure: {0}")]
    Backend(String),

    /// Payload (de)serialization failed.
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// A revision race survived the internal retry bound; callers may retry.
    #[error("revision conflict: {0}")]
    RevisionConflict(String),

    /// Persisted rows violate the schema invariants (unreachable state).
    #[error("corrupt aggregate state: {0}")]
    Corrupt(String),

    /// The backend has no schema for this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Operation submitted to an engine that has been stopped.
    #[error("engine stopped")]
    EngineStopped,
}

/// Append-only registry of sources grouped under Domain → Aggregate →
/// CollectionToken.
///
/// Contract notes shared by every backend:
/// - missing entities are `Ok(None)`, never errors;
/// - redundant appends (same domain key, or same
///   `(aggregate, token, key_hash)`) are `Ok(None)` no-ops;
/// - returned objects are value snapshots the caller may freely modify.
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    /// Store a domain if its key is unknown. First write wins; attrs of a
    /// redundant append are not compared.
    async fn append_new_domain(&self, domain: Domain) -> Result<Option<Domain>, StoreError>;

    async fn get_domain(&self, key: &DomainKey) -> Result<Option<Domain>, StoreError>;

    /// Admit a source under `(domain, aggregate, token)`, implicitly creating
    /// the aggregate. Admission allocates the next dense revision.
    async fn append_new_source(
        &self,
        domain: &DomainKey,
        aggregate: &AggregateKey,
        token: &CollectionToken,
        source: Source,
    ) -> Result<Option<Source>, StoreError>;

    async fn get_aggregate(
        &self,
        domain: &DomainKey,
        aggregate: &AggregateKey,
    ) -> Result<Option<Aggregate>, StoreError>;

    /// Register a mutation sink; the guard unsubscribes on drop. The engine
    /// never closes caller-owned sinks.
    fn subscribe_to_mutations(&self, sink: mpsc::Sender<Vec<u8>>) -> SubscriptionGuard;

    /// Publish a message to all mutation subscribers. Engines call this on
    /// successful mutation; external users may call it for synthetic events.
    fn notify_mutation_subscribers(&self, message: &MutationEvent) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> SourceRegistry for Arc<S>
where
    S: SourceRegistry + ?Sized,
{
    async fn append_new_domain(&self, domain: Domain) -> Result<Option<Domain>, StoreError> {
        (**self).append_new_domain(domain).await
    }

    async fn get_domain(&self, key: &DomainKey) -> Result<Option<Domain>, StoreError> {
        (**self).get_domain(key).await
    }

    async fn append_new_source(
        &self,
        domain: &DomainKey,
        aggregate: &AggregateKey,
        token: &CollectionToken,
        source: Source,
    ) -> Result<Option<Source>, StoreError> {
        (**self)
            .append_new_source(domain, aggregate, token, source)
            .await
    }

    async fn get_aggregate(
        &self,
        domain: &DomainKey,
        aggregate: &AggregateKey,
    ) -> Result<Option<Aggregate>, StoreError> {
        (**self).get_aggregate(domain, aggregate).await
    }

    fn subscribe_to_mutations(&self, sink: mpsc::Sender<Vec<u8>>) -> SubscriptionGuard {
        (**self).subscribe_to_mutations(sink)
    }

    fn notify_mutation_subscribers(&self, message: &MutationEvent) -> Result<(), StoreError> {
        (**self).notify_mutation_subscribers(message)
    }
}
