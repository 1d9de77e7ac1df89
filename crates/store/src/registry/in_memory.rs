//! In-memory single-writer engine.
//!
//! Intended for dev/tests. All state is owned by one worker task; callers
//! submit tagged operations over a serial channel and await a oneshot reply.
//! Parallelism lives on the outside of the engine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use botlnek_core::{
    Aggregate, AggregateKey, ClockEntry, CollectionToken, Domain, DomainKey, SeqNum, Source,
    SourceLog,
};

use super::r#trait::{MutationEvent, SourceRegistry, StoreError};
use crate::notifier::{MutationNotifier, SubscriptionGuard};

enum EngineOp {
    AppendDomain {
        domain: Domain,
        reply: oneshot::Sender<Option<Domain>>,
    },
    GetDomain {
        key: DomainKey,
        reply: oneshot::Sender<Option<Domain>>,
    },
    AppendSource {
        domain: DomainKey,
        aggregate: AggregateKey,
        token: CollectionToken,
        source: Source,
        reply: oneshot::Sender<Option<Source>>,
    },
    GetAggregate {
        domain: DomainKey,
        aggregate: AggregateKey,
        reply: oneshot::Sender<Option<Aggregate>>,
    },
}

struct AggregateContainer {
    next_seq: SeqNum,
    aggregate: Aggregate,
    /// token → key hashes already admitted under that token.
    registrations: BTreeMap<CollectionToken, BTreeSet<String>>,
}

impl AggregateContainer {
    fn new(key: AggregateKey) -> Self {
        Self {
            next_seq: SeqNum::ZERO,
            aggregate: Aggregate::new(key),
            registrations: BTreeMap::new(),
        }
    }
}

/// Worker-private state. Nothing outside the worker ever holds a reference
/// into these maps; replies are value copies.
struct EngineState {
    domains: HashMap<DomainKey, Domain>,
    aggregates: HashMap<DomainKey, HashMap<AggregateKey, AggregateContainer>>,
    notifier: Arc<MutationNotifier>,
}

impl EngineState {
    fn apply(&mut self, op: EngineOp) {
        match op {
            EngineOp::AppendDomain { domain, reply } => {
                let _ = reply.send(self.append_domain(domain));
            }
            EngineOp::GetDomain { key, reply } => {
                let _ = reply.send(self.domains.get(&key).cloned());
            }
            EngineOp::AppendSource {
                domain,
                aggregate,
                token,
                source,
                reply,
            } => {
                let _ = reply.send(self.append_source(domain, aggregate, token, source));
            }
            EngineOp::GetAggregate {
                domain,
                aggregate,
                reply,
            } => {
                let snapshot = self
                    .aggregates
                    .get(&domain)
                    .and_then(|per_domain| per_domain.get(&aggregate))
                    .map(|container| container.aggregate.clone());
                let _ = reply.send(snapshot);
            }
        }
    }

    fn append_domain(&mut self, domain: Domain) -> Option<Domain> {
        if self.domains.contains_key(&domain.key) {
            // Redundant, not an error; first write wins.
            return None;
        }
        self.domains.insert(domain.key.clone(), domain.clone());
        Some(domain)
    }

    fn append_source(
        &mut self,
        domain: DomainKey,
        aggregate: AggregateKey,
        token: CollectionToken,
        source: Source,
    ) -> Option<Source> {
        let container = self
            .aggregates
            .entry(domain.clone())
            .or_default()
            .entry(aggregate.clone())
            .or_insert_with(|| AggregateContainer::new(aggregate.clone()));

        let key_hash = source.key_hash();
        if container
            .registrations
            .get(&token)
            .is_some_and(|admitted| admitted.contains(&key_hash))
        {
            return None;
        }

        let seq = container.next_seq;
        container.next_seq = seq.next();
        container.aggregate.log.push(ClockEntry {
            seq_num: seq,
            approximate: Utc::now(),
        });
        container
            .aggregate
            .sources
            .entry(token.clone())
            .or_default()
            .push(SourceLog {
                version_idx: seq.value(),
                key: key_hash.clone(),
                source: source.clone(),
            });
        container
            .registrations
            .entry(token)
            .or_default()
            .insert(key_hash);

        // Hand the post-image to the notifier; best effort, never blocking
        // the worker.
        let event = MutationEvent {
            domain_key: domain,
            aggregate: container.aggregate.clone(),
        };
        match serde_json::to_vec(&event) {
            Ok(payload) => self.notifier.publish(payload),
            Err(e) => tracing::warn!("dropping mutation notification, serialization failed: {e}"),
        }

        Some(source)
    }
}

/// In-memory append-only source registry.
///
/// Must be constructed within a tokio runtime (the worker task is spawned at
/// construction). `stop` lets already-queued operations complete, then the
/// worker exits; later submissions fail with [`StoreError::EngineStopped`].
pub struct InMemoryRegistry {
    ops: mpsc::Sender<EngineOp>,
    notifier: Arc<MutationNotifier>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        let notifier = Arc::new(MutationNotifier::new());
        let (ops, ops_rx) = mpsc::channel(1);
        let (shutdown, shutdown_rx) = oneshot::channel();

        let state = EngineState {
            domains: HashMap::new(),
            aggregates: HashMap::new(),
            notifier: notifier.clone(),
        };
        tokio::spawn(run_engine(state, ops_rx, shutdown_rx));

        Self {
            ops,
            notifier,
            shutdown: Mutex::new(Some(shutdown)),
        }
    }

    /// Signal the worker to stop. In-flight and already-queued operations
    /// complete first; this call does not wait for them.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.shutdown.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }

    async fn submit<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> EngineOp,
    ) -> Result<R, StoreError> {
        let (reply, response) = oneshot::channel();
        self.ops
            .send(build(reply))
            .await
            .map_err(|_| StoreError::EngineStopped)?;
        response.await.map_err(|_| StoreError::EngineStopped)
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_engine(
    mut state: EngineState,
    mut ops: mpsc::Receiver<EngineOp>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            op = ops.recv() => match op {
                Some(op) => state.apply(op),
                None => break,
            },
            _ = &mut shutdown => {
                // Reject new submissions, then drain what was already queued.
                ops.close();
                while let Some(op) = ops.recv().await {
                    state.apply(op);
                }
                break;
            }
        }
    }
}

#[async_trait]
impl SourceRegistry for InMemoryRegistry {
    async fn append_new_domain(&self, domain: Domain) -> Result<Option<Domain>, StoreError> {
        self.submit(|reply| EngineOp::AppendDomain { domain, reply })
            .await
    }

    async fn get_domain(&self, key: &DomainKey) -> Result<Option<Domain>, StoreError> {
        let key = key.clone();
        self.submit(|reply| EngineOp::GetDomain { key, reply }).await
    }

    async fn append_new_source(
        &self,
        domain: &DomainKey,
        aggregate: &AggregateKey,
        token: &CollectionToken,
        source: Source,
    ) -> Result<Option<Source>, StoreError> {
        let (domain, aggregate, token) = (domain.clone(), aggregate.clone(), token.clone());
        self.submit(|reply| EngineOp::AppendSource {
            domain,
            aggregate,
            token,
            source,
            reply,
        })
        .await
    }

    async fn get_aggregate(
        &self,
        domain: &DomainKey,
        aggregate: &AggregateKey,
    ) -> Result<Option<Aggregate>, StoreError> {
        let (domain, aggregate) = (domain.clone(), aggregate.clone());
        self.submit(|reply| EngineOp::GetAggregate {
            domain,
            aggregate,
            reply,
        })
        .await
    }

    fn subscribe_to_mutations(&self, sink: mpsc::Sender<Vec<u8>>) -> SubscriptionGuard {
        self.notifier.subscribe(sink)
    }

    fn notify_mutation_subscribers(&self, message: &MutationEvent) -> Result<(), StoreError> {
        let payload =
            serde_json::to_vec(message).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.notifier.publish(payload);
        Ok(())
    }
}
