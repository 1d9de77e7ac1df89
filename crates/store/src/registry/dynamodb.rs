//! DynamoDB-backed engine (v1 row schema).
//!
//! One table per deployment, composite primary key `(DkAk, AgMem)`:
//!
//! - `DkAk` (partition): JSON array `["<domain>","<aggregate>"]`;
//! - `AgMem` (sort): either a revision row key `R` + 10 zero-padded decimals,
//!   or a source row key, the JSON array `["<token>","<keyHash>"]`.
//!
//! Every row carries a numeric `rev`. Revision rows add `ts` (UTC,
//! millisecond precision); source rows add the `km`/`am` string maps.
//! Because `R…` sorts below any JSON array starting with `"`, one
//! strongly-consistent range query yields all revision rows first, in
//! ascending revision order, followed by all source rows; reconstruction
//! walks that output in a single pass.
//!
//! Coordination is pushed entirely into the backend: appends race for their
//! revision slot with conditional writes inside a two-item transaction, so
//! concurrent process-level callers are inherently safe.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, Put, TransactWriteItem};
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::sync::mpsc;
use tracing::instrument;

use botlnek_core::{
    Aggregate, AggregateKey, ClockEntry, CollectionToken, Domain, DomainKey, SeqNum, Source,
    SourceLog, StringMap,
};

use super::r#trait::{MutationEvent, SourceRegistry, StoreError};
use crate::notifier::{MutationNotifier, SubscriptionGuard};

const COL_REVISION: &str = "rev";
const COL_TIMESTAMP: &str = "ts";
const COL_KEYS: &str = "km";
const COL_ATTRS: &str = "am";

const REV_KEY_PREFIX: char = 'R';
const REV_KEY_MIN: &str = "R0000000000";
const REV_KEY_MAX: &str = "R9999999999";

const TS_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";
const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailed";

/// Revision races are retried internally this many times before the error
/// surfaces to the caller.
const MAX_APPEND_ATTEMPTS: u32 = 4;

/// Endpoint override, used by integration tests against local DynamoDB.
pub const ENDPOINT_ENV: &str = "BOTLNEK_DYNAMODB_ENDPOINT";

/// DynamoDB-backed append-only source registry.
///
/// Stateless at the process level; safe to clone and share across tasks.
///
/// The append path does not publish mutation notifications: subscribers of
/// this registry only observe synthetic `notify_mutation_subscribers` calls.
#[derive(Debug, Clone)]
pub struct DynamoDbRegistry {
    client: Client,
    table_name: String,
    aggregate_key_column: String,
    member_key_column: String,
    notifier: std::sync::Arc<MutationNotifier>,
}

impl DynamoDbRegistry {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            aggregate_key_column: "DkAk".to_string(),
            member_key_column: "AgMem".to_string(),
            notifier: std::sync::Arc::new(MutationNotifier::new()),
        }
    }

    /// Build a registry from ambient AWS configuration, honoring the
    /// `BOTLNEK_DYNAMODB_ENDPOINT` override.
    pub async fn from_env(table_name: impl Into<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        Self::new(Client::new(&config), table_name)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn aggregate_key_column(&self) -> &str {
        &self.aggregate_key_column
    }

    pub fn member_key_column(&self) -> &str {
        &self.member_key_column
    }

    /// Partition key for an aggregate: JSON array of domain + aggregate key.
    pub fn hash_key(&self, domain: &DomainKey, aggregate: &AggregateKey) -> Result<String, StoreError> {
        serde_json::to_string(&[domain.as_str(), aggregate.as_str()])
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Sort key of a source row: JSON array of collection token + key hash.
    fn member_key(&self, token: &CollectionToken, key_hash: &str) -> Result<String, StoreError> {
        serde_json::to_string(&[token.as_str(), key_hash])
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Next revision for a partition: one strongly-consistent descending
    /// query over the revision-row key range.
    async fn get_next_rev(&self, hash_key: &str) -> Result<u32, StoreError> {
        let output = self
            .client
            .query()
            .table_name(&self.table_name)
            .key_condition_expression("#h = :hk AND #m BETWEEN :lo AND :hi")
            .expression_attribute_names("#h", &self.aggregate_key_column)
            .expression_attribute_names("#m", &self.member_key_column)
            .expression_attribute_values(":hk", AttributeValue::S(hash_key.to_string()))
            .expression_attribute_values(":lo", AttributeValue::S(REV_KEY_MIN.to_string()))
            .expression_attribute_values(":hi", AttributeValue::S(REV_KEY_MAX.to_string()))
            .scan_index_forward(false)
            .limit(1)
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("revision query failed: {e}")))?;

        match output.items().first() {
            None => Ok(0),
            Some(item) => Ok(numeric_attr(item, COL_REVISION)? + 1),
        }
    }
}

#[async_trait]
impl SourceRegistry for DynamoDbRegistry {
    async fn append_new_domain(&self, _domain: Domain) -> Result<Option<Domain>, StoreError> {
        // TODO: define a domain row under the (DkAk, AgMem) schema; the v1
        // table only stores aggregate partitions.
        Err(StoreError::Unsupported(
            "domain rows are not part of the v1 table schema".to_string(),
        ))
    }

    async fn get_domain(&self, _key: &DomainKey) -> Result<Option<Domain>, StoreError> {
        // TODO: see append_new_domain.
        Err(StoreError::Unsupported(
            "domain rows are not part of the v1 table schema".to_string(),
        ))
    }

    #[instrument(skip(self, source), fields(domain = %domain, aggregate = %aggregate, token = %token), err)]
    async fn append_new_source(
        &self,
        domain: &DomainKey,
        aggregate: &AggregateKey,
        token: &CollectionToken,
        source: Source,
    ) -> Result<Option<Source>, StoreError> {
        let hash_key = self.hash_key(domain, aggregate)?;
        let member_key = self.member_key(token, &source.key_hash())?;

        for attempt in 0..MAX_APPEND_ATTEMPTS {
            let next = self.get_next_rev(&hash_key).await?;

            let revision_put = Put::builder()
                .table_name(&self.table_name)
                .item(
                    self.aggregate_key_column.clone(),
                    AttributeValue::S(hash_key.clone()),
                )
                .item(
                    self.member_key_column.clone(),
                    AttributeValue::S(rev_sort_key(next)),
                )
                .item(COL_REVISION, AttributeValue::N(next.to_string()))
                .item(
                    COL_TIMESTAMP,
                    AttributeValue::S(format_row_timestamp(Utc::now())),
                )
                .condition_expression("attribute_not_exists(#m)")
                .expression_attribute_names("#m", &self.member_key_column)
                .build()
                .map_err(|e| StoreError::Backend(format!("invalid revision item: {e}")))?;

            let source_put = Put::builder()
                .table_name(&self.table_name)
                .item(
                    self.aggregate_key_column.clone(),
                    AttributeValue::S(hash_key.clone()),
                )
                .item(
                    self.member_key_column.clone(),
                    AttributeValue::S(member_key.clone()),
                )
                .item(COL_REVISION, AttributeValue::N(next.to_string()))
                .item(COL_KEYS, string_map_to_attr(&source.keys))
                .item(COL_ATTRS, string_map_to_attr(&source.attrs))
                .condition_expression("attribute_not_exists(#m)")
                .expression_attribute_names("#m", &self.member_key_column)
                .build()
                .map_err(|e| StoreError::Backend(format!("invalid source item: {e}")))?;

            // Item order matters for cancellation-reason indexing below:
            // [0] = revision row, [1] = source row.
            let result = self
                .client
                .transact_write_items()
                .transact_items(TransactWriteItem::builder().put(revision_put).build())
                .transact_items(TransactWriteItem::builder().put(source_put).build())
                .send()
                .await;

            let err = match result {
                Ok(_) => return Ok(Some(source)),
                Err(err) => err.into_service_error(),
            };

            if let TransactWriteItemsError::TransactionCanceledException(cancel) = &err {
                let reasons = cancel.cancellation_reasons();
                let code = |idx: usize| reasons.get(idx).and_then(|r| r.code()).unwrap_or("None");

                // The source row already exists: a benign duplicate, and the
                // only conditional failure we swallow. The whole transaction
                // rolled back, so the revision row's outcome is irrelevant.
                if code(1) == CONDITIONAL_CHECK_FAILED {
                    return Ok(None);
                }

                // Only the revision row collided: a concurrent writer claimed
                // this revision. Re-read the next revision and try again.
                if code(0) == CONDITIONAL_CHECK_FAILED {
                    tracing::warn!(attempt, revision = next, "revision claimed concurrently, retrying");
                    continue;
                }
            }

            return Err(StoreError::Backend(format!(
                "transactional append failed: {err}"
            )));
        }

        Err(StoreError::RevisionConflict(format!(
            "lost the revision race {MAX_APPEND_ATTEMPTS} times for {hash_key}"
        )))
    }

    #[instrument(skip(self), fields(domain = %domain, aggregate = %aggregate), err)]
    async fn get_aggregate(
        &self,
        domain: &DomainKey,
        aggregate: &AggregateKey,
    ) -> Result<Option<Aggregate>, StoreError> {
        let hash_key = self.hash_key(domain, aggregate)?;

        let mut items = Vec::new();
        let mut exclusive_start = None;
        loop {
            let mut query = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("#h = :hk")
                .expression_attribute_names("#h", &self.aggregate_key_column)
                .expression_attribute_names("#m", &self.member_key_column)
                .expression_attribute_values(":hk", AttributeValue::S(hash_key.clone()))
                .projection_expression(format!(
                    "#m, {COL_REVISION}, {COL_TIMESTAMP}, {COL_KEYS}, {COL_ATTRS}"
                ))
                .scan_index_forward(true)
                .consistent_read(true);
            if let Some(start) = exclusive_start.take() {
                query = query.set_exclusive_start_key(Some(start));
            }

            let page = query
                .send()
                .await
                .map_err(|e| StoreError::Backend(format!("aggregate query failed: {e}")))?;
            items.extend_from_slice(page.items());

            match page.last_evaluated_key() {
                Some(key) if !key.is_empty() => exclusive_start = Some(key.clone()),
                _ => break,
            }
        }

        build_aggregate(aggregate, &self.member_key_column, &items)
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

/// Sort key of a revision row.
fn rev_sort_key(rev: u32) -> String {
    format!("{REV_KEY_PREFIX}{rev:010}")
}

fn format_row_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_row_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| StoreError::Corrupt(format!("bad revision timestamp {raw:?}: {e}")))
}

fn string_map_to_attr(m: &StringMap) -> AttributeValue {
    AttributeValue::M(
        m.iter()
            .map(|(k, v)| (k.clone(), AttributeValue::S(v.clone())))
            .collect(),
    )
}

fn string_attr(item: &HashMap<String, AttributeValue>, col: &str) -> Result<String, StoreError> {
    item.get(col)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| StoreError::Corrupt(format!("row missing string attribute {col:?}")))
}

fn numeric_attr(item: &HashMap<String, AttributeValue>, col: &str) -> Result<u32, StoreError> {
    let raw = item
        .get(col)
        .and_then(|v| v.as_n().ok())
        .ok_or_else(|| StoreError::Corrupt(format!("row missing numeric attribute {col:?}")))?;
    raw.parse::<u32>()
        .map_err(|e| StoreError::Corrupt(format!("bad numeric attribute {col:?}={raw:?}: {e}")))
}

fn string_map_attr(item: &HashMap<String, AttributeValue>, col: &str) -> Result<StringMap, StoreError> {
    let m = item
        .get(col)
        .and_then(|v| v.as_m().ok())
        .ok_or_else(|| StoreError::Corrupt(format!("row missing map attribute {col:?}")))?;
    m.iter()
        .map(|(k, v)| {
            v.as_s()
                .map(|s| (k.clone(), s.clone()))
                .map_err(|_| StoreError::Corrupt(format!("non-string value in map attribute {col:?}")))
        })
        .collect()
}

/// Rebuild an aggregate from one partition's rows, in sort-key order.
///
/// Pure over the query output so reconstruction is testable without a live
/// table. Revision rows must all precede source rows; anything else is
/// corrupt. Per-token groups are resorted by `version_idx`, which is the
/// authoritative order regardless of the key-hash tie-break in the sort key.
fn build_aggregate(
    key: &AggregateKey,
    member_column: &str,
    items: &[HashMap<String, AttributeValue>],
) -> Result<Option<Aggregate>, StoreError> {
    let mut log: Vec<ClockEntry> = Vec::new();
    let mut sources: BTreeMap<CollectionToken, Vec<SourceLog>> = BTreeMap::new();
    let mut in_sources = false;

    for item in items {
        let member = string_attr(item, member_column)?;
        if member.starts_with(REV_KEY_PREFIX) {
            if in_sources {
                return Err(StoreError::Corrupt(format!(
                    "revision row {member:?} sorted after source rows"
                )));
            }
            log.push(ClockEntry {
                seq_num: SeqNum(u64::from(numeric_attr(item, COL_REVISION)?)),
                approximate: parse_row_timestamp(&string_attr(item, COL_TIMESTAMP)?)?,
            });
        } else {
            in_sources = true;
            let [token, key_hash]: [String; 2] = serde_json::from_str(&member)
                .map_err(|e| StoreError::Corrupt(format!("malformed source row key {member:?}: {e}")))?;
            sources
                .entry(CollectionToken::from(token))
                .or_default()
                .push(SourceLog {
                    version_idx: u64::from(numeric_attr(item, COL_REVISION)?),
                    key: key_hash,
                    source: Source::new(
                        string_map_attr(item, COL_KEYS)?,
                        string_map_attr(item, COL_ATTRS)?,
                    ),
                });
        }
    }

    if log.is_empty() {
        return Ok(None);
    }

    for group in sources.values_mut() {
        group.sort_by_key(|entry| entry.version_idx);
    }

    Ok(Some(Aggregate {
        key: key.clone(),
        attrs: StringMap::new(),
        log,
        sources,
    }))
}
