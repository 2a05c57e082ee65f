//! # dynamotor-sandbox
//!
//! An in-memory implementation of the dynamotor store protocol, for tests
//! and local development. Rows live in per-table ordered maps; condition,
//! key-condition, and update expressions are evaluated by a small parser
//! covering the subset the access layer emits.
//!
//! Fault injection hooks make the engine's recovery paths deterministic to
//! test: `batch_get` responses can be capped to surface unprocessed-keys
//! recursion, and `transact_write` failures can be queued to exercise retry
//! and rollback.

pub mod expr;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use dynamotor_core::ops::Expression;
use dynamotor_core::store::{
    BatchGetRequest, BatchGetResponse, BatchWriteRequest, BatchWriteResponse, DeleteRequest,
    GetRequest, PutRequest, QueryRequest, QueryResponse, ScanRequest, Store, StoreError,
    TransactWriteItem, TransactWriteRequest, UpdateRequest,
};
use dynamotor_core::types::{
    ATTR_PK, ATTR_SK, IndexName, Item, Key, MAX_TRANSACT_ITEMS, key_of_item,
};

use expr::{UpdateAction, apply_update, compare_values, parse, parse_update};

type RowKey = (String, String);
type Table = BTreeMap<RowKey, Item>;

#[derive(Default)]
struct State {
    tables: HashMap<String, Table>,
    transact_faults: VecDeque<StoreError>,
    batch_get_limit: Option<usize>,
    batch_get_calls: u64,
    transact_calls: u64,
    query_calls: u64,
}

/// An in-memory store holding every table in process memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of items served per `batch_get` call; the remaining
    /// keys come back as unprocessed.
    pub fn set_batch_get_limit(&self, limit: usize) {
        self.state.lock().batch_get_limit = Some(limit);
    }

    /// Queue an error for an upcoming `transact_write`; faults pop in FIFO
    /// order, one per call.
    pub fn push_transact_fault(&self, fault: StoreError) {
        self.state.lock().transact_faults.push_back(fault);
    }

    /// All rows of a table, in primary key order.
    pub fn snapshot(&self, table: &str) -> Vec<Item> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// One row by primary key.
    pub fn row(&self, table: &str, pk: &str, sk: &str) -> Option<Item> {
        self.state
            .lock()
            .tables
            .get(table)
            .and_then(|t| t.get(&(pk.to_string(), sk.to_string())))
            .cloned()
    }

    pub fn batch_get_calls(&self) -> u64 {
        self.state.lock().batch_get_calls
    }

    pub fn transact_calls(&self) -> u64 {
        self.state.lock().transact_calls
    }

    pub fn query_calls(&self) -> u64 {
        self.state.lock().query_calls
    }
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::Transport(message.into())
}

fn row_key_of_item(item: &Item) -> Result<RowKey, StoreError> {
    key_of_item(item)
        .map(|k| (k.pk, k.sk))
        .ok_or_else(|| invalid("item is missing its key attributes"))
}

fn row_key(key: &Key) -> RowKey {
    (key.pk.clone(), key.sk.clone())
}

/// Evaluate a condition against the existing row, or against an empty
/// document when the row is absent (so `attribute_not_exists` passes for
/// non-existent items).
fn condition_holds(condition: &Expression, existing: Option<&Item>) -> Result<bool, StoreError> {
    let parsed = parse(&condition.expression, &condition.names, &condition.values)
        .map_err(|e| invalid(e.to_string()))?;
    let empty = Item::new();
    Ok(parsed.eval(existing.unwrap_or(&empty)))
}

fn check_condition(
    condition: Option<&Expression>,
    existing: Option<&Item>,
) -> Result<(), StoreError> {
    if let Some(condition) = condition
        && !condition_holds(condition, existing)?
    {
        return Err(StoreError::ConditionFailed);
    }
    Ok(())
}

/// Apply parsed update actions on top of the existing row (or a key-only
/// document for upserts) and return the post-update image.
fn updated_image(existing: Option<&Item>, key: &Key, actions: &[UpdateAction]) -> Item {
    let mut image = existing.cloned().unwrap_or_else(|| key.to_item());
    apply_update(&mut image, actions);
    image
}

/// A validated transact entry, ready to apply.
enum Planned {
    Put { key: RowKey, item: Item },
    Update { key: RowKey, image: Item },
    Delete { key: RowKey },
    Check,
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, req: PutRequest) -> Result<(), StoreError> {
        let key = row_key_of_item(&req.item)?;
        let mut state = self.state.lock();
        let table = state.tables.entry(req.table).or_default();
        check_condition(req.condition.as_ref(), table.get(&key))?;
        table.insert(key, req.item);
        Ok(())
    }

    async fn get(&self, req: GetRequest) -> Result<Option<Item>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .tables
            .get(&req.table)
            .and_then(|t| t.get(&row_key(&req.key)))
            .cloned())
    }

    async fn delete(&self, req: DeleteRequest) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(table) = state.tables.get_mut(&req.table) {
            table.remove(&row_key(&req.key));
        }
        Ok(())
    }

    async fn update(&self, req: UpdateRequest) -> Result<Item, StoreError> {
        let actions = parse_update(&req.update.expression, &req.update.names, &req.update.values)
            .map_err(|e| invalid(e.to_string()))?;
        let key = row_key(&req.key);
        let mut state = self.state.lock();
        let table = state.tables.entry(req.table).or_default();
        let existing = table.get(&key);
        check_condition(req.condition.as_ref(), existing)?;
        let image = updated_image(existing, &req.key, &actions);
        table.insert(key, image.clone());
        Ok(image)
    }

    async fn batch_get(&self, req: BatchGetRequest) -> Result<BatchGetResponse, StoreError> {
        let mut state = self.state.lock();
        state.batch_get_calls += 1;
        let served = state.batch_get_limit.unwrap_or(usize::MAX);

        let mut response = BatchGetResponse::default();
        let table = state.tables.get(&req.table);
        for key in &req.keys {
            match table.and_then(|t| t.get(&row_key(key))) {
                Some(item) if response.items.len() < served => {
                    response.items.push(item.clone());
                }
                // Found but over this call's cap: report unprocessed.
                Some(_) => response.unprocessed.push(key.clone()),
                // Missing keys are processed, just absent.
                None => {}
            }
        }
        debug!(
            served = response.items.len(),
            unprocessed = response.unprocessed.len(),
            "sandbox batch_get"
        );
        Ok(response)
    }

    async fn batch_write(&self, req: BatchWriteRequest) -> Result<BatchWriteResponse, StoreError> {
        let mut state = self.state.lock();
        let table = state.tables.entry(req.table).or_default();
        for item in req.puts {
            let key = row_key_of_item(&item)?;
            table.insert(key, item);
        }
        Ok(BatchWriteResponse::default())
    }

    async fn query(&self, req: QueryRequest) -> Result<QueryResponse, StoreError> {
        let key_condition = parse(
            &req.key_condition.expression,
            &req.key_condition.names,
            &req.key_condition.values,
        )
        .map_err(|e| invalid(e.to_string()))?;
        let filter = req
            .filter
            .as_ref()
            .map(|f| parse(&f.expression, &f.names, &f.values))
            .transpose()
            .map_err(|e| invalid(e.to_string()))?;

        let part_attr = req.index.map(IndexName::partition_attr);
        let sort_attr = req.index.map_or(ATTR_SK, IndexName::sort_attr);

        let mut state = self.state.lock();
        state.query_calls += 1;

        let mut rows: Vec<Item> = state
            .tables
            .get(&req.table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default();

        // Sparse index semantics: a row appears in an index only when it
        // carries both index key attributes.
        if let Some(part_attr) = part_attr {
            rows.retain(|r| r.contains_key(part_attr) && r.contains_key(sort_attr));
        }
        rows.retain(|r| key_condition.eval(r));

        rows.sort_by(|a, b| {
            let by_sort = match (a.get(sort_attr), b.get(sort_attr)) {
                (Some(x), Some(y)) => {
                    compare_values(x, y).unwrap_or(std::cmp::Ordering::Equal)
                }
                _ => std::cmp::Ordering::Equal,
            };
            by_sort.then_with(|| {
                let ka = key_of_item(a).map(|k| (k.pk, k.sk));
                let kb = key_of_item(b).map(|k| (k.pk, k.sk));
                ka.cmp(&kb)
            })
        });
        if !req.scan_forward {
            rows.reverse();
        }

        if let Some(start) = &req.exclusive_start_key {
            let start_pk = start.get(ATTR_PK).and_then(Value::as_str);
            let start_sk = start.get(ATTR_SK).and_then(Value::as_str);
            if let Some(pos) = rows.iter().position(|r| {
                r.get(ATTR_PK).and_then(Value::as_str) == start_pk
                    && r.get(ATTR_SK).and_then(Value::as_str) == start_sk
            }) {
                rows.drain(..=pos);
            }
        }

        if let Some(filter) = &filter {
            rows.retain(|r| filter.eval(r));
        }

        let limit = req.limit.unwrap_or(usize::MAX).max(1);
        let has_more = rows.len() > limit;
        rows.truncate(limit);

        let last_evaluated_key = if has_more {
            rows.last().map(|row| {
                let mut lek = Item::new();
                for attr in [ATTR_PK, ATTR_SK] {
                    if let Some(v) = row.get(attr) {
                        lek.insert(attr.to_string(), v.clone());
                    }
                }
                if let Some(index) = req.index
                    && let Some((pk_attr, sk_attr)) = index.stored_attrs()
                {
                    for attr in [pk_attr, sk_attr] {
                        if let Some(v) = row.get(attr) {
                            lek.insert(attr.to_string(), v.clone());
                        }
                    }
                }
                lek
            })
        } else {
            None
        };

        Ok(QueryResponse {
            items: rows,
            last_evaluated_key,
        })
    }

    async fn scan(&self, req: ScanRequest) -> Result<QueryResponse, StoreError> {
        let state = self.state.lock();
        let items = state
            .tables
            .get(&req.table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default();
        Ok(QueryResponse {
            items,
            last_evaluated_key: None,
        })
    }

    async fn transact_write(&self, req: TransactWriteRequest) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.transact_calls += 1;

        if let Some(fault) = state.transact_faults.pop_front() {
            debug!("sandbox transact_write injected fault");
            return Err(fault);
        }
        if req.items.len() > MAX_TRANSACT_ITEMS {
            return Err(invalid(format!(
                "transaction exceeds {MAX_TRANSACT_ITEMS} items"
            )));
        }

        let mut seen: HashSet<RowKey> = HashSet::new();
        for item in &req.items {
            let key = item
                .key()
                .map(|k| (k.pk, k.sk))
                .ok_or_else(|| invalid("transact item is missing its key attributes"))?;
            if !seen.insert(key) {
                return Err(invalid("duplicate key in transaction"));
            }
        }

        let table = state.tables.entry(req.table).or_default();

        // Validate every entry first; a transaction applies all or nothing.
        let mut planned = Vec::with_capacity(req.items.len());
        let mut reasons: Vec<Option<String>> = Vec::with_capacity(req.items.len());
        let mut canceled = false;
        for entry in &req.items {
            let outcome = plan_entry(table, entry)?;
            match outcome {
                Ok(plan) => {
                    planned.push(plan);
                    reasons.push(None);
                }
                Err(reason) => {
                    canceled = true;
                    reasons.push(Some(reason));
                }
            }
        }
        if canceled {
            return Err(StoreError::TransactionCanceled { reasons });
        }

        for plan in planned {
            match plan {
                Planned::Put { key, item } => {
                    table.insert(key, item);
                }
                Planned::Update { key, image } => {
                    table.insert(key, image);
                }
                Planned::Delete { key } => {
                    table.remove(&key);
                }
                Planned::Check => {}
            }
        }
        Ok(())
    }
}

/// Validate one transact entry. `Ok(Err(reason))` is a per-item
/// cancellation; `Err` is a request-level failure.
fn plan_entry(
    table: &Table,
    entry: &TransactWriteItem,
) -> Result<Result<Planned, String>, StoreError> {
    match entry {
        TransactWriteItem::Put { item, condition } => {
            let key = row_key_of_item(item)?;
            let existing = table.get(&key);
            if let Some(condition) = condition
                && !condition_holds(condition, existing)?
            {
                return Ok(Err("ConditionalCheckFailed".to_string()));
            }
            Ok(Ok(Planned::Put {
                key,
                item: item.clone(),
            }))
        }
        TransactWriteItem::Update {
            key,
            update,
            condition,
        } => {
            let actions = parse_update(&update.expression, &update.names, &update.values)
                .map_err(|e| invalid(e.to_string()))?;
            let row = row_key(key);
            let existing = table.get(&row);
            if let Some(condition) = condition
                && !condition_holds(condition, existing)?
            {
                return Ok(Err("ConditionalCheckFailed".to_string()));
            }
            let image = updated_image(existing, key, &actions);
            Ok(Ok(Planned::Update { key: row, image }))
        }
        TransactWriteItem::Delete { key } => Ok(Ok(Planned::Delete { key: row_key(key) })),
        TransactWriteItem::ConditionCheck { key, condition } => {
            let existing = table.get(&row_key(key));
            if !condition_holds(condition, existing)? {
                return Ok(Err("ConditionalCheckFailed".to_string()));
            }
            Ok(Ok(Planned::Check))
        }
    }
}
