//! Coalesced reads: the one-tick request batcher behind `load`, and the
//! explicit `batch_get` API with unprocessed-keys recursion.
//!
//! Loads enqueued within one scheduler tick collapse into a single
//! batch-get. Each caller holds its own result channel, so dropping one
//! waiter discards only that caller's result, never the batch. Nothing is
//! cached across ticks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::Instance;
use crate::ops::{GetOp, LoadOptions};
use crate::store::{BatchGetRequest, Store};
use crate::types::{Item, Key, MAX_BATCH_GET_KEYS, key_of_item};

use super::Client;

/// Internal failure of a batched read; cloneable so every waiter on the
/// batch receives it.
#[derive(Debug, Clone)]
pub(crate) enum BatchError {
    Store(crate::store::StoreError),
    /// The store returned nothing but still reported unprocessed keys.
    Exhausted { unprocessed: usize },
}

impl From<BatchError> for Error {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::Store(e) => Error::Transport(e),
            BatchError::Exhausted { unprocessed } => Error::BatchGetExhausted { unprocessed },
        }
    }
}

type LoadResult = std::result::Result<Option<Item>, BatchError>;

struct PendingGet {
    key: Key,
    consistent_read: bool,
    tx: oneshot::Sender<LoadResult>,
}

#[derive(Default)]
struct CoalescerState {
    pending: Vec<PendingGet>,
    scheduled: bool,
}

/// Accumulates gets enqueued within one tick and dispatches them as one
/// batch on the next scheduler yield.
pub(crate) struct Coalescer {
    state: Mutex<CoalescerState>,
}

impl Coalescer {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CoalescerState::default()),
        }
    }

    /// Enqueue a get; the returned channel resolves when the batch lands.
    fn enqueue(
        this: &Arc<Self>,
        store: Arc<dyn Store>,
        table: String,
        key: Key,
        consistent_read: bool,
    ) -> oneshot::Receiver<LoadResult> {
        let (tx, rx) = oneshot::channel();
        let mut state = this.state.lock();
        state.pending.push(PendingGet {
            key,
            consistent_read,
            tx,
        });
        if !state.scheduled {
            state.scheduled = true;
            let coalescer = Arc::clone(this);
            tokio::spawn(async move {
                // Let the current tick finish so sibling loads can join.
                tokio::task::yield_now().await;
                coalescer.drain(store, table).await;
            });
        }
        rx
    }

    async fn drain(&self, store: Arc<dyn Store>, table: String) {
        let pending = {
            let mut state = self.state.lock();
            state.scheduled = false;
            std::mem::take(&mut state.pending)
        };
        if pending.is_empty() {
            return;
        }

        let mut keys: Vec<Key> = Vec::new();
        let mut consistent_read = false;
        for get in &pending {
            consistent_read |= get.consistent_read;
            if !keys.contains(&get.key) {
                keys.push(get.key.clone());
            }
        }
        debug!(
            requested = pending.len(),
            distinct = keys.len(),
            "coalescer drain"
        );

        let outcome = batch_get_all(store.as_ref(), &table, keys, consistent_read).await;
        for get in pending {
            let result = match &outcome {
                Ok(found) => Ok(found.get(&get.key.cache_key()).cloned()),
                Err(err) => Err(err.clone()),
            };
            // A dropped waiter discards its own result only.
            let _ = get.tx.send(result);
        }
    }
}

/// Fetch every key, grouping into requests of at most 100 and re-requesting
/// unprocessed keys until none remain.
pub(crate) async fn batch_get_all(
    store: &dyn Store,
    table: &str,
    keys: Vec<Key>,
    consistent_read: bool,
) -> std::result::Result<HashMap<String, Item>, BatchError> {
    let mut found = HashMap::new();
    for group in keys.chunks(MAX_BATCH_GET_KEYS) {
        let mut remaining = group.to_vec();
        while !remaining.is_empty() {
            let response = store
                .batch_get(BatchGetRequest {
                    table: table.to_string(),
                    keys: remaining.clone(),
                    consistent_read,
                })
                .await
                .map_err(BatchError::Store)?;

            if response.items.is_empty() && !response.unprocessed.is_empty() {
                return Err(BatchError::Exhausted {
                    unprocessed: response.unprocessed.len(),
                });
            }
            for item in response.items {
                if let Some(key) = key_of_item(&item) {
                    found.insert(key.cache_key(), item);
                }
            }
            remaining = response.unprocessed;
        }
    }
    Ok(found)
}

impl Client {
    /// Read through the request coalescer; fails with `ItemNotFound` when
    /// the row is absent unless `options.null` is set.
    pub async fn load(&self, op: &GetOp, options: LoadOptions) -> Result<Option<Instance>> {
        let rx = Coalescer::enqueue(
            self.coalescer(),
            Arc::clone(self.store()),
            self.table_name().to_string(),
            op.key.clone(),
            op.consistent_read,
        );
        let outcome = rx
            .await
            .map_err(|_| Error::Transport(crate::store::StoreError::Transport(
                "batch loader dropped the request".to_string(),
            )))?;
        match outcome {
            Ok(Some(item)) => Ok(Some(op.decoder.decode_value(&Value::Object(item))?)),
            Ok(None) if options.null => Ok(None),
            Ok(None) => Err(Error::ItemNotFound {
                key: op.key.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Load several operations concurrently through the coalescer. Entries
    /// resolve individually: a missing or undecodable item fails its own
    /// slot only.
    pub async fn load_many(&self, ops: &[GetOp]) -> Vec<Result<Instance>> {
        let loads = ops.iter().map(|op| async move {
            match self.load(op, LoadOptions::default()).await? {
                Some(instance) => Ok(instance),
                None => Err(Error::ItemNotFound {
                    key: op.key.clone(),
                }),
            }
        });
        futures_util::future::join_all(loads).await
    }

    /// Resolve a named map of gets through one batched read. Any missing
    /// item fails the whole call with `ItemNotFound`.
    pub async fn batch_get(&self, ops: Vec<(String, GetOp)>) -> Result<HashMap<String, Instance>> {
        let found = self.batch_get_raw(&ops).await?;
        let mut out = HashMap::with_capacity(ops.len());
        for (name, op) in ops {
            match found.get(&op.key.cache_key()) {
                Some(item) => {
                    out.insert(name, op.decoder.decode_value(&Value::Object(item.clone()))?);
                }
                None => return Err(Error::ItemNotFound { key: op.key }),
            }
        }
        Ok(out)
    }

    /// Like [`Client::batch_get`], but each entry resolves to its own
    /// result; missing items yield an error value in place of the entry.
    pub async fn batch_get_individual(
        &self,
        ops: Vec<(String, GetOp)>,
    ) -> Result<HashMap<String, Result<Instance>>> {
        let found = self.batch_get_raw(&ops).await?;
        let mut out = HashMap::with_capacity(ops.len());
        for (name, op) in ops {
            let entry = match found.get(&op.key.cache_key()) {
                Some(item) => op.decoder.decode_value(&Value::Object(item.clone())),
                None => Err(Error::ItemNotFound { key: op.key }),
            };
            out.insert(name, entry);
        }
        Ok(out)
    }

    async fn batch_get_raw(&self, ops: &[(String, GetOp)]) -> Result<HashMap<String, Item>> {
        let mut keys: Vec<Key> = Vec::new();
        let mut consistent_read = false;
        for (_, op) in ops {
            consistent_read |= op.consistent_read;
            if !keys.contains(&op.key) {
                keys.push(op.key.clone());
            }
        }
        batch_get_all(self.store().as_ref(), self.table_name(), keys, consistent_read)
            .await
            .map_err(Error::from)
    }
}
