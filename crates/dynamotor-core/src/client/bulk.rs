//! The bulk transaction engine: groups arbitrary write operations into
//! atomic store transactions of up to 25 items, chains the chunks, and
//! performs compensating rollback when a later chunk fails.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::ops::{Expression, TransactionOperation, WriteOperation};
use crate::store::{StoreError, TransactWriteItem, TransactWriteRequest};
use crate::types::{ATTR_PK, MAX_TRANSACT_ITEMS};

use super::Client;

/// Fixed delay between transact-write retries.
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Total transact-write attempts for retryable transport errors.
const RETRY_ATTEMPTS: u32 = 3;

/// Progress of one bulk call. Terminal states are `Done`, `RollbackDone`,
/// and `RollbackFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkState {
    Initial,
    Writing,
    Done,
    Rollback,
    RollbackDone,
    RollbackFailed,
}

fn transition(state: &mut BulkState, next: BulkState) {
    debug!(from = ?state, to = ?next, "bulk state");
    *state = next;
}

impl Client {
    /// Execute a flat sequence of write operations as one logical
    /// transaction.
    ///
    /// Operations are split into chunks of at most 25 and committed
    /// chunk-by-chunk; the store guarantees intra-chunk atomicity, chunk
    /// order follows caller order. When a later chunk is canceled, the
    /// rollbacks of previously committed transaction pairs are executed
    /// (plain operations carry no rollback and are skipped) and the original
    /// cancellation surfaces as `BulkWriteTransaction`. A failed rollback
    /// surfaces as `BulkWriteRollback` carrying the operations still
    /// requiring compensation.
    pub async fn bulk(&self, ops: Vec<TransactionOperation>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut state = BulkState::Initial;
        transition(&mut state, BulkState::Writing);

        let chunk_count = ops.len().div_ceil(MAX_TRANSACT_ITEMS);
        for (index, chunk) in ops.chunks(MAX_TRANSACT_ITEMS).enumerate() {
            let items: Vec<TransactWriteItem> = chunk
                .iter()
                .map(|pair| self.to_transact_item(&pair.action))
                .collect();
            debug!(chunk = index + 1, of = chunk_count, size = items.len(), "bulk chunk");

            match self.transact_with_retry(items).await {
                Ok(()) => {}
                Err(StoreError::TransactionCanceled { reasons }) => {
                    if index == 0 {
                        // Nothing committed yet; no compensation needed.
                        return Err(Error::BulkWriteTransaction { reasons });
                    }
                    transition(&mut state, BulkState::Rollback);
                    let applied = &ops[..index * MAX_TRANSACT_ITEMS];
                    return self.rollback(&mut state, applied, reasons).await;
                }
                Err(other) => return Err(other.into()),
            }
        }

        transition(&mut state, BulkState::Done);
        Ok(())
    }

    /// Compensate the already-committed prefix of a failed bulk call.
    async fn rollback(
        &self,
        state: &mut BulkState,
        applied: &[TransactionOperation],
        reasons: Vec<Option<String>>,
    ) -> Result<()> {
        let pending: Vec<(&WriteOperation, &TransactionOperation)> = applied
            .iter()
            .filter_map(|pair| pair.rollback.as_ref().map(|rollback| (rollback, pair)))
            .collect();
        warn!(
            committed = applied.len(),
            compensating = pending.len(),
            "bulk write canceled, rolling back"
        );

        let mut done = 0usize;
        for chunk in pending.chunks(MAX_TRANSACT_ITEMS) {
            let items: Vec<TransactWriteItem> = chunk
                .iter()
                .map(|(rollback, _)| self.to_transact_item(rollback))
                .collect();
            if let Err(err) = self.transact_with_retry(items).await {
                transition(state, BulkState::RollbackFailed);
                warn!(error = %err, "rollback failed");
                let remaining = pending[done..]
                    .iter()
                    .map(|(_, pair)| (*pair).clone())
                    .collect();
                return Err(Error::BulkWriteRollback { remaining });
            }
            done += chunk.len();
        }

        transition(state, BulkState::RollbackDone);
        Err(Error::BulkWriteTransaction { reasons })
    }

    /// Issue a transact-write, retrying transport errors with a fixed delay.
    /// Deterministic cancellations are never retried.
    async fn transact_with_retry(
        &self,
        items: Vec<TransactWriteItem>,
    ) -> std::result::Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            let result = self
                .store()
                .transact_write(TransactWriteRequest {
                    table: self.table_name().to_string(),
                    items: items.clone(),
                })
                .await;
            match result {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < RETRY_ATTEMPTS => {
                    warn!(attempt, error = %err, "transact write failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Map an operation to its native transact item.
    fn to_transact_item(&self, op: &WriteOperation) -> TransactWriteItem {
        match op {
            WriteOperation::Put { item, options } => {
                let doc_version = item.doc_version().unwrap_or(0);
                let mut image = Self::storage_image(item, doc_version);
                if options.soft_delete {
                    image = super::apply_soft_deletion_fields(&image);
                }
                let condition = match &options.condition {
                    Some(custom) => Some(custom.clone()),
                    None if options.ignore_existence => None,
                    None => Some(Expression::new(format!("attribute_not_exists({ATTR_PK})"))),
                };
                TransactWriteItem::Put {
                    item: image,
                    condition,
                }
            }
            WriteOperation::UpdateRaw {
                model,
                key,
                attributes,
                options,
            } => {
                let update = Self::resolve_update_expression(model, attributes, options);
                let condition = options
                    .condition
                    .clone()
                    .unwrap_or_else(|| Expression::new(format!("attribute_exists({ATTR_PK})")));
                TransactWriteItem::Update {
                    key: key.clone(),
                    update,
                    condition: Some(condition),
                }
            }
            WriteOperation::Delete { key, .. } => TransactWriteItem::Delete { key: key.clone() },
            WriteOperation::ConditionCheck { key, condition } => TransactWriteItem::ConditionCheck {
                key: key.clone(),
                condition: condition.clone(),
            },
        }
    }
}
