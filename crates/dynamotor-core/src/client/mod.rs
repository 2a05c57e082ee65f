//! The storage client: translates typed operations into store requests,
//! encodes and decodes items, and enforces optimistic concurrency.

mod batch;
mod bulk;
mod cursor;
mod expression;
mod paginate;
mod query;

pub use bulk::BulkState;
pub use paginate::{Edge, Page, PageInfo, PaginateArgs, PaginateInput};
pub use query::{QueryInput, QueryOutput};

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Instance, Model};
use crate::ops::{Expression, GetOp, PutOptions, UpdateRawOptions};
use crate::store::{DeleteRequest, GetRequest, PutRequest, Store, StoreError, UpdateRequest};
use crate::types::{
    ATTR_DELETED_AT, ATTR_DOC_VERSION, ATTR_PK, DELETED_PREFIX, Item, KEY_ATTRIBUTES, Key,
};

use batch::Coalescer;

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    pub table_name: String,
    /// 32-byte AES-256 key; when set, cursors are encrypted.
    pub cursor_encryption_key: Option<[u8; 32]>,
}

impl ClientConfig {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            cursor_encryption_key: None,
        }
    }

    pub fn with_cursor_encryption_key(mut self, key: [u8; 32]) -> Self {
        self.cursor_encryption_key = Some(key);
        self
    }
}

/// A storage client bound to one table. One client owns one transport handle
/// and one request coalescer; multiple models and unions may share a client.
pub struct Client {
    table: String,
    store: Arc<dyn Store>,
    cursor_key: Option<[u8; 32]>,
    coalescer: Arc<Coalescer>,
}

impl Client {
    pub fn new(store: Arc<dyn Store>, config: ClientConfig) -> Self {
        Self {
            table: config.table_name,
            store,
            cursor_key: config.cursor_encryption_key,
            coalescer: Arc::new(Coalescer::new()),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn cursor_key(&self) -> Option<&[u8; 32]> {
        self.cursor_key.as_ref()
    }

    pub(crate) fn coalescer(&self) -> &Arc<Coalescer> {
        &self.coalescer
    }

    /// The stored row image of an instance at the given document version:
    /// encoded attributes, derived key attributes, and `_docVersion`.
    pub(crate) fn storage_image(instance: &Instance, doc_version: u64) -> Item {
        let mut row = instance.encode();
        row.extend(instance.key_attributes());
        row.insert(ATTR_DOC_VERSION.to_string(), Value::from(doc_version));
        row
    }

    /// Resolve a put's condition and the error its failure maps onto.
    fn put_condition(key: &Key, options: &PutOptions) -> (Option<Expression>, Error) {
        match &options.condition {
            Some(custom) => (
                Some(custom.clone()),
                Error::ConditionalCheckFailed { key: key.clone() },
            ),
            None if options.ignore_existence => (
                None,
                // Unreachable without a condition; keep the closest mapping.
                Error::KeyExists { key: key.clone() },
            ),
            None => (
                Some(Expression::new(format!("attribute_not_exists({ATTR_PK})"))),
                Error::KeyExists { key: key.clone() },
            ),
        }
    }

    /// Write an instance. On success, returns the instance with its
    /// `_docVersion` set to the stored value.
    pub async fn put(&self, instance: &Instance, options: PutOptions) -> Result<Instance> {
        let doc_version = instance.doc_version().unwrap_or(0);
        let mut item = Self::storage_image(instance, doc_version);
        if options.soft_delete {
            item = apply_soft_deletion_fields(&item);
        }
        let key = instance.key();
        debug!(tag = instance.tag(), %key, doc_version, "put");

        let (condition, condition_error) = Self::put_condition(&key, &options);
        let result = self
            .store
            .put(PutRequest {
                table: self.table.clone(),
                item,
                condition,
            })
            .await;
        match result {
            Ok(()) => Ok(instance.with_doc_version(doc_version)),
            Err(StoreError::ConditionFailed) => Err(condition_error),
            Err(other) => Err(other.into()),
        }
    }

    /// Read a single item; fails with `ItemNotFound` when the row is absent.
    pub async fn get(&self, op: &GetOp) -> Result<Instance> {
        let raw = self
            .store
            .get(GetRequest {
                table: self.table.clone(),
                key: op.key.clone(),
                consistent_read: op.consistent_read,
            })
            .await?;
        match raw {
            Some(item) => op.decoder.decode_value(&Value::Object(item)),
            None => Err(Error::ItemNotFound {
                key: op.key.clone(),
            }),
        }
    }

    /// Raw store-level update with caller-provided expression attributes.
    ///
    /// Derived key attributes are NOT recomputed: when updated schema fields
    /// feed a key derivation, the stored key attributes go stale even though
    /// the returned instance's computed keys look correct. Callers that
    /// change key-bearing fields should use an in-place update instead.
    pub async fn update_raw(
        &self,
        model: &Model,
        key: &Key,
        attributes: &Item,
        options: &UpdateRawOptions,
    ) -> Result<Instance> {
        let update = Self::resolve_update_expression(model, attributes, options);
        let condition = options
            .condition
            .clone()
            .unwrap_or_else(|| Expression::new(format!("attribute_exists({ATTR_PK})")));
        debug!(tag = model.tag(), %key, expression = %update.expression, "update_raw");

        let result = self
            .store
            .update(UpdateRequest {
                table: self.table.clone(),
                key: key.clone(),
                update,
                condition: Some(condition),
            })
            .await;
        match result {
            Ok(image) => model.from_value(&Value::Object(image)),
            Err(StoreError::ConditionFailed) => {
                if options.condition.is_some() {
                    Err(Error::ConditionalCheckFailed { key: key.clone() })
                } else {
                    Err(Error::ItemNotFound { key: key.clone() })
                }
            }
            Err(other) => Err(other.into()),
        }
    }

    pub(crate) fn resolve_update_expression(
        model: &Model,
        attributes: &Item,
        options: &UpdateRawOptions,
    ) -> Expression {
        let mut update = expression::build_update_expression(model, attributes);
        if let Some(custom) = &options.update {
            update.expression = custom.expression.clone();
            update.names.extend(custom.names.clone());
            update.values.extend(custom.values.clone());
        }
        update
    }

    /// In-place update: construct the replacement instance and write it with
    /// an optimistic version check. When the update changes the primary key,
    /// the replacement is written and the original deleted as one logical
    /// transaction with compensation.
    pub async fn update(&self, instance: &Instance, attributes: &Item) -> Result<Instance> {
        let previous_version = instance.doc_version().unwrap_or(0);
        let mut values = instance.values();
        for (attr, value) in attributes {
            if value.is_null() {
                continue;
            }
            values.insert(attr.clone(), value.clone());
        }
        let updated = instance
            .model()
            .new_instance(values)
            .with_doc_version(previous_version + 1);

        let old_key = instance.key();
        let new_key = updated.key();
        if new_key == old_key {
            return self.update_in_place(&updated, old_key, previous_version).await;
        }

        debug!(tag = instance.tag(), %old_key, %new_key, "update moves primary key");
        let replacement = crate::ops::TransactionOperation::with_rollback(
            crate::ops::WriteOperation::put(updated.clone()),
            crate::ops::WriteOperation::delete(updated.model().clone(), new_key),
        );
        let removal = crate::ops::TransactionOperation::with_rollback(
            crate::ops::WriteOperation::delete(instance.model().clone(), old_key),
            crate::ops::WriteOperation::put_with(
                instance.clone(),
                PutOptions {
                    ignore_existence: true,
                    ..PutOptions::default()
                },
            ),
        );
        self.bulk(vec![replacement, removal]).await?;
        Ok(updated)
    }

    async fn update_in_place(
        &self,
        updated: &Instance,
        key: Key,
        previous_version: u64,
    ) -> Result<Instance> {
        let item = Self::storage_image(updated, updated.doc_version().unwrap_or(0));
        let condition = Expression::new("attribute_not_exists(#dv) OR #dv = :dv")
            .name("#dv", ATTR_DOC_VERSION)
            .value(":dv", Value::from(previous_version));

        let result = self
            .store
            .put(PutRequest {
                table: self.table.clone(),
                item,
                condition: Some(condition),
            })
            .await;
        match result {
            Ok(()) => Ok(updated.clone()),
            Err(StoreError::ConditionFailed) => Err(Error::RaceCondition {
                key,
                expected: previous_version,
            }),
            Err(other) => Err(other.into()),
        }
    }

    /// Unconditionally remove a row.
    pub async fn delete(&self, key: &Key) -> Result<()> {
        debug!(%key, "delete");
        self.store
            .delete(DeleteRequest {
                table: self.table.clone(),
                key: key.clone(),
            })
            .await?;
        Ok(())
    }

    /// Soft-delete: remove the original row and rewrite it with every key
    /// attribute prefixed and a `_deletedAt` timestamp, as one logical
    /// transaction. Returns the original instance.
    ///
    /// The rewritten row keeps the default put precondition, so a second
    /// soft delete of the same item fails the transaction.
    pub async fn soft_delete(&self, instance: &Instance) -> Result<Instance> {
        let key = instance.key();
        let deleted_key = Key::new(
            format!("{DELETED_PREFIX}{}", key.pk),
            format!("{DELETED_PREFIX}{}", key.sk),
        );
        debug!(tag = instance.tag(), %key, "soft delete");

        let removal = crate::ops::TransactionOperation::with_rollback(
            crate::ops::WriteOperation::delete(instance.model().clone(), key),
            crate::ops::WriteOperation::put_with(
                instance.clone(),
                PutOptions {
                    ignore_existence: true,
                    ..PutOptions::default()
                },
            ),
        );
        let tombstone = crate::ops::TransactionOperation::with_rollback(
            crate::ops::WriteOperation::put_with(
                instance.clone(),
                PutOptions {
                    soft_delete: true,
                    ..PutOptions::default()
                },
            ),
            crate::ops::WriteOperation::delete(instance.model().clone(), deleted_key),
        );
        self.bulk(vec![removal, tombstone]).await?;
        Ok(instance.clone())
    }
}

/// Return a shallow clone of an encoded row with every present key attribute
/// prefixed by `$$DELETED$$` and `_deletedAt` set to now (ISO-8601 UTC).
/// Absent GSI attributes remain absent.
pub fn apply_soft_deletion_fields(encoded: &Item) -> Item {
    let mut out = encoded.clone();
    for attr in KEY_ATTRIBUTES {
        if let Some(Value::String(original)) = out.get(attr) {
            let prefixed = format!("{DELETED_PREFIX}{original}");
            out.insert(attr.to_string(), Value::String(prefixed));
        }
    }
    out.insert(
        ATTR_DELETED_AT.to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    out
}
