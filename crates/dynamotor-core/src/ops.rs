//! Operation descriptors: tagged records describing one store action.
//!
//! Reads ([`GetOp`]) carry a [`Decoder`] so results can be turned back into
//! typed instances. Writes ([`WriteOperation`]) carry the owning model, and
//! may be paired with a compensating rollback operation for the bulk engine.

use std::collections::HashMap;

use crate::model::{Decoder, Instance, Model};
use crate::types::{Item, Key};

/// A store-native expression plus its attribute name/value substitutions.
#[derive(Debug, Clone, Default)]
pub struct Expression {
    pub expression: String,
    /// `#name` placeholder substitutions.
    pub names: HashMap<String, String>,
    /// `:value` placeholder substitutions.
    pub values: Item,
}

impl Expression {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            names: HashMap::new(),
            values: Item::new(),
        }
    }

    pub fn name(mut self, placeholder: impl Into<String>, attr: impl Into<String>) -> Self {
        self.names.insert(placeholder.into(), attr.into());
        self
    }

    pub fn value(mut self, placeholder: impl Into<String>, value: serde_json::Value) -> Self {
        self.values.insert(placeholder.into(), value);
        self
    }
}

/// A single-item read.
#[derive(Debug, Clone)]
pub struct GetOp {
    pub decoder: Decoder,
    pub key: Key,
    pub consistent_read: bool,
}

impl GetOp {
    pub fn new(decoder: impl Into<Decoder>, key: Key) -> Self {
        Self {
            decoder: decoder.into(),
            key,
            consistent_read: false,
        }
    }

    pub fn consistent(mut self) -> Self {
        self.consistent_read = true;
        self
    }
}

/// Options for a put operation.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Suppress the default `attribute_not_exists(PK)` precondition.
    pub ignore_existence: bool,
    /// Replaces the default precondition; its failure surfaces as a
    /// conditional-check failure rather than a key-exists error.
    pub condition: Option<Expression>,
    /// Write the item with soft-deletion fields applied.
    pub soft_delete: bool,
}

/// Options for a raw update.
#[derive(Debug, Clone, Default)]
pub struct UpdateRawOptions {
    /// Replaces the generated update expression; names and values are merged
    /// with the generated ones.
    pub update: Option<Expression>,
    /// Replaces the default `attribute_exists(PK)` precondition.
    pub condition: Option<Expression>,
}

/// Options for a coalesced load.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Resolve to `None` when the item is missing instead of failing.
    pub null: bool,
}

/// A single write action against the store.
#[derive(Debug, Clone)]
pub enum WriteOperation {
    Put {
        item: Instance,
        options: PutOptions,
    },
    UpdateRaw {
        model: Model,
        key: Key,
        attributes: Item,
        options: UpdateRawOptions,
    },
    Delete {
        model: Model,
        key: Key,
    },
    ConditionCheck {
        key: Key,
        condition: Expression,
    },
}

impl WriteOperation {
    pub fn put(item: Instance) -> Self {
        WriteOperation::Put {
            item,
            options: PutOptions::default(),
        }
    }

    pub fn put_with(item: Instance, options: PutOptions) -> Self {
        WriteOperation::Put { item, options }
    }

    pub fn update_raw(model: Model, key: Key, attributes: Item) -> Self {
        WriteOperation::UpdateRaw {
            model,
            key,
            attributes,
            options: UpdateRawOptions::default(),
        }
    }

    pub fn update_raw_with(
        model: Model,
        key: Key,
        attributes: Item,
        options: UpdateRawOptions,
    ) -> Self {
        WriteOperation::UpdateRaw {
            model,
            key,
            attributes,
            options,
        }
    }

    pub fn delete(model: Model, key: Key) -> Self {
        WriteOperation::Delete { model, key }
    }

    pub fn condition(key: Key, condition: Expression) -> Self {
        WriteOperation::ConditionCheck { key, condition }
    }

    /// The primary key this operation targets.
    pub fn key(&self) -> Key {
        match self {
            WriteOperation::Put { item, .. } => item.key(),
            WriteOperation::UpdateRaw { key, .. }
            | WriteOperation::Delete { key, .. }
            | WriteOperation::ConditionCheck { key, .. } => key.clone(),
        }
    }

    /// Short operation name, for logs and error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            WriteOperation::Put { .. } => "put",
            WriteOperation::UpdateRaw { .. } => "updateRaw",
            WriteOperation::Delete { .. } => "delete",
            WriteOperation::ConditionCheck { .. } => "condition",
        }
    }
}

/// A write action paired with an optional compensating rollback, used during
/// bulk compensation. Plain operations convert into pairs without rollback.
#[derive(Debug, Clone)]
pub struct TransactionOperation {
    pub action: WriteOperation,
    pub rollback: Option<WriteOperation>,
}

impl TransactionOperation {
    pub fn new(action: WriteOperation) -> Self {
        Self {
            action,
            rollback: None,
        }
    }

    pub fn with_rollback(action: WriteOperation, rollback: WriteOperation) -> Self {
        Self {
            action,
            rollback: Some(rollback),
        }
    }
}

impl From<WriteOperation> for TransactionOperation {
    fn from(action: WriteOperation) -> Self {
        TransactionOperation::new(action)
    }
}
