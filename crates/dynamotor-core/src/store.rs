//! The store protocol: primitives the engine requires from any wide-column
//! key/value store with a `(PK, SK)` primary key and up to five secondary
//! indexes.
//!
//! Condition, filter, key-condition, and update expressions are store-native
//! strings passed through untouched, together with their `#name`/`:value`
//! substitution maps.

use async_trait::async_trait;
use thiserror::Error;

use crate::ops::Expression;
use crate::types::{IndexName, Item, Key};

/// A transport- or store-level failure of a single protocol call.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The request's condition expression evaluated false.
    #[error("the conditional request failed")]
    ConditionFailed,

    /// A transaction was canceled deterministically; one reason slot per
    /// transact item, in request order.
    #[error("transaction canceled")]
    TransactionCanceled { reasons: Vec<Option<String>> },

    /// A non-deterministic transport failure; eligible for retry.
    #[error("transport error: {0}")]
    Transport(String),
}

impl StoreError {
    /// Whether the bulk engine may retry the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transport(_))
    }
}

#[derive(Debug, Clone)]
pub struct PutRequest {
    pub table: String,
    pub item: Item,
    pub condition: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct GetRequest {
    pub table: String,
    pub key: Key,
    pub consistent_read: bool,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub table: String,
    pub key: Key,
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub table: String,
    pub key: Key,
    /// The update expression (`SET`/`REMOVE` clauses) with substitutions.
    pub update: Expression,
    pub condition: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct BatchGetRequest {
    pub table: String,
    pub keys: Vec<Key>,
    pub consistent_read: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BatchGetResponse {
    pub items: Vec<Item>,
    /// Keys the store declined to serve in this call; the caller re-requests
    /// them until none remain.
    pub unprocessed: Vec<Key>,
}

#[derive(Debug, Clone)]
pub struct BatchWriteRequest {
    pub table: String,
    pub puts: Vec<Item>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchWriteResponse {
    pub unprocessed: Vec<Item>,
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub table: String,
    pub index: Option<IndexName>,
    pub key_condition: Expression,
    pub filter: Option<Expression>,
    pub exclusive_start_key: Option<Item>,
    pub limit: Option<usize>,
    pub scan_forward: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<Item>,
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub table: String,
    pub exclusive_start_key: Option<Item>,
}

/// One entry of a native store transaction.
#[derive(Debug, Clone)]
pub enum TransactWriteItem {
    Put {
        item: Item,
        condition: Option<Expression>,
    },
    Update {
        key: Key,
        update: Expression,
        condition: Option<Expression>,
    },
    Delete {
        key: Key,
    },
    ConditionCheck {
        key: Key,
        condition: Expression,
    },
}

impl TransactWriteItem {
    /// The primary key this entry targets, if it is well-formed.
    pub fn key(&self) -> Option<Key> {
        match self {
            TransactWriteItem::Put { item, .. } => crate::types::key_of_item(item),
            TransactWriteItem::Update { key, .. }
            | TransactWriteItem::Delete { key }
            | TransactWriteItem::ConditionCheck { key, .. } => Some(key.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactWriteRequest {
    pub table: String,
    pub items: Vec<TransactWriteItem>,
}

/// The primitives the engine requires from a store. One implementation per
/// backend; the engine is generic over this trait and owns no transport.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put(&self, req: PutRequest) -> Result<(), StoreError>;

    async fn get(&self, req: GetRequest) -> Result<Option<Item>, StoreError>;

    async fn delete(&self, req: DeleteRequest) -> Result<(), StoreError>;

    /// Apply an update expression and return the post-update item image.
    async fn update(&self, req: UpdateRequest) -> Result<Item, StoreError>;

    async fn batch_get(&self, req: BatchGetRequest) -> Result<BatchGetResponse, StoreError>;

    /// Unconditional multi-put; used only by sandbox/seeding tooling.
    async fn batch_write(&self, req: BatchWriteRequest) -> Result<BatchWriteResponse, StoreError>;

    async fn query(&self, req: QueryRequest) -> Result<QueryResponse, StoreError>;

    /// Full-table walk; used only by sandbox/snapshot tooling.
    async fn scan(&self, req: ScanRequest) -> Result<QueryResponse, StoreError>;

    /// Execute up to 25 write items atomically.
    async fn transact_write(&self, req: TransactWriteRequest) -> Result<(), StoreError>;
}
