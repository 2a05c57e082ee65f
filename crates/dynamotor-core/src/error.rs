//! Error types surfaced across the access layer.

use thiserror::Error;

use crate::ops::TransactionOperation;
use crate::store::StoreError;
use crate::types::Key;

/// A single validation failure at a path within a decoded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Dot-separated path of the offending property (empty for the root).
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// The accumulated validation failures of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Issues(pub Vec<Issue>);

impl Issues {
    pub fn one(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self(vec![Issue {
            path: path.into(),
            message: message.into(),
        }])
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(Issue {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: Issues) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Issues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no issues");
        }
        for (i, issue) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

/// Top-level error type for all access-layer operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The codec rejected the input during `decode`/`from`.
    #[error("validation failed: {0}")]
    Validation(Issues),

    /// The default `put` precondition failed: a row with this key exists.
    #[error("item already exists: {key}")]
    KeyExists { key: Key },

    /// A single get found no row, or a raw update targeted an absent row.
    #[error("item not found: {key}")]
    ItemNotFound { key: Key },

    /// A caller-supplied condition expression failed.
    #[error("the conditional request failed: {key}")]
    ConditionalCheckFailed { key: Key },

    /// An in-place update saw a different `_docVersion` than expected.
    #[error("document version conflict on {key}: expected {expected}")]
    RaceCondition { key: Key, expected: u64 },

    /// Invalid pagination arguments or an undecodable cursor.
    #[error("{0}")]
    Pagination(String),

    /// A bulk write was canceled by the store; any completed chunks were
    /// rolled back successfully before this surfaced.
    #[error("bulk write transaction canceled: {}", format_reasons(.reasons))]
    BulkWriteTransaction { reasons: Vec<Option<String>> },

    /// Rolling back a partially applied bulk write failed; `remaining` lists
    /// the operations still requiring compensation.
    #[error("bulk write rollback failed; {} operation(s) still require compensation", .remaining.len())]
    BulkWriteRollback { remaining: Vec<TransactionOperation> },

    /// The store kept returning only unprocessed keys for a batch get.
    #[error("batch get made no progress: {unprocessed} key(s) still unprocessed")]
    BatchGetExhausted { unprocessed: usize },

    /// A storage operation was invoked on a model or union constructed
    /// without a provider.
    #[error("no storage provider bound to this model")]
    MissingProvider,

    /// A transport-level failure after retry exhaustion.
    #[error(transparent)]
    Transport(#[from] StoreError),
}

fn format_reasons(reasons: &[Option<String>]) -> String {
    let parts: Vec<&str> = reasons
        .iter()
        .filter_map(|r| r.as_deref())
        .collect();
    if parts.is_empty() {
        "no reasons reported".to_string()
    } else {
        parts.join("; ")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
