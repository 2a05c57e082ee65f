//! Core types: item documents, primary keys, index names, table limits.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A raw item document as stored on the wire: the codec-encoded attributes
/// plus the engine-managed attributes (`_tag`, `_docVersion`, key attributes,
/// optionally `_deletedAt`).
pub type Item = serde_json::Map<String, Value>;

/// Name of the partition key attribute.
pub const ATTR_PK: &str = "PK";

/// Name of the sort key attribute.
pub const ATTR_SK: &str = "SK";

/// Discriminator attribute identifying the model that produced a row.
pub const ATTR_TAG: &str = "_tag";

/// Monotonically increasing document version, used for optimistic
/// concurrency. Zero on first put, incremented on each in-place update.
pub const ATTR_DOC_VERSION: &str = "_docVersion";

/// ISO-8601 timestamp set on soft-deleted rows.
pub const ATTR_DELETED_AT: &str = "_deletedAt";

/// Prefix applied to every key attribute of a soft-deleted row.
pub const DELETED_PREFIX: &str = "$$DELETED$$";

/// Marker attribute on rows written by the legacy system. Every query
/// carries an implicit `attribute_not_exists(dynamotorLegacy)` filter so
/// legacy rows stay invisible to the typed layer.
pub const LEGACY_MARKER: &str = "dynamotorLegacy";

/// Maximum number of operations in a single store transaction.
pub const MAX_TRANSACT_ITEMS: usize = 25;

/// Maximum number of keys in a single batch-get request.
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// Default page size when neither `first` nor `last` is given.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Hard ceiling on the page size a caller may request.
pub const MAX_PAGE_SIZE: usize = 50;

/// Every key attribute a row may carry, in storage order. Soft deletion
/// prefixes each of these that is present.
pub const KEY_ATTRIBUTES: [&str; 10] = [
    "PK", "SK", "GSI2PK", "GSI2SK", "GSI3PK", "GSI3SK", "GSI4PK", "GSI4SK", "GSI5PK", "GSI5SK",
];

/// A fully resolved primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub pk: String,
    pub sk: String,
}

impl Key {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    /// The coalescer's map key: `${PK}::${SK}`.
    pub fn cache_key(&self) -> String {
        format!("{}::{}", self.pk, self.sk)
    }

    /// This key as a two-attribute item document.
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(ATTR_PK.to_string(), Value::String(self.pk.clone()));
        item.insert(ATTR_SK.to_string(), Value::String(self.sk.clone()));
        item
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.pk, self.sk)
    }
}

/// A secondary index on the table.
///
/// `Gsi1` is the inverse index keyed on `(SK, PK)`; it needs no extra stored
/// attributes. `Gsi2`..`Gsi5` are keyed on dedicated `GSInPK`/`GSInSK`
/// attributes derived by each model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexName {
    Gsi1,
    Gsi2,
    Gsi3,
    Gsi4,
    Gsi5,
}

impl IndexName {
    /// The attribute the index partitions on.
    pub fn partition_attr(self) -> &'static str {
        match self {
            IndexName::Gsi1 => ATTR_SK,
            IndexName::Gsi2 => "GSI2PK",
            IndexName::Gsi3 => "GSI3PK",
            IndexName::Gsi4 => "GSI4PK",
            IndexName::Gsi5 => "GSI5PK",
        }
    }

    /// The attribute the index sorts on.
    pub fn sort_attr(self) -> &'static str {
        match self {
            IndexName::Gsi1 => ATTR_PK,
            IndexName::Gsi2 => "GSI2SK",
            IndexName::Gsi3 => "GSI3SK",
            IndexName::Gsi4 => "GSI4SK",
            IndexName::Gsi5 => "GSI5SK",
        }
    }

    /// The dedicated key attribute pair stored on rows for this index, or
    /// `None` when the index reuses the primary key attributes.
    pub fn stored_attrs(self) -> Option<(&'static str, &'static str)> {
        match self {
            IndexName::Gsi1 => None,
            other => Some((other.partition_attr(), other.sort_attr())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IndexName::Gsi1 => "GSI1",
            IndexName::Gsi2 => "GSI2",
            IndexName::Gsi3 => "GSI3",
            IndexName::Gsi4 => "GSI4",
            IndexName::Gsi5 => "GSI5",
        }
    }
}

impl std::fmt::Display for IndexName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract the primary key of a stored row.
///
/// Returns `None` when either key attribute is absent or not a string.
pub fn key_of_item(item: &Item) -> Option<Key> {
    let pk = item.get(ATTR_PK)?.as_str()?;
    let sk = item.get(ATTR_SK)?.as_str()?;
    Some(Key::new(pk, sk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_format() {
        let key = Key::new("PK#hi", "SK#42");
        assert_eq!(key.cache_key(), "PK#hi::SK#42");
    }

    #[test]
    fn test_gsi1_reuses_primary_attributes() {
        assert_eq!(IndexName::Gsi1.partition_attr(), "SK");
        assert_eq!(IndexName::Gsi1.sort_attr(), "PK");
        assert!(IndexName::Gsi1.stored_attrs().is_none());
    }

    #[test]
    fn test_gsi3_stored_attributes() {
        assert_eq!(IndexName::Gsi3.stored_attrs(), Some(("GSI3PK", "GSI3SK")));
    }

    #[test]
    fn test_key_of_item() {
        let item = json!({"PK": "a", "SK": "b", "foo": 1});
        let item = item.as_object().unwrap();
        assert_eq!(key_of_item(item), Some(Key::new("a", "b")));

        let missing = json!({"PK": "a"});
        assert!(key_of_item(missing.as_object().unwrap()).is_none());
    }
}
