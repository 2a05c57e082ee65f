//! Opaque pagination cursors.
//!
//! A cursor is the JSON of the keys needed to resume a query (`PK`, `SK`,
//! plus the indexed GSI pair for index queries), base64-encoded. When an
//! encryption key is configured the JSON is AES-256-CTR encrypted first,
//! with a fixed synthetic IV so the same item always yields the same cursor.
//! Cursors are opaque but not secret.

use aes::Aes256;
use aes::cipher::{KeyIvInit, StreamCipher};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};
use crate::types::{ATTR_PK, ATTR_SK, IndexName, Item};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Fixed 16-byte synthetic IV. Determinism is required for stable cursors;
/// confidentiality is best-effort only.
const CURSOR_IV: [u8; 16] = *b"dynamotor-cursor";

const CURSOR_DECODE_FAILED: &str = "Couldn't decode cursor";

fn apply_cipher(key: &[u8; 32], buf: &mut [u8]) {
    let mut cipher = Aes256Ctr::new(key.into(), &CURSOR_IV.into());
    cipher.apply_keystream(buf);
}

/// Encode the resume keys of a stored row into an opaque cursor.
pub(crate) fn encode_cursor(keys: &Item, encryption_key: Option<&[u8; 32]>) -> String {
    // Key maps are small and string-valued; serialization cannot fail.
    let mut bytes = serde_json::to_vec(keys).unwrap_or_default();
    if let Some(key) = encryption_key {
        apply_cipher(key, &mut bytes);
    }
    STANDARD.encode(bytes)
}

/// Decode an opaque cursor back into its resume keys.
pub(crate) fn decode_cursor(cursor: &str, encryption_key: Option<&[u8; 32]>) -> Result<Item> {
    let mut bytes = STANDARD
        .decode(cursor)
        .map_err(|_| Error::Pagination(CURSOR_DECODE_FAILED.to_string()))?;
    if let Some(key) = encryption_key {
        apply_cipher(key, &mut bytes);
    }
    serde_json::from_slice(&bytes).map_err(|_| Error::Pagination(CURSOR_DECODE_FAILED.to_string()))
}

/// Extract the cursor keys of a stored row: always `PK` and `SK`, plus the
/// queried index's stored attribute pair for indexes with dedicated
/// attributes.
pub(crate) fn cursor_keys(row: &Item, index: Option<IndexName>) -> Item {
    let mut keys = Item::new();
    for attr in [ATTR_PK, ATTR_SK] {
        if let Some(value) = row.get(attr) {
            keys.insert(attr.to_string(), value.clone());
        }
    }
    if let Some(index) = index
        && let Some((pk_attr, sk_attr)) = index.stored_attrs()
    {
        for attr in [pk_attr, sk_attr] {
            if let Some(value) = row.get(attr) {
                keys.insert(attr.to_string(), value.clone());
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(value: serde_json::Value) -> Item {
        value.as_object().unwrap().clone()
    }

    const TEST_KEY: [u8; 32] = *b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_roundtrip_plain() {
        let original = keys(json!({"PK": "PK#hi", "SK": "SK#42"}));
        let cursor = encode_cursor(&original, None);
        assert_eq!(decode_cursor(&cursor, None).unwrap(), original);
    }

    #[test]
    fn test_roundtrip_encrypted() {
        let original = keys(json!({"PK": "a", "SK": "b", "GSI3PK": "c", "GSI3SK": "d"}));
        let cursor = encode_cursor(&original, Some(&TEST_KEY));
        assert_eq!(decode_cursor(&cursor, Some(&TEST_KEY)).unwrap(), original);
    }

    #[test]
    fn test_encrypted_cursor_is_deterministic() {
        let original = keys(json!({"PK": "a", "SK": "b"}));
        let first = encode_cursor(&original, Some(&TEST_KEY));
        let second = encode_cursor(&original, Some(&TEST_KEY));
        assert_eq!(first, second);
    }

    #[test]
    fn test_encrypted_differs_from_plain() {
        let original = keys(json!({"PK": "a", "SK": "b"}));
        assert_ne!(
            encode_cursor(&original, Some(&TEST_KEY)),
            encode_cursor(&original, None)
        );
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode_cursor("not base64 at all!!!", None).unwrap_err();
        match err {
            Error::Pagination(msg) => assert_eq!(msg, "Couldn't decode cursor"),
            other => panic!("expected pagination error, got {other:?}"),
        }

        // Valid base64, invalid JSON.
        let garbage = STANDARD.encode(b"not-json");
        assert!(decode_cursor(&garbage, None).is_err());
    }

    #[test]
    fn test_decode_with_wrong_key_fails() {
        let original = keys(json!({"PK": "a", "SK": "b"}));
        let cursor = encode_cursor(&original, Some(&TEST_KEY));
        let wrong = *b"ffffffffffffffffffffffffffffffff";
        assert!(decode_cursor(&cursor, Some(&wrong)).is_err());
    }

    #[test]
    fn test_cursor_keys_primary_index() {
        let row = keys(json!({"PK": "p", "SK": "s", "GSI2PK": "x", "foo": 1}));
        let extracted = cursor_keys(&row, None);
        assert_eq!(extracted.len(), 2);
        assert_eq!(extracted["PK"], "p");
    }

    #[test]
    fn test_cursor_keys_gsi1_reuses_primary() {
        let row = keys(json!({"PK": "p", "SK": "s", "GSI2PK": "x"}));
        let extracted = cursor_keys(&row, Some(IndexName::Gsi1));
        assert_eq!(extracted.len(), 2);
    }

    #[test]
    fn test_cursor_keys_dedicated_index() {
        let row = keys(json!({"PK": "p", "SK": "s", "GSI3PK": "x", "GSI3SK": "y"}));
        let extracted = cursor_keys(&row, Some(IndexName::Gsi3));
        assert_eq!(extracted.len(), 4);
        assert_eq!(extracted["GSI3PK"], "x");
    }
}
