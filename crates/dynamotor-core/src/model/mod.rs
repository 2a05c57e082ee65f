//! Models: a stable tag, an exact codec, key derivation, and provider-backed
//! storage capabilities.
//!
//! A [`Model`] binds a validated record schema to a named type. Instances
//! carry the schema attributes plus a document version, and derive their key
//! attributes (`PK`, `SK`, `GSI2PK`..`GSI5SK`) on demand. Models are cheap
//! handles over shared state; cloning one clones a reference, not the
//! schema.

mod provider;
mod union;

pub use provider::Provider;
pub use union::{Decoder, Union};

use std::sync::Arc;

use serde_json::Value;

use crate::codec::Codec;
use crate::error::{Error, Issues, Result};
use crate::types::{ATTR_DOC_VERSION, ATTR_TAG, IndexName, Item, Key};

/// Derives a primary key attribute from an instance's values.
pub type KeyFn = Arc<dyn Fn(&Item) -> String + Send + Sync>;

/// Derives a secondary index attribute; `None` leaves the attribute absent.
pub type IndexKeyFn = Arc<dyn Fn(&Item) -> Option<String> + Send + Sync>;

/// Key derivation spec: how a model computes its derived key attributes.
#[derive(Clone)]
pub struct KeySpec {
    pk: KeyFn,
    sk: KeyFn,
    indexes: Vec<(IndexName, IndexKeyFn, IndexKeyFn)>,
}

impl KeySpec {
    pub fn new(
        pk: impl Fn(&Item) -> String + Send + Sync + 'static,
        sk: impl Fn(&Item) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            pk: Arc::new(pk),
            sk: Arc::new(sk),
            indexes: Vec::new(),
        }
    }

    /// Declare a secondary index key pair. `Gsi1` is the inverse index and
    /// derives from `PK`/`SK`; declaring it here is not supported.
    pub fn with_index(
        mut self,
        index: IndexName,
        pk: impl Fn(&Item) -> Option<String> + Send + Sync + 'static,
        sk: impl Fn(&Item) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        debug_assert!(index != IndexName::Gsi1, "GSI1 derives from the primary key");
        self.indexes.push((index, Arc::new(pk), Arc::new(sk)));
        self
    }
}

/// Render an attribute value for interpolation into a key string: strings
/// verbatim, numbers and booleans via display, everything else empty.
pub fn key_component(values: &Item, name: &str) -> String {
    match values.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

struct ModelInner {
    tag: String,
    codec: Codec,
    keys: KeySpec,
    provider: Option<Provider>,
}

/// A named constructible binding a tag, an exact codec, key derivation, and
/// optionally a storage provider.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model").field("tag", &self.inner.tag).finish()
    }
}

impl Model {
    /// Create a model without storage capabilities. The codec is wrapped
    /// exact, so decoding and encoding omit undeclared properties.
    pub fn new(tag: impl Into<String>, codec: Codec, keys: KeySpec) -> Self {
        Self {
            inner: Arc::new(ModelInner {
                tag: tag.into(),
                codec: codec.exact(),
                keys,
                provider: None,
            }),
        }
    }

    /// Create a model with a bound storage provider.
    pub fn with_provider(
        tag: impl Into<String>,
        codec: Codec,
        keys: KeySpec,
        provider: Provider,
    ) -> Self {
        Self {
            inner: Arc::new(ModelInner {
                tag: tag.into(),
                codec: codec.exact(),
                keys,
                provider: Some(provider),
            }),
        }
    }

    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    /// The model's exact codec.
    pub fn codec(&self) -> &Codec {
        &self.inner.codec
    }

    pub(crate) fn provider(&self) -> Result<&Provider> {
        self.inner.provider.as_ref().ok_or(Error::MissingProvider)
    }

    /// Construct an instance from a typed input, without validation.
    ///
    /// A `_docVersion` property in the input becomes the instance's document
    /// version; a `_tag` property is discarded.
    pub fn new_instance(&self, mut values: Item) -> Instance {
        let doc_version = values.remove(ATTR_DOC_VERSION).and_then(|v| v.as_u64());
        values.remove(ATTR_TAG);
        Instance {
            model: self.clone(),
            values,
            doc_version,
        }
    }

    /// Exact-decode a raw value into an instance, or fail with a validation
    /// error.
    pub fn from_value(&self, value: &Value) -> Result<Instance> {
        self.decode(value).map_err(Error::Validation)
    }

    /// Codec-compatible decode: wraps the decoded document into an instance.
    pub fn decode(&self, value: &Value) -> std::result::Result<Instance, Issues> {
        self.validate(value, "")
    }

    /// Codec-compatible validate, with issue paths rooted at `context`.
    pub fn validate(&self, value: &Value, context: &str) -> std::result::Result<Instance, Issues> {
        let values = self.inner.codec.validate(value, context)?;
        let doc_version = value
            .as_object()
            .and_then(|m| m.get(ATTR_DOC_VERSION))
            .and_then(Value::as_u64);
        Ok(Instance {
            model: self.clone(),
            values,
            doc_version,
        })
    }

    /// True iff the raw value would decode under this model's codec.
    pub fn accepts(&self, value: &Value) -> bool {
        self.inner.codec.is(value)
    }

    /// True iff the instance was produced by this model.
    pub fn is(&self, instance: &Instance) -> bool {
        instance.model.inner.tag == self.inner.tag
    }

    /// Encode an instance: the exact codec's encoding annotated with `_tag`.
    pub fn encode_instance(&self, instance: &Instance) -> Item {
        let mut encoded = self.inner.codec.encode(&instance.values);
        encoded.insert(ATTR_TAG.to_string(), Value::String(self.inner.tag.clone()));
        encoded
    }

    /// Best-effort single-attribute encode through the schema's sub-codec;
    /// unknown attributes pass through unchanged.
    pub fn encode_prop(&self, name: &str, value: Value) -> Value {
        self.inner.codec.encode_prop(name, value)
    }

    /// Compose this model's codec with an additional codec chain.
    pub fn pipe(&self, next: Codec) -> Codec {
        self.inner.codec.clone().pipe(next)
    }

    pub(crate) fn derive_pk(&self, values: &Item) -> String {
        (self.inner.keys.pk)(values)
    }

    pub(crate) fn derive_sk(&self, values: &Item) -> String {
        (self.inner.keys.sk)(values)
    }

    /// Derive every present key attribute for the given values.
    pub(crate) fn derive_key_attributes(&self, values: &Item) -> Item {
        let mut out = Item::new();
        out.insert(
            crate::types::ATTR_PK.to_string(),
            Value::String(self.derive_pk(values)),
        );
        out.insert(
            crate::types::ATTR_SK.to_string(),
            Value::String(self.derive_sk(values)),
        );
        for (index, pk_fn, sk_fn) in &self.inner.keys.indexes {
            let Some((pk_attr, sk_attr)) = index.stored_attrs() else {
                continue;
            };
            if let Some(pk) = pk_fn(values) {
                out.insert(pk_attr.to_string(), Value::String(pk));
            }
            if let Some(sk) = sk_fn(values) {
                out.insert(sk_attr.to_string(), Value::String(sk));
            }
        }
        out
    }
}

/// A typed, observationally immutable instance of a [`Model`].
#[derive(Clone)]
pub struct Instance {
    model: Model,
    values: Item,
    doc_version: Option<u64>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("tag", &self.model.inner.tag)
            .field("values", &self.values)
            .field("doc_version", &self.doc_version)
            .finish()
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.model.inner.tag == other.model.inner.tag
            && self.values() == other.values()
            && self.doc_version == other.doc_version
    }
}

impl Instance {
    pub fn tag(&self) -> &str {
        self.model.tag()
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Only the schema-declared attributes.
    pub fn values(&self) -> Item {
        let declared = self.model.inner.codec.props();
        self.values
            .iter()
            .filter(|(k, _)| declared.iter().any(|p| p == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// The encoded record annotated with `_tag`. Never emits attributes
    /// outside the declared schema (plus `_tag`).
    pub fn encode(&self) -> Item {
        self.model.encode_instance(self)
    }

    pub fn doc_version(&self) -> Option<u64> {
        self.doc_version
    }

    pub(crate) fn with_doc_version(&self, version: u64) -> Instance {
        Instance {
            model: self.model.clone(),
            values: self.values.clone(),
            doc_version: Some(version),
        }
    }

    pub fn pk(&self) -> String {
        self.model.derive_pk(&self.values)
    }

    pub fn sk(&self) -> String {
        self.model.derive_sk(&self.values)
    }

    pub fn key(&self) -> Key {
        Key::new(self.pk(), self.sk())
    }

    /// Every derived key attribute present for this instance.
    pub fn key_attributes(&self) -> Item {
        self.model.derive_key_attributes(&self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Field, FieldType};
    use serde_json::json;

    fn simple_model() -> Model {
        Model::new(
            "Simple",
            Codec::record(vec![
                Field::required("foo", FieldType::String),
                Field::required("bar", FieldType::Number),
            ]),
            KeySpec::new(
                |v| format!("PK#{}", key_component(v, "foo")),
                |v| format!("SK#{}", key_component(v, "bar")),
            ),
        )
    }

    #[test]
    fn test_from_value_and_encode() {
        let model = simple_model();
        let instance = model
            .from_value(&json!({"foo": "hi", "bar": 42, "extra": true}))
            .unwrap();
        let encoded = instance.encode();
        assert_eq!(encoded["_tag"], "Simple");
        assert_eq!(encoded["foo"], "hi");
        assert_eq!(encoded["bar"], 42);
        assert!(encoded.get("extra").is_none());
    }

    #[test]
    fn test_from_value_invalid() {
        let model = simple_model();
        let err = model.from_value(&json!({"foo": "hi"})).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_roundtrip_idempotent() {
        let model = simple_model();
        let first = model.from_value(&json!({"foo": "hi", "bar": 42})).unwrap();
        let second = model.from_value(&Value::Object(first.encode())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_key_derivation() {
        let model = simple_model();
        let instance =
            model.new_instance(json!({"foo": "hi", "bar": 42}).as_object().unwrap().clone());
        assert_eq!(instance.pk(), "PK#hi");
        assert_eq!(instance.sk(), "SK#42");
        assert_eq!(instance.key(), Key::new("PK#hi", "SK#42"));
    }

    #[test]
    fn test_index_key_attributes() {
        let model = Model::new(
            "Indexed",
            Codec::record(vec![
                Field::required("id", FieldType::String),
                Field::optional("owner", FieldType::String),
            ]),
            KeySpec::new(
                |v| format!("ID#{}", key_component(v, "id")),
                |_| "META#".to_string(),
            )
            .with_index(
                IndexName::Gsi2,
                |v| v.get("owner").and_then(Value::as_str).map(|o| format!("OWNER#{o}")),
                |v| v.get("owner").map(|_| format!("ID#{}", key_component(v, "id"))),
            ),
        );

        let with_owner = model.from_value(&json!({"id": "1", "owner": "ada"})).unwrap();
        let attrs = with_owner.key_attributes();
        assert_eq!(attrs["GSI2PK"], "OWNER#ada");
        assert_eq!(attrs["GSI2SK"], "ID#1");

        let without_owner = model.from_value(&json!({"id": "2"})).unwrap();
        let attrs = without_owner.key_attributes();
        assert!(attrs.get("GSI2PK").is_none());
        assert_eq!(attrs["PK"], "ID#2");
    }

    #[test]
    fn test_new_instance_extracts_doc_version() {
        let model = simple_model();
        let instance = model.new_instance(
            json!({"foo": "x", "bar": 1, "_docVersion": 3, "_tag": "Simple"})
                .as_object()
                .unwrap()
                .clone(),
        );
        assert_eq!(instance.doc_version(), Some(3));
        assert!(instance.get("_docVersion").is_none());
        assert!(instance.get("_tag").is_none());
    }

    #[test]
    fn test_values_only_declared() {
        let model = simple_model();
        let instance = model.new_instance(
            json!({"foo": "x", "bar": 1, "stray": true}).as_object().unwrap().clone(),
        );
        let values = instance.values();
        assert!(values.get("stray").is_none());
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_is_checks_origin() {
        let model = simple_model();
        let other = Model::new(
            "Other",
            Codec::record(vec![Field::required("foo", FieldType::String)]),
            KeySpec::new(|_| "P".into(), |_| "S".into()),
        );
        let instance = model.from_value(&json!({"foo": "a", "bar": 0})).unwrap();
        assert!(model.is(&instance));
        assert!(!other.is(&instance));
    }

    #[test]
    fn test_decode_captures_doc_version() {
        let model = simple_model();
        let decoded = model
            .from_value(&json!({"foo": "a", "bar": 0, "_docVersion": 7}))
            .unwrap();
        assert_eq!(decoded.doc_version(), Some(7));
        // _docVersion is not a schema attribute; encode must not emit it.
        assert!(decoded.encode().get("_docVersion").is_none());
    }
}
