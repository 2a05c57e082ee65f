//! Unions: an ordered set of models sharing a polymorphic decoder.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Issues, Result};
use crate::types::ATTR_TAG;

use super::provider::Provider;
use super::{Instance, Model};

const UNION_DECODE_FAILED: &str = "Couldn't decode using any of the provided union types.";

struct UnionInner {
    members: Vec<Model>,
    by_tag: HashMap<String, usize>,
    provider: Option<Provider>,
}

/// A non-constructible composition of two or more models. Decoding yields an
/// instance of one of the members: the member matching the input's `_tag` is
/// tried first, then the remaining members in declaration order; the first
/// success wins. Like [`Model`], a `Union` is a cheap handle.
#[derive(Clone)]
pub struct Union {
    inner: Arc<UnionInner>,
}

impl std::fmt::Debug for Union {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tags: Vec<&str> = self.inner.members.iter().map(|m| m.tag()).collect();
        f.debug_struct("Union").field("members", &tags).finish()
    }
}

impl Union {
    /// Compose the given models. Member tags must be unique; at least two
    /// members are required.
    pub fn new(members: Vec<Model>) -> Self {
        Self::build(members, None)
    }

    /// Compose with a bound storage provider.
    pub fn with_provider(members: Vec<Model>, provider: Provider) -> Self {
        Self::build(members, Some(provider))
    }

    fn build(members: Vec<Model>, provider: Option<Provider>) -> Self {
        debug_assert!(members.len() >= 2, "a union requires at least two members");
        let mut by_tag = HashMap::with_capacity(members.len());
        for (i, member) in members.iter().enumerate() {
            let previous = by_tag.insert(member.tag().to_string(), i);
            debug_assert!(previous.is_none(), "duplicate member tag: {}", member.tag());
        }
        Self {
            inner: Arc::new(UnionInner {
                members,
                by_tag,
                provider,
            }),
        }
    }

    pub fn members(&self) -> &[Model] {
        &self.inner.members
    }

    /// Look up a member by its tag.
    pub fn member(&self, tag: &str) -> Option<&Model> {
        self.inner.by_tag.get(tag).map(|&i| &self.inner.members[i])
    }

    pub(crate) fn provider(&self) -> Result<&Provider> {
        self.inner.provider.as_ref().ok_or(Error::MissingProvider)
    }

    /// Decode a raw value into an instance of one of the members, or fail
    /// with a validation error.
    pub fn from_value(&self, value: &Value) -> Result<Instance> {
        self.decode(value).map_err(Error::Validation)
    }

    /// Codec-compatible decode with the tag-first fallback rule.
    pub fn decode(&self, value: &Value) -> std::result::Result<Instance, Issues> {
        self.validate(value, "")
    }

    /// Codec-compatible validate with the tag-first fallback rule.
    pub fn validate(&self, value: &Value, context: &str) -> std::result::Result<Instance, Issues> {
        let tagged = value
            .as_object()
            .and_then(|m| m.get(ATTR_TAG))
            .and_then(Value::as_str)
            .and_then(|tag| self.inner.by_tag.get(tag).copied());

        if let Some(i) = tagged
            && let Ok(instance) = self.inner.members[i].validate(value, context)
        {
            return Ok(instance);
        }

        for (i, member) in self.inner.members.iter().enumerate() {
            if Some(i) == tagged {
                continue;
            }
            if let Ok(instance) = member.validate(value, context) {
                return Ok(instance);
            }
        }

        Err(Issues::one(context, UNION_DECODE_FAILED))
    }

    /// True iff the instance was produced by one of the members.
    pub fn is(&self, instance: &Instance) -> bool {
        self.inner.by_tag.contains_key(instance.tag())
    }

    /// Delegates to the instance's own encoding.
    pub fn encode_instance(&self, instance: &Instance) -> crate::types::Item {
        instance.encode()
    }
}

/// The decoding side of an operation: a single model or a union of models.
#[derive(Clone, Debug)]
pub enum Decoder {
    Model(Model),
    Union(Union),
}

impl Decoder {
    /// Decode a raw stored item into a typed instance.
    pub fn decode_value(&self, value: &Value) -> Result<Instance> {
        match self {
            Decoder::Model(model) => model.from_value(value),
            Decoder::Union(union) => union.from_value(value),
        }
    }

    pub(crate) fn provider(&self) -> Result<&Provider> {
        match self {
            Decoder::Model(model) => model.provider(),
            Decoder::Union(union) => union.provider(),
        }
    }
}

impl From<Model> for Decoder {
    fn from(model: Model) -> Self {
        Decoder::Model(model)
    }
}

impl From<Union> for Decoder {
    fn from(union: Union) -> Self {
        Decoder::Union(union)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, Field, FieldType};
    use crate::model::KeySpec;
    use serde_json::json;

    fn model_a() -> Model {
        Model::new(
            "A",
            Codec::record(vec![Field::required("a", FieldType::String)]),
            KeySpec::new(|_| "PK#A".into(), |_| "SK#A".into()),
        )
    }

    fn model_b() -> Model {
        Model::new(
            "B",
            Codec::record(vec![Field::required("b", FieldType::Number)]),
            KeySpec::new(|_| "PK#B".into(), |_| "SK#B".into()),
        )
    }

    #[test]
    fn test_decode_prefers_tag() {
        let union = Union::new(vec![model_a(), model_b()]);
        // Structurally both members match; the tag must win.
        let instance = union
            .from_value(&json!({"_tag": "B", "a": "x", "b": 42}))
            .unwrap();
        assert_eq!(instance.tag(), "B");
    }

    #[test]
    fn test_decode_unknown_tag_falls_back_to_declaration_order() {
        let union = Union::new(vec![model_a(), model_b()]);
        let instance = union
            .from_value(&json!({"_tag": "x", "a": "s", "b": 42}))
            .unwrap();
        assert_eq!(instance.tag(), "A");
    }

    #[test]
    fn test_decode_tag_mismatch_falls_back() {
        let union = Union::new(vec![model_a(), model_b()]);
        // Tagged B but structurally only A matches.
        let instance = union
            .from_value(&json!({"_tag": "B", "a": "only-a"}))
            .unwrap();
        assert_eq!(instance.tag(), "A");
    }

    #[test]
    fn test_decode_none_match() {
        let union = Union::new(vec![model_a(), model_b()]);
        let err = union.from_value(&json!({"c": true})).unwrap_err();
        match err {
            Error::Validation(issues) => {
                assert_eq!(issues.0[0].message, UNION_DECODE_FAILED);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_is_accepts_any_member_instance() {
        let a = model_a();
        let b = model_b();
        let union = Union::new(vec![a.clone(), b.clone()]);
        let instance = b.from_value(&json!({"b": 1})).unwrap();
        assert!(union.is(&instance));

        let stranger = Model::new(
            "C",
            Codec::record(vec![]),
            KeySpec::new(|_| "P".into(), |_| "S".into()),
        );
        let foreign = stranger.from_value(&json!({})).unwrap();
        assert!(!union.is(&foreign));
    }

    #[test]
    fn test_member_lookup() {
        let union = Union::new(vec![model_a(), model_b()]);
        assert_eq!(union.member("B").unwrap().tag(), "B");
        assert!(union.member("missing").is_none());
    }
}
