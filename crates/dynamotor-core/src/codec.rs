//! Structural record codecs: validation, exact encoding, and per-property
//! sub-codec resolution.
//!
//! A [`Codec`] is a small closed tree: a struct of typed fields, optionally
//! wrapped by `partial`, `exact`, `readonly`, `refine`, `pipe`, or combined
//! with `intersection`. The engine walks this tree to enumerate declared
//! property names and to resolve the codec of a single property.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Issues;
use crate::types::Item;

/// The scalar/container type accepted by a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// Accepts any JSON value, including `null`.
    Any,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Any => "any",
        }
    }
}

/// Return a human-readable type name for a JSON value.
pub(crate) fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A declared property: name, accepted type, and whether it may be absent.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub optional: bool,
}

impl Field {
    pub fn required(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: true,
        }
    }

    /// Encode a single value through this field's codec. Scalar field codecs
    /// encode to themselves.
    fn encode_value(&self, value: Value) -> Value {
        value
    }
}

/// A refinement predicate over the decoded document.
pub type Predicate = Arc<dyn Fn(&Item) -> bool + Send + Sync>;

/// A validator/encoder for a structural record schema.
#[derive(Clone)]
pub enum Codec {
    /// A record with named, typed fields. Decoding keeps undeclared input
    /// properties; wrap with [`Codec::exact`] to drop them.
    Struct(Vec<Field>),
    /// Every field of the inner codec becomes optional.
    Partial(Box<Codec>),
    /// Decoding and encoding omit properties not declared by the inner codec.
    Exact(Box<Codec>),
    /// All members must accept the document; results merge in member order.
    Intersection(Vec<Codec>),
    /// The inner codec plus a named predicate over the decoded document.
    Refinement {
        name: String,
        inner: Box<Codec>,
        predicate: Predicate,
    },
    /// Marker wrapper; decoding and encoding pass through unchanged.
    Readonly(Box<Codec>),
    /// Feed the first codec's output into the second.
    Pipe(Box<Codec>, Box<Codec>),
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Codec::Struct(fields) => f.debug_tuple("Struct").field(fields).finish(),
            Codec::Partial(inner) => f.debug_tuple("Partial").field(inner).finish(),
            Codec::Exact(inner) => f.debug_tuple("Exact").field(inner).finish(),
            Codec::Intersection(members) => f.debug_tuple("Intersection").field(members).finish(),
            Codec::Refinement { name, inner, .. } => f
                .debug_struct("Refinement")
                .field("name", name)
                .field("inner", inner)
                .finish(),
            Codec::Readonly(inner) => f.debug_tuple("Readonly").field(inner).finish(),
            Codec::Pipe(a, b) => f.debug_tuple("Pipe").field(a).field(b).finish(),
        }
    }
}

impl Codec {
    /// A record codec over the given fields.
    pub fn record(fields: Vec<Field>) -> Self {
        Codec::Struct(fields)
    }

    pub fn partial(self) -> Self {
        Codec::Partial(Box::new(self))
    }

    pub fn exact(self) -> Self {
        // Exact is idempotent; avoid stacking wrappers.
        match self {
            already @ Codec::Exact(_) => already,
            other => Codec::Exact(Box::new(other)),
        }
    }

    pub fn readonly(self) -> Self {
        Codec::Readonly(Box::new(self))
    }

    pub fn intersection(members: Vec<Codec>) -> Self {
        Codec::Intersection(members)
    }

    pub fn refine(
        self,
        name: impl Into<String>,
        predicate: impl Fn(&Item) -> bool + Send + Sync + 'static,
    ) -> Self {
        Codec::Refinement {
            name: name.into(),
            inner: Box::new(self),
            predicate: Arc::new(predicate),
        }
    }

    /// Compose with an additional codec: this codec's decode output is fed
    /// into `next`.
    pub fn pipe(self, next: Codec) -> Self {
        Codec::Pipe(Box::new(self), Box::new(next))
    }

    /// Validate and decode a raw value into an item document.
    pub fn decode(&self, value: &Value) -> Result<Item, Issues> {
        self.validate(value, "")
    }

    /// Like [`Codec::decode`], with issue paths rooted at `context`.
    pub fn validate(&self, value: &Value, context: &str) -> Result<Item, Issues> {
        match self {
            Codec::Struct(fields) => {
                let map = as_object(value, context)?;
                let mut issues = Issues::default();
                for field in fields {
                    check_field(map, field, false, context, &mut issues);
                }
                if issues.is_empty() {
                    Ok(map.clone())
                } else {
                    Err(issues)
                }
            }
            Codec::Partial(inner) => {
                let map = as_object(value, context)?;
                let mut issues = Issues::default();
                for field in inner.props_fields() {
                    check_field(map, field, true, context, &mut issues);
                }
                if issues.is_empty() {
                    Ok(map.clone())
                } else {
                    Err(issues)
                }
            }
            Codec::Exact(inner) => {
                let decoded = inner.validate(value, context)?;
                let declared = inner.props();
                Ok(decoded
                    .into_iter()
                    .filter(|(k, _)| declared.iter().any(|p| p == k))
                    .collect())
            }
            Codec::Intersection(members) => {
                let mut merged = Item::new();
                let mut issues = Issues::default();
                for member in members {
                    match member.validate(value, context) {
                        Ok(decoded) => merged.extend(decoded),
                        Err(more) => issues.extend(more),
                    }
                }
                if issues.is_empty() {
                    Ok(merged)
                } else {
                    Err(issues)
                }
            }
            Codec::Refinement {
                name,
                inner,
                predicate,
            } => {
                let decoded = inner.validate(value, context)?;
                if predicate(&decoded) {
                    Ok(decoded)
                } else {
                    Err(Issues::one(context, format!("refinement failed: {name}")))
                }
            }
            Codec::Readonly(inner) => inner.validate(value, context),
            Codec::Pipe(first, second) => {
                let intermediate = first.validate(value, context)?;
                second.validate(&Value::Object(intermediate), context)
            }
        }
    }

    /// True iff the value decodes successfully.
    pub fn is(&self, value: &Value) -> bool {
        self.decode(value).is_ok()
    }

    /// Encode an item document. At an [`Codec::Exact`] wrapper, properties
    /// not declared by the inner codec are omitted.
    pub fn encode(&self, item: &Item) -> Item {
        match self {
            Codec::Struct(_) | Codec::Partial(_) => item.clone(),
            Codec::Exact(inner) => {
                let declared = inner.props();
                inner
                    .encode(item)
                    .into_iter()
                    .filter(|(k, _)| declared.iter().any(|p| p == k))
                    .collect()
            }
            Codec::Intersection(members) => {
                let mut out = Item::new();
                for member in members {
                    out.extend(member.encode(item));
                }
                out
            }
            Codec::Refinement { inner, .. } | Codec::Readonly(inner) => inner.encode(item),
            Codec::Pipe(first, second) => first.encode(&second.encode(item)),
        }
    }

    /// The declared property names, in declaration order.
    pub fn props(&self) -> Vec<String> {
        let mut out = Vec::new();
        for field in self.props_fields() {
            if !out.iter().any(|n| n == &field.name) {
                out.push(field.name.clone());
            }
        }
        out
    }

    /// Resolve the sub-codec of a single property, descending through the
    /// wrapper set. The first matching field wins; `None` means no codec in
    /// the tree declares the property.
    pub fn prop_codec(&self, name: &str) -> Option<&Field> {
        self.props_fields().find(|field| field.name == name)
    }

    /// Best-effort single-property encode: route the value through the
    /// property's sub-codec, or return it unchanged when no codec matches.
    pub fn encode_prop(&self, name: &str, value: Value) -> Value {
        match self.prop_codec(name) {
            Some(field) => field.encode_value(value),
            None => value,
        }
    }

    /// Iterate every declared field, descending through wrappers in
    /// declaration order.
    fn props_fields(&self) -> Box<dyn Iterator<Item = &Field> + '_> {
        match self {
            Codec::Struct(fields) => Box::new(fields.iter()),
            Codec::Partial(inner)
            | Codec::Exact(inner)
            | Codec::Readonly(inner)
            | Codec::Refinement { inner, .. } => inner.props_fields(),
            Codec::Intersection(members) => {
                Box::new(members.iter().flat_map(|m| m.props_fields()))
            }
            Codec::Pipe(first, second) => {
                Box::new(first.props_fields().chain(second.props_fields()))
            }
        }
    }
}

fn as_object<'a>(value: &'a Value, context: &str) -> Result<&'a Item, Issues> {
    value.as_object().ok_or_else(|| {
        Issues::one(
            context,
            format!("expected an object, got {}", json_type_name(value)),
        )
    })
}

fn check_field(map: &Item, field: &Field, force_optional: bool, context: &str, issues: &mut Issues) {
    let path = if context.is_empty() {
        field.name.clone()
    } else {
        format!("{context}.{}", field.name)
    };
    match map.get(&field.name) {
        None => {
            if !(field.optional || force_optional) {
                issues.push(path, "missing required property");
            }
        }
        Some(value) => {
            if !field.ty.matches(value) {
                issues.push(
                    path,
                    format!(
                        "expected {}, got {}",
                        field.ty.name(),
                        json_type_name(value)
                    ),
                );
            }
        }
    }
}
