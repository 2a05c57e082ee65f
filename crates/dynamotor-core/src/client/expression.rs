//! Update-expression construction for raw updates.
//!
//! Attribute names are sanitized into expression placeholders: every
//! non-alphanumeric character is stripped, and collisions are disambiguated
//! by appending `x{n}` where `n` is the current count of sanitized names.

use std::collections::HashMap;

use serde_json::Value;

use crate::model::Model;
use crate::ops::Expression;
use crate::types::Item;

/// Allocates collision-free expression placeholders for attribute names.
pub(crate) struct NameAllocator {
    /// sanitized placeholder stem -> original attribute name
    allocated: HashMap<String, String>,
}

impl NameAllocator {
    pub(crate) fn new() -> Self {
        Self {
            allocated: HashMap::new(),
        }
    }

    /// Sanitize an attribute name into a placeholder stem.
    pub(crate) fn allocate(&mut self, attr: &str) -> String {
        let mut stem: String = attr.chars().filter(char::is_ascii_alphanumeric).collect();
        if self.allocated.contains_key(&stem) {
            stem = format!("{stem}x{}", self.allocated.len());
        }
        self.allocated.insert(stem.clone(), attr.to_string());
        stem
    }
}

/// Build the `SET`/`REMOVE` update expression for the given attributes.
///
/// - `null` values on attributes beginning with `GSI` become `REMOVE`
///   clauses;
/// - `null` values on any other attribute are dropped;
/// - everything else becomes a `SET` clause, with values on known schema
///   keys routed through the model's per-property codec.
pub(crate) fn build_update_expression(model: &Model, attributes: &Item) -> Expression {
    let mut allocator = NameAllocator::new();
    let mut sets: Vec<String> = Vec::new();
    let mut removes: Vec<String> = Vec::new();
    let mut names = HashMap::new();
    let mut values = Item::new();

    for (attr, value) in attributes {
        if value.is_null() {
            if attr.starts_with("GSI") {
                let stem = allocator.allocate(attr);
                names.insert(format!("#{stem}"), attr.clone());
                removes.push(format!("#{stem}"));
            }
            continue;
        }
        let stem = allocator.allocate(attr);
        names.insert(format!("#{stem}"), attr.clone());
        values.insert(
            format!(":{stem}"),
            model.encode_prop(attr, value.clone()),
        );
        sets.push(format!("#{stem} = :{stem}"));
    }

    let mut clauses = Vec::new();
    if !sets.is_empty() {
        clauses.push(format!("SET {}", sets.join(", ")));
    }
    if !removes.is_empty() {
        clauses.push(format!("REMOVE {}", removes.join(", ")));
    }

    Expression {
        expression: clauses.join(" "),
        names,
        values,
    }
}
