//! Queries: key-condition execution, page following, and routing of result
//! rows into per-model buckets.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::model::{Decoder, Instance};
use crate::ops::Expression;
use crate::store::{QueryRequest, QueryResponse};
use crate::types::{IndexName, Item, LEGACY_MARKER};

use super::Client;

/// A key-condition query.
#[derive(Debug, Clone)]
pub struct QueryInput {
    pub key_condition: Expression,
    pub index: Option<IndexName>,
    pub filter: Option<Expression>,
    pub limit: Option<usize>,
    pub scan_forward: bool,
    pub exclusive_start_key: Option<Item>,
    /// Follow `last_evaluated_key` until the query is exhausted.
    pub fetch_all_pages: bool,
}

impl QueryInput {
    pub fn new(key_condition: Expression) -> Self {
        Self {
            key_condition,
            index: None,
            filter: None,
            limit: None,
            scan_forward: true,
            exclusive_start_key: None,
            fetch_all_pages: false,
        }
    }

    pub fn on_index(mut self, index: IndexName) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_filter(mut self, filter: Expression) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn fetch_all_pages(mut self) -> Self {
        self.fetch_all_pages = true;
        self
    }
}

/// Rows routed by decoder name, in declaration order of the decoders. Rows
/// matching no decoder land in `unknown`.
#[derive(Debug, Default)]
pub struct QueryOutput {
    pub groups: HashMap<String, Vec<Instance>>,
    pub unknown: Vec<Item>,
    pub last_evaluated_key: Option<Item>,
}

/// Combine a caller filter with the implicit legacy-row exclusion.
pub(crate) fn with_legacy_filter(filter: Option<&Expression>) -> Expression {
    match filter {
        Some(custom) => {
            let mut combined = custom.clone();
            combined.expression = format!(
                "({}) AND attribute_not_exists({LEGACY_MARKER})",
                custom.expression
            );
            combined
        }
        None => Expression::new(format!("attribute_not_exists({LEGACY_MARKER})")),
    }
}

impl Client {
    /// Run one store query page with the implicit legacy filter applied.
    pub(crate) async fn query_page(
        &self,
        input: &QueryInput,
        exclusive_start_key: Option<Item>,
        limit: Option<usize>,
    ) -> Result<QueryResponse> {
        let response = self
            .store()
            .query(QueryRequest {
                table: self.table_name().to_string(),
                index: input.index,
                key_condition: input.key_condition.clone(),
                filter: Some(with_legacy_filter(input.filter.as_ref())),
                exclusive_start_key,
                limit,
                scan_forward: input.scan_forward,
            })
            .await?;
        Ok(response)
    }

    /// Execute a query and route each row to the first decoder (in
    /// declaration order) that accepts it.
    pub async fn query(
        &self,
        input: &QueryInput,
        decoders: &[(String, Decoder)],
    ) -> Result<QueryOutput> {
        let mut output = QueryOutput::default();
        for (name, _) in decoders {
            output.groups.entry(name.clone()).or_default();
        }

        let mut start_key = input.exclusive_start_key.clone();
        loop {
            let page = self.query_page(input, start_key.take(), input.limit).await?;
            debug!(rows = page.items.len(), "query page");
            for row in page.items {
                route_row(&mut output, decoders, row);
            }
            output.last_evaluated_key = page.last_evaluated_key;
            match (&output.last_evaluated_key, input.fetch_all_pages) {
                (Some(key), true) => start_key = Some(key.clone()),
                _ => break,
            }
        }
        Ok(output)
    }

    /// Query rows for a single decoder, following pages when requested.
    /// Rows the decoder rejects are skipped.
    pub async fn query_as(&self, input: &QueryInput, decoder: &Decoder) -> Result<Vec<Instance>> {
        let decoders = [("items".to_string(), decoder.clone())];
        let mut output = self.query(input, &decoders).await?;
        Ok(output.groups.remove("items").unwrap_or_default())
    }
}

fn route_row(output: &mut QueryOutput, decoders: &[(String, Decoder)], row: Item) {
    let value = Value::Object(row);
    for (name, decoder) in decoders {
        if let Ok(instance) = decoder.decode_value(&value) {
            if let Some(bucket) = output.groups.get_mut(name) {
                bucket.push(instance);
            }
            return;
        }
    }
    if let Value::Object(row) = value {
        output.unknown.push(row);
    }
}
