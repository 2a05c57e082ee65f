//! Cursor-based pagination with bidirectional traversal.
//!
//! Callers ask for `first`/`after` (forward) or `last`/`before` (backward)
//! slices of a key-condition query. The engine fetches one row beyond the
//! requested page to learn whether more remain, and hands each edge an
//! opaque cursor encoding the row's resume keys.

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Decoder, Instance};
use crate::ops::Expression;
use crate::types::{DEFAULT_PAGE_SIZE, IndexName, MAX_PAGE_SIZE};

use super::cursor::{cursor_keys, decode_cursor, encode_cursor};
use super::query::QueryInput;
use super::Client;

/// Relay-style pagination arguments.
#[derive(Debug, Clone, Default)]
pub struct PaginateArgs {
    pub first: Option<usize>,
    pub last: Option<usize>,
    pub after: Option<String>,
    pub before: Option<String>,
}

/// A pagination request: the query to slice and how to slice it.
#[derive(Debug, Clone)]
pub struct PaginateInput {
    pub key_condition: Expression,
    pub index: Option<IndexName>,
    pub filter: Option<Expression>,
    pub args: PaginateArgs,
}

impl PaginateInput {
    pub fn new(key_condition: Expression, args: PaginateArgs) -> Self {
        Self {
            key_condition,
            index: None,
            filter: None,
            args,
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
}

/// One result row with its resume cursor.
#[derive(Debug)]
pub struct Edge {
    pub cursor: String,
    pub node: Instance,
}

#[derive(Debug, Clone, Default)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

#[derive(Debug)]
pub struct Page {
    pub edges: Vec<Edge>,
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

fn validate_args(args: &PaginateArgs) -> Result<()> {
    if args.first.is_some() && args.last.is_some() {
        return Err(Error::Pagination(
            "Cannot use both first and last".to_string(),
        ));
    }
    if args.before.is_some() && args.after.is_some() {
        return Err(Error::Pagination(
            "Cannot use both before and after".to_string(),
        ));
    }
    if args.before.is_some() && args.first.is_some() {
        return Err(Error::Pagination(
            "Cannot use first with before".to_string(),
        ));
    }
    if args.after.is_some() && args.last.is_some() {
        return Err(Error::Pagination(
            "Cannot use last with after".to_string(),
        ));
    }
    Ok(())
}

impl Client {
    /// Slice a key-condition query into a cursor-delimited page.
    pub async fn paginate(&self, input: &PaginateInput, decoder: &Decoder) -> Result<Page> {
        let args = &input.args;
        validate_args(args)?;

        let limit = args
            .first
            .or(args.last)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);
        let direction = if args.before.is_some() || args.last.is_some() {
            Direction::Backward
        } else {
            Direction::Forward
        };
        let resume = match direction {
            Direction::Forward => args.after.as_deref(),
            Direction::Backward => args.before.as_deref(),
        };
        let start_key = resume
            .map(|cursor| decode_cursor(cursor, self.cursor_key()))
            .transpose()?;

        let query = QueryInput {
            key_condition: input.key_condition.clone(),
            index: input.index,
            filter: input.filter.clone(),
            limit: Some(limit + 1),
            scan_forward: direction == Direction::Forward,
            exclusive_start_key: start_key.clone(),
            fetch_all_pages: false,
        };
        let response = self.query_page(&query, start_key, Some(limit + 1)).await?;
        debug!(
            rows = response.items.len(),
            limit,
            backward = direction == Direction::Backward,
            "paginate page"
        );

        let has_more = response.items.len() > limit;
        let mut kept: Vec<_> = response.items.into_iter().take(limit).collect();
        if direction == Direction::Backward {
            // Backward queries scan in reverse store order; restore it.
            kept.reverse();
        }

        let mut edges = Vec::with_capacity(kept.len());
        for row in kept {
            let cursor = encode_cursor(&cursor_keys(&row, input.index), self.cursor_key());
            let node = decoder.decode_value(&serde_json::Value::Object(row))?;
            edges.push(Edge { cursor, node });
        }

        let page_info = PageInfo {
            has_next_page: direction == Direction::Forward && has_more,
            has_previous_page: direction == Direction::Backward && has_more,
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
        };
        Ok(Page { edges, page_info })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_first_and_last() {
        let args = PaginateArgs {
            first: Some(1),
            last: Some(1),
            ..PaginateArgs::default()
        };
        assert!(matches!(validate_args(&args), Err(Error::Pagination(_))));
    }

    #[test]
    fn test_rejects_before_and_after() {
        let args = PaginateArgs {
            before: Some("a".into()),
            after: Some("b".into()),
            ..PaginateArgs::default()
        };
        assert!(matches!(validate_args(&args), Err(Error::Pagination(_))));
    }

    #[test]
    fn test_rejects_crossed_pairs() {
        let args = PaginateArgs {
            first: Some(1),
            before: Some("c".into()),
            ..PaginateArgs::default()
        };
        assert!(matches!(validate_args(&args), Err(Error::Pagination(_))));

        let args = PaginateArgs {
            last: Some(1),
            after: Some("c".into()),
            ..PaginateArgs::default()
        };
        assert!(matches!(validate_args(&args), Err(Error::Pagination(_))));
    }

    #[test]
    fn test_accepts_canonical_pairs() {
        assert!(validate_args(&PaginateArgs::default()).is_ok());
        assert!(
            validate_args(&PaginateArgs {
                first: Some(10),
                after: Some("c".into()),
                ..PaginateArgs::default()
            })
            .is_ok()
        );
        assert!(
            validate_args(&PaginateArgs {
                last: Some(10),
                before: Some("c".into()),
                ..PaginateArgs::default()
            })
            .is_ok()
        );
    }
}
