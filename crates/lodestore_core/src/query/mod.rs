//! The query model: filters, ordering, limit/offset, cursor pagination.
//!
//! A [`Query`] is an immutable value. Two queries that compare equal
//! produce the same [`Query::cache_key`], which is what the watcher
//! registry uses to share subjects between identical `watch_all` calls.

mod cursor;
mod eval;
mod page;

pub use cursor::{Cursor, PageInfo, PagedResult};
pub use eval::{apply_query, matches};
pub use page::paginate;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A filter operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    /// Field equals the value.
    Equals,
    /// Field does not equal the value.
    NotEquals,
    /// Field is strictly less than the value.
    LessThan,
    /// Field is less than or equal to the value.
    LessThanOrEquals,
    /// Field is strictly greater than the value.
    GreaterThan,
    /// Field is greater than or equal to the value.
    GreaterThanOrEquals,
    /// Field is one of the listed values. An empty list matches nothing.
    WhereIn,
    /// Field is none of the listed values. An empty list matches everything.
    WhereNotIn,
    /// Field is null (or, with value `false`, not null).
    IsNull,
    /// Field is not null.
    IsNotNull,
    /// String field contains the value as a substring.
    Contains,
    /// String field starts with the value.
    StartsWith,
    /// String field ends with the value.
    EndsWith,
    /// Array field contains the value.
    ArrayContains,
    /// Array field contains at least one of the listed values.
    ArrayContainsAny,
}

/// A single predicate over one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// The logical field name.
    pub field: String,
    /// The operator.
    pub op: FilterOp,
    /// The comparison value (a list for the collection operators).
    pub value: Value,
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortTerm {
    /// The logical field name.
    pub field: String,
    /// Sort descending instead of ascending.
    pub descending: bool,
}

/// An immutable query value.
///
/// Filters combine with logical AND. Sort terms apply in listed order.
/// `first_count` and `after_cursor` drive cursor pagination on top of
/// whatever `limit`/`offset` shaped the underlying list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    /// Predicates, combined with AND.
    pub filters: Vec<Filter>,
    /// Ordering terms, applied in listed order.
    pub sorts: Vec<SortTerm>,
    /// Maximum number of rows.
    pub limit: Option<u64>,
    /// Number of rows to skip.
    pub offset: Option<u64>,
    /// Page size for cursor pagination.
    pub first_count: Option<usize>,
    /// Resume-after position for cursor pagination.
    pub after_cursor: Option<Cursor>,
    /// Logical field name to physical column name mapping.
    /// Unmapped names pass through unchanged.
    pub field_map: BTreeMap<String, String>,
}

impl Query {
    /// Creates an empty query matching everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter.
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value,
        });
        self
    }

    /// Appends an ordering term.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sorts.push(SortTerm {
            field: field.into(),
            descending,
        });
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the row offset.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Sets the cursor page size.
    #[must_use]
    pub fn first(mut self, count: usize) -> Self {
        self.first_count = Some(count);
        self
    }

    /// Sets the resume-after cursor.
    #[must_use]
    pub fn after(mut self, cursor: Cursor) -> Self {
        self.after_cursor = Some(cursor);
        self
    }

    /// Maps a logical field name to a physical column name.
    #[must_use]
    pub fn map_field(mut self, logical: impl Into<String>, physical: impl Into<String>) -> Self {
        self.field_map.insert(logical.into(), physical.into());
        self
    }

    /// Resolves a logical field name through the mapping.
    pub fn physical_field<'a>(&'a self, logical: &'a str) -> &'a str {
        self.field_map
            .get(logical)
            .map(String::as_str)
            .unwrap_or(logical)
    }

    /// Returns the canonical serialization of this query.
    ///
    /// Equal queries produce equal keys; the watcher registry caches
    /// query subjects under this key.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_queries_share_cache_keys() {
        let a = Query::new()
            .filter("age", FilterOp::GreaterThan, json!(21))
            .order_by("name", false)
            .limit(10);
        let b = Query::new()
            .filter("age", FilterOp::GreaterThan, json!(21))
            .order_by("name", false)
            .limit(10);

        assert_eq!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn different_queries_have_different_keys() {
        let a = Query::new().filter("age", FilterOp::GreaterThan, json!(21));
        let b = Query::new().filter("age", FilterOp::GreaterThanOrEquals, json!(21));
        assert_ne!(a.cache_key(), b.cache_key());

        let c = Query::new().limit(5);
        let d = Query::new().limit(6);
        assert_ne!(c.cache_key(), d.cache_key());
    }

    #[test]
    fn filter_order_is_significant() {
        let a = Query::new()
            .filter("a", FilterOp::Equals, json!(1))
            .filter("b", FilterOp::Equals, json!(2));
        let b = Query::new()
            .filter("b", FilterOp::Equals, json!(2))
            .filter("a", FilterOp::Equals, json!(1));
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn field_mapping_passthrough() {
        let q = Query::new().map_field("name", "user_name");
        assert_eq!(q.physical_field("name"), "user_name");
        assert_eq!(q.physical_field("age"), "age");
    }
}
